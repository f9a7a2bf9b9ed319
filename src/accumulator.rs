//! Mergeable streaming accumulator for the corrected sum of squares.
//!
//! An [`Accumulator`] is the sufficient statistic `(count, sum, CSS)` for
//! mean and variance. No raw observations are retained.
//!
//! # Algorithms
//!
//! - **Update**: Welford's single-pass rule, expressed as a merge with a
//!   one-observation state `(1, x, 0)`.
//!   Reference: Welford (1962), "Note on a Method for Calculating
//!   Corrected Sums of Squares and Products", *Technometrics* 4(3).
//! - **Merge**: Chan, Golub & LeVeque pairwise update. The result does not
//!   depend on how the input was partitioned, up to floating-point rounding
//!   of the same order as plain summation.
//!   Reference: Chan, Golub & LeVeque (1979), "Updating Formulae and a
//!   Pairwise Algorithm for Computing Sample Variances", STAN-CS-79-773.
//!
//! # Negative CSS
//!
//! The stored CSS is never altered after the fact. Readouts treat a
//! negative CSS (only reachable through foreign or hand-built states) as
//! zero. NaN is passed through untouched.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::flat::{SlotState, ACCUMULATOR_BYTES};

/// Streaming `(count, sum, corrected sum of squares)` triple.
///
/// The field order and `#[repr(C)]` make this exactly the 24-byte flat
/// layout: `count` at offset 0, `sum` at 8, CSS at 16, native byte order.
///
/// # Examples
/// ```
/// use u_dispersion::Accumulator;
/// let mut acc = Accumulator::new();
/// for &x in &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
///     acc.update(x);
/// }
/// assert_eq!(acc.count(), 8);
/// assert!((acc.mean().unwrap() - 5.0).abs() < 1e-15);
/// assert!((acc.population_variance().unwrap() - 4.0).abs() < 1e-12);
/// assert!((acc.sample_variance().unwrap() - 4.571428571428571).abs() < 1e-12);
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Accumulator {
    count: u64,
    sum: f64,
    corrected_sum_squares: f64,
}

const _: () = assert!(std::mem::size_of::<Accumulator>() == ACCUMULATOR_BYTES);

impl Accumulator {
    /// Creates an empty accumulator.
    pub const fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            corrected_sum_squares: 0.0,
        }
    }

    /// Rebuilds an accumulator from its three fields.
    ///
    /// No validation is done; this is how states produced elsewhere are
    /// brought back in.
    pub const fn from_parts(count: u64, sum: f64, corrected_sum_squares: f64) -> Self {
        Self {
            count,
            sum,
            corrected_sum_squares,
        }
    }

    /// Folds one observation into the state.
    ///
    /// NaN and infinities are not checked; they poison the state.
    pub fn update(&mut self, value: f64) -> &mut Self {
        self.absorb(1, value, 0.0);
        self
    }

    /// Folds another state into this one. `other` may be empty.
    pub fn merge(&mut self, other: &Accumulator) -> &mut Self {
        self.absorb(other.count, other.sum, other.corrected_sum_squares);
        self
    }

    /// Consuming form of [`merge`](Self::merge).
    pub fn merged(mut self, other: &Accumulator) -> Self {
        self.merge(other);
        self
    }

    // `update` is the `(1, x, 0)` specialisation of this rule, so a merge with
    // a one-observation state is bit-identical to `update`. The count
    // saturates at `u64::MAX`.
    fn absorb(&mut self, in_count: u64, in_sum: f64, in_css: f64) {
        if in_count == 0 {
            return;
        }
        if self.count == 0 {
            self.count = in_count;
            self.sum = in_sum;
            self.corrected_sum_squares = in_css;
            return;
        }

        let n = self.count as f64;
        let m = in_count as f64;
        let diff = (m / n) * self.sum - in_sum;
        self.corrected_sum_squares += in_css + n / (m * (n + m)) * diff * diff;
        self.sum += in_sum;
        self.count = self.count.saturating_add(in_count);
    }

    /// Number of observations folded in.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Running sum of the observations.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Raw stored CSS, without the negative-value treatment of the readouts.
    pub fn corrected_sum_squares(&self) -> f64 {
        self.corrected_sum_squares
    }

    /// Returns `true` if no observations have been folded in.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the mean, or `None` for an empty state.
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    /// Returns `count − 1`, or `None` for an empty state.
    pub fn degrees_of_freedom(&self) -> Option<u64> {
        self.count.checked_sub(1)
    }

    /// Returns the sample variance `CSS / (n − 1)`, or `None` if fewer than
    /// 2 observations have been folded in.
    pub fn sample_variance(&self) -> Option<f64> {
        if self.count < 2 {
            None
        } else {
            Some(self.css_readout() / (self.count - 1) as f64)
        }
    }

    /// Returns the population variance `CSS / n`, or `None` for an empty
    /// state.
    pub fn population_variance(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.css_readout() / self.count as f64)
        }
    }

    /// Returns `√(sample variance)`, or `None` below 2 observations.
    pub fn sample_std_dev(&self) -> Option<f64> {
        self.sample_variance().map(f64::sqrt)
    }

    /// Returns `√(population variance)`, or `None` for an empty state.
    pub fn population_std_dev(&self) -> Option<f64> {
        self.population_variance().map(f64::sqrt)
    }

    /// Returns the 24-byte flat representation in native byte order.
    pub fn to_bytes(&self) -> [u8; ACCUMULATOR_BYTES] {
        bytemuck::cast(*self)
    }

    /// Reads a state from the first 24 bytes of `bytes`.
    ///
    /// The input does not need to be aligned.
    ///
    /// # Errors
    /// Returns [`StateError::BufferTooSmall`] if `bytes` is shorter than
    /// 24 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        if bytes.len() < ACCUMULATOR_BYTES {
            return Err(StateError::BufferTooSmall {
                required: ACCUMULATOR_BYTES,
                actual: bytes.len(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..ACCUMULATOR_BYTES]))
    }

    pub(crate) fn css_readout(&self) -> f64 {
        if self.corrected_sum_squares < 0.0 {
            0.0
        } else {
            self.corrected_sum_squares
        }
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Extend<f64> for Accumulator {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for x in iter {
            self.update(x);
        }
    }
}

impl FromIterator<f64> for Accumulator {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut acc = Accumulator::new();
        acc.extend(iter);
        acc
    }
}

impl SlotState for Accumulator {
    type Observation = f64;

    fn update(&mut self, observation: f64) {
        Accumulator::update(self, observation);
    }

    fn merge(&mut self, other: &Self) {
        Accumulator::merge(self, other);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TEXTBOOK: [f64; 8] = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];

    // --- update ---

    #[test]
    fn test_empty() {
        let acc = Accumulator::new();
        assert_eq!(acc.count(), 0);
        assert_eq!(acc.sum(), 0.0);
        assert_eq!(acc.corrected_sum_squares(), 0.0);
        assert!(acc.is_empty());
        assert_eq!(acc.mean(), None);
        assert_eq!(acc.degrees_of_freedom(), None);
        assert_eq!(acc.sample_variance(), None);
        assert_eq!(acc.population_variance(), None);
    }

    #[test]
    fn test_single() {
        let mut acc = Accumulator::new();
        acc.update(5.0);
        assert_eq!(acc.count(), 1);
        assert_eq!(acc.mean(), Some(5.0));
        assert_eq!(acc.degrees_of_freedom(), Some(0));
        assert_eq!(acc.sample_variance(), None);
        assert_eq!(acc.population_variance(), Some(0.0));
    }

    #[test]
    fn test_textbook_values() {
        let acc: Accumulator = TEXTBOOK.iter().copied().collect();
        assert_eq!(acc.count(), 8);
        assert_eq!(acc.sum(), 40.0);
        assert!((acc.mean().unwrap() - 5.0).abs() < 1e-15);
        assert!((acc.corrected_sum_squares() - 32.0).abs() < 1e-12);
        assert!((acc.population_variance().unwrap() - 4.0).abs() < 1e-12);
        assert!((acc.sample_variance().unwrap() - 4.571428571428571).abs() < 1e-12);
        assert!((acc.population_std_dev().unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(acc.degrees_of_freedom(), Some(7));
    }

    #[test]
    fn test_update_chains() {
        let mut acc = Accumulator::new();
        acc.update(1.0).update(2.0).update(3.0);
        assert_eq!(acc.count(), 3);
        assert_eq!(acc.sum(), 6.0);
        assert!((acc.sample_variance().unwrap() - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_variance_large_offset() {
        // Naive sum-of-squares would lose the spread entirely here.
        let acc: Accumulator = (1..=5).map(|i| 1e9 + i as f64).collect();
        let var = acc.sample_variance().unwrap();
        assert!((var - 2.5).abs() < 1e-5, "expected ~2.5, got {var}");
    }

    #[test]
    fn test_nan_poisons_state() {
        let mut acc: Accumulator = [1.0, 2.0].into_iter().collect();
        acc.update(f64::NAN);
        assert_eq!(acc.count(), 3);
        assert!(acc.sum().is_nan());
        assert!(acc.sample_variance().unwrap().is_nan());
    }

    // --- merge ---

    #[test]
    fn test_merge_matches_sequential() {
        let mut left: Accumulator = TEXTBOOK[..3].iter().copied().collect();
        let right: Accumulator = TEXTBOOK[3..].iter().copied().collect();
        left.merge(&right);

        let sequential: Accumulator = TEXTBOOK.iter().copied().collect();
        assert_eq!(left.count(), sequential.count());
        assert_eq!(left.sum(), sequential.sum());
        assert!(
            (left.corrected_sum_squares() - sequential.corrected_sum_squares()).abs() < 1e-12
        );
    }

    #[test]
    fn test_merge_empty_identity() {
        let a: Accumulator = TEXTBOOK.iter().copied().collect();

        let mut right_empty = a;
        right_empty.merge(&Accumulator::new());
        assert_eq!(right_empty, a);

        let mut left_empty = Accumulator::new();
        left_empty.merge(&a);
        assert_eq!(left_empty, a);
    }

    #[test]
    fn test_merge_two_empties() {
        let mut acc = Accumulator::new();
        acc.merge(&Accumulator::new());
        assert_eq!(acc, Accumulator::new());
    }

    #[test]
    fn test_merge_single_observation_equals_update() {
        let base: Accumulator = [3.5, -1.25, 8.0, 0.1].into_iter().collect();
        let x = 2.718281828;

        let mut updated = base;
        updated.update(x);

        let mut single = Accumulator::new();
        single.update(x);
        let mut merged = base;
        merged.merge(&single);

        assert_eq!(updated.to_bytes(), merged.to_bytes());
    }

    #[test]
    fn test_merged_consumes_copy() {
        let a: Accumulator = [1.0, 2.0].into_iter().collect();
        let b: Accumulator = [3.0, 4.0].into_iter().collect();
        let c = a.merged(&b);
        assert_eq!(c.count(), 4);
        assert_eq!(a.count(), 2);
    }

    #[test]
    fn test_merge_count_saturates() {
        let mut full = Accumulator::from_parts(u64::MAX, 1.0, 1.0);
        full.update(2.0);
        assert_eq!(full.count(), u64::MAX);
        assert_eq!(full.sum(), 3.0);

        let merged = Accumulator::from_parts(u64::MAX - 1, 0.0, 0.0).merged(&Accumulator::from_parts(5, 5.0, 0.0));
        assert_eq!(merged.count(), u64::MAX);
    }

    // --- negative CSS readout ---

    #[test]
    fn test_negative_css_reads_as_zero() {
        let acc = Accumulator::from_parts(4, 8.0, -1e-13);
        assert_eq!(acc.corrected_sum_squares(), -1e-13);
        assert_eq!(acc.sample_variance(), Some(0.0));
        assert_eq!(acc.population_variance(), Some(0.0));
    }

    // --- flat bytes ---

    #[test]
    fn test_byte_layout() {
        let acc = Accumulator::from_parts(7, 1.5, 0.25);
        let bytes = acc.to_bytes();
        assert_eq!(&bytes[0..8], &7u64.to_ne_bytes());
        assert_eq!(&bytes[8..16], &1.5f64.to_ne_bytes());
        assert_eq!(&bytes[16..24], &0.25f64.to_ne_bytes());
    }

    #[test]
    fn test_from_bytes_unaligned() {
        let acc: Accumulator = TEXTBOOK.iter().copied().collect();
        let mut buf = vec![0xAAu8; 1];
        buf.extend_from_slice(&acc.to_bytes());
        assert_eq!(Accumulator::from_bytes(&buf[1..]).unwrap(), acc);
    }

    #[test]
    fn test_from_bytes_too_small() {
        let err = Accumulator::from_bytes(&[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            StateError::BufferTooSmall {
                required: 24,
                actual: 16
            }
        );
    }

    // --- serde ---

    #[test]
    fn test_serde_json_roundtrip() {
        let acc: Accumulator = TEXTBOOK.iter().copied().collect();
        let json = serde_json::to_string(&acc).unwrap();
        let back: Accumulator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, acc);
    }
}
