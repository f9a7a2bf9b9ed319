//! Dispersion final steps.
//!
//! These turn a completed [`Accumulator`] into a single reportable number.
//! Below the minimum count the result is `None`, the same as an aggregate
//! over no rows.

use crate::accumulator::Accumulator;

/// Population variance `CSS / n`. Absent for an empty state.
///
/// # Examples
/// ```
/// use u_dispersion::{dispersion, Accumulator};
/// let acc: Accumulator = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter().collect();
/// let var = dispersion::population_variance_final(&acc).unwrap();
/// assert!((var - 4.0).abs() < 1e-12);
/// assert_eq!(dispersion::population_variance_final(&Accumulator::new()), None);
/// ```
pub fn population_variance_final(acc: &Accumulator) -> Option<f64> {
    acc.population_variance()
}

/// Sample variance `CSS / (n − 1)`. Absent below 2 observations.
pub fn sample_variance_final(acc: &Accumulator) -> Option<f64> {
    acc.sample_variance()
}

/// Population standard deviation. Absent for an empty state.
pub fn population_std_dev_final(acc: &Accumulator) -> Option<f64> {
    acc.population_std_dev()
}

/// Sample standard deviation. Absent below 2 observations.
pub fn sample_std_dev_final(acc: &Accumulator) -> Option<f64> {
    acc.sample_std_dev()
}
