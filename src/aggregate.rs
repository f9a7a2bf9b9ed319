//! Host aggregation driver.
//!
//! A database engine drives a user-defined aggregate through three calls:
//! a transition per input row, a merge per pair of partial results, and a
//! final step per group. States travel between the calls as raw byte
//! buffers. The functions here implement that protocol over the flat
//! layouts of [`crate::flat`] and [`crate::multi`].
//!
//! | Aggregate | Transition | Merge | Final |
//! |---|---|---|---|
//! | `var_pop` | [`css_transition`] | [`css_merge`] | [`var_pop_final`] |
//! | one-sample t | [`css_transition`] | [`css_merge`] | [`t_test_one_final`] |
//! | two-sample t, F | [`two_sample_transition`] | [`two_sample_merge`] | [`t_test_two_pooled_final`], [`t_test_two_unpooled_final`], [`f_test_final`] |
//!
//! [`partitioned_accumulate`] and [`partitioned_group_accumulate`] run the
//! same protocol in-process: each rayon task folds its own partition with
//! no shared state, then partial states are merged by a reduction tree.

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::accumulator::Accumulator;
use crate::error::StateError;
use crate::flat::{FlatState, ACCUMULATOR_BYTES};
use crate::hypothesis::{self, FTest, TTest};
use crate::multi::{Dynamic, MultiAccumulator, TwoSample};

/// Per-group states laid out behind a slot-count header.
pub type GroupStates = MultiAccumulator<Accumulator, Dynamic>;

/// Folds `x` into a single-sample state, allocating it on the first row.
///
/// # Examples
/// ```
/// use u_dispersion::aggregate::{css_transition, var_pop_final};
/// let mut state = None;
/// for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
///     state = Some(css_transition(state, x).unwrap());
/// }
/// let var = var_pop_final(&state.unwrap()).unwrap().unwrap();
/// assert!((var - 4.0).abs() < 1e-12);
/// ```
///
/// # Errors
/// Returns [`StateError::BufferTooSmall`] if a supplied state is shorter
/// than one accumulator.
pub fn css_transition(state: Option<Vec<u8>>, x: f64) -> Result<Vec<u8>, StateError> {
    let mut bytes = state.unwrap_or_else(|| {
        debug!(bytes = ACCUMULATOR_BYTES, "allocating accumulator state");
        vec![0; ACCUMULATOR_BYTES]
    });
    FlatState::<Accumulator, _>::new(&mut bytes[..])?.update(x);
    Ok(bytes)
}

/// Merges the partial state `right` into `left`.
pub fn css_merge(mut left: Vec<u8>, right: &[u8]) -> Result<Vec<u8>, StateError> {
    let other = Accumulator::from_bytes(right)?;
    FlatState::<Accumulator, _>::new(&mut left[..])?.merge(&other);
    Ok(left)
}

/// Population variance of a completed single-sample state.
pub fn var_pop_final(state: &[u8]) -> Result<Option<f64>, StateError> {
    Ok(Accumulator::from_bytes(state)?.population_variance())
}

/// One-sample t-test of a completed single-sample state.
pub fn t_test_one_final(state: &[u8]) -> Result<Option<TTest>, StateError> {
    Ok(hypothesis::one_sample_t_test(&Accumulator::from_bytes(state)?))
}

/// Folds `x` into sample X (`first_sample`) or Y of a two-sample state,
/// allocating it on the first row.
pub fn two_sample_transition(state: Option<Vec<u8>>, first_sample: bool, x: f64) -> Result<Vec<u8>, StateError> {
    let mut bytes = match state {
        Some(bytes) => bytes,
        None => {
            debug!("allocating two-sample state");
            TwoSample::zeroed(2)?.into_inner()
        }
    };
    let slot = if first_sample { 0 } else { 1 };
    TwoSample::<&mut [u8]>::attach(&mut bytes[..])?.update(slot, x)?;
    Ok(bytes)
}

/// Merges the partial two-sample state `right` into `left`.
pub fn two_sample_merge(mut left: Vec<u8>, right: &[u8]) -> Result<Vec<u8>, StateError> {
    let other = TwoSample::<&[u8]>::attach(right)?;
    TwoSample::<&mut [u8]>::attach(&mut left[..])?.merge(&other)?;
    Ok(left)
}

/// Pooled two-sample t-test of a completed two-sample state.
pub fn t_test_two_pooled_final(state: &[u8]) -> Result<Option<TTest>, StateError> {
    Ok(TwoSample::<&[u8]>::attach(state)?.pooled_t_test())
}

/// Welch two-sample t-test of a completed two-sample state.
pub fn t_test_two_unpooled_final(state: &[u8]) -> Result<Option<TTest>, StateError> {
    Ok(TwoSample::<&[u8]>::attach(state)?.welch_t_test())
}

/// F-test of a completed two-sample state.
pub fn f_test_final(state: &[u8]) -> Result<Option<FTest>, StateError> {
    Ok(TwoSample::<&[u8]>::attach(state)?.f_test())
}

/// Accumulates `data` split into `partitions` contiguous partitions, one
/// rayon task each, then merges the partial states.
///
/// # Errors
/// Returns [`StateError::InvalidParameter`] if `partitions` is zero.
pub fn partitioned_accumulate(data: &[f64], partitions: usize) -> Result<Accumulator, StateError> {
    let chunk = partition_len(data.len(), partitions)?;
    let total = data
        .par_chunks(chunk)
        .map(|part| {
            let acc: Accumulator = part.iter().copied().collect();
            trace!(rows = part.len(), "partition folded");
            acc
        })
        .reduce(Accumulator::new, |left, right| left.merged(&right));
    debug!(partitions, count = total.count(), "partitioned accumulation finished");
    Ok(total)
}

/// Accumulates `(group, x)` rows into `slot_count` per-group states,
/// partitioned like [`partitioned_accumulate`].
///
/// # Errors
/// Returns [`StateError::InvalidParameter`] if `partitions` is zero, or
/// [`StateError::SlotOutOfRange`] for a row whose group is not below
/// `slot_count`.
pub fn partitioned_group_accumulate(
    rows: &[(usize, f64)],
    slot_count: usize,
    partitions: usize,
) -> Result<GroupStates, StateError> {
    let chunk = partition_len(rows.len(), partitions)?;
    let empty = GroupStates::zeroed(slot_count)?;
    let total = rows
        .par_chunks(chunk)
        .map(|part| {
            let mut groups = empty.clone();
            for &(group, x) in part {
                groups.update(group, x)?;
            }
            trace!(rows = part.len(), "partition folded");
            Ok(groups)
        })
        .try_reduce(
            || empty.clone(),
            |mut left, right| {
                left.merge(&right)?;
                Ok(left)
            },
        )?;
    debug!(partitions, slot_count, rows = rows.len(), "partitioned group accumulation finished");
    Ok(total)
}

fn partition_len(rows: usize, partitions: usize) -> Result<usize, StateError> {
    if partitions == 0 {
        tracing::warn!("partition count must be positive");
        return Err(StateError::InvalidParameter("partition count must be positive".into()));
    }
    Ok(rows.div_ceil(partitions).max(1))
}
