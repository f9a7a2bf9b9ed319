//! Error type for state construction and combination.
//!
//! Only configuration errors live here. A count too low for the requested
//! statistic is not an error: final steps return `None` for that case.

use thiserror::Error;

/// Configuration errors raised while laying out, attaching, or combining
/// accumulator states.
///
/// None of these are retried. They mean two partial aggregations (or a
/// state and its buffer) disagree about shape and cannot be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A runtime slot count differs from the compile-time arity.
    #[error("arity mismatch: state has fixed arity {expected}, got {actual} slots")]
    ArityMismatch { expected: usize, actual: usize },

    /// Two multi-slot states with different slot counts were merged.
    #[error("shape mismatch: cannot merge {left}-slot state with {right}-slot state")]
    ShapeMismatch { left: usize, right: usize },

    /// The backing buffer is shorter than the layout requires.
    #[error("buffer too small: layout requires {required} bytes, buffer has {actual}")]
    BufferTooSmall { required: usize, actual: usize },

    /// A slot index is outside `0..slot_count`.
    #[error("slot {index} out of range for {slot_count}-slot state")]
    SlotOutOfRange { index: usize, slot_count: usize },

    /// A hypothesis-test parameter is outside its domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
