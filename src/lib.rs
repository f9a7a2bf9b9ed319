//! # u-dispersion
//!
//! Mergeable variance states and the hypothesis tests built on them.
//!
//! The core is an [`Accumulator`]: the `(count, sum, corrected sum of
//! squares)` triple that summarizes a stream of observations without
//! retaining them. Accumulators built independently on separate
//! partitions merge into exactly the state a single pass would have
//! produced, up to floating-point rounding. States live either as values
//! or inside flat byte buffers owned by a host aggregation engine.
//!
//! ## Modules
//!
//! - [`accumulator`]: the streaming state, Welford update and pairwise merge
//! - [`flat`]: the 24-byte binary layout and typed views over byte spans
//! - [`multi`]: fixed- or dynamic-arity arrays of states in one buffer
//! - [`oracle`]: t, F and chi-squared CDFs behind a pluggable trait
//! - [`hypothesis`]: t-tests, F-test and chi-squared variance test
//! - [`dispersion`]: variance and standard deviation final steps
//! - [`aggregate`]: transition/merge/final driver and partitioned folds
//!
//! ## Design Philosophy
//!
//! - **Partition-independent**: merge is associative and commutative, so
//!   any reduction tree gives the same answer
//! - **Absent, not error**: too few observations yields `None`; only shape
//!   and layout disagreements are errors
//! - **Property-based testing**: merge laws verified via proptest

pub mod accumulator;
pub mod aggregate;
pub mod dispersion;
pub mod error;
pub mod flat;
pub mod hypothesis;
pub mod multi;
pub mod oracle;

pub use accumulator::Accumulator;
pub use error::StateError;
pub use flat::{FlatState, SlotState, ACCUMULATOR_BYTES};
pub use hypothesis::{
    chi_squared_variance_test, f_test, one_sample_t_test, one_sample_t_test_against,
    two_sample_pooled_t_test, two_sample_welch_t_test, ChiSquaredTest, FTest, TTest,
};
pub use multi::{Arity, Dynamic, Fixed, MultiAccumulator, TwoSample};
pub use oracle::{CdfOracle, SpecialFunctions};
