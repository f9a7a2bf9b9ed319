//! Flat binary layout of accumulator states.
//!
//! A state lives in a contiguous byte span owned by someone else (a host
//! engine, a network frame, a memory map). [`FlatState`] is a typed view
//! over such a span: the span length is checked once at construction, and
//! field access afterwards cannot fail.
//!
//! # Layout
//!
//! | Bytes | Field | Type |
//! |---|---|---|
//! | `[0, 8)` | `count` | `u64` |
//! | `[8, 16)` | `sum` | `f64` |
//! | `[16, 24)` | `corrected_sum_squares` | `f64` |
//!
//! All fields use native byte order. Spans need not be aligned; reads and
//! writes go through unaligned copies. When a span happens to be aligned,
//! [`FlatState::view_mut`] hands out a direct `&mut` to the slot value.

use std::marker::PhantomData;

use bytemuck::Pod;

use crate::accumulator::Accumulator;
use crate::error::StateError;

/// Size of one [`Accumulator`] block.
pub const ACCUMULATOR_BYTES: usize = 24;
/// Offset of the `u64` observation count.
pub const COUNT_OFFSET: usize = 0;
/// Offset of the `f64` running sum.
pub const SUM_OFFSET: usize = 8;
/// Offset of the `f64` corrected sum of squares.
pub const CSS_OFFSET: usize = 16;

/// A value that can occupy one slot of a flat state buffer.
///
/// `Pod` supplies the rest of the slot contract: the all-zero byte pattern
/// is the empty state, and the byte size is `size_of::<Self>()`.
pub trait SlotState: Pod {
    /// What a single `update` consumes.
    type Observation;

    /// Size of one slot in bytes.
    const BYTES: usize = std::mem::size_of::<Self>();

    /// Folds one observation into the state.
    fn update(&mut self, observation: Self::Observation);

    /// Folds another state of the same kind into this one.
    fn merge(&mut self, other: &Self);

    /// The empty state.
    fn zero() -> Self {
        Self::zeroed()
    }
}

/// Typed view of one slot value over a byte span `B`.
///
/// `B` is typically `&[u8]` (read-only), `&mut [u8]` (in place), or
/// `Vec<u8>` (owned).
///
/// # Examples
/// ```
/// use u_dispersion::{Accumulator, FlatState};
/// let mut buf = vec![0u8; 24];
/// let mut state = FlatState::<Accumulator, _>::new(&mut buf[..]).unwrap();
/// state.update(1.0).update(2.0).update(3.0);
/// assert_eq!(state.count(), 3);
/// assert_eq!(state.sum(), 6.0);
/// assert_eq!(Accumulator::from_bytes(&buf).unwrap().count(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct FlatState<S, B> {
    bytes: B,
    _slot: PhantomData<S>,
}

impl<S: SlotState, B: AsRef<[u8]>> FlatState<S, B> {
    /// Wraps `bytes`, checking that it can hold one `S`.
    ///
    /// Only the first `S::BYTES` bytes are used.
    ///
    /// # Errors
    /// Returns [`StateError::BufferTooSmall`] if the span is too short.
    pub fn new(bytes: B) -> Result<Self, StateError> {
        let actual = bytes.as_ref().len();
        if actual < S::BYTES {
            tracing::warn!(required = S::BYTES, actual, "flat state buffer too small");
            return Err(StateError::BufferTooSmall {
                required: S::BYTES,
                actual,
            });
        }
        Ok(Self {
            bytes,
            _slot: PhantomData,
        })
    }

    /// Copies the slot value out of the span.
    pub fn load(&self) -> S {
        bytemuck::pod_read_unaligned(self.as_bytes())
    }

    /// Borrows the slot value in place, if the span is suitably aligned.
    pub fn view(&self) -> Option<&S> {
        bytemuck::try_from_bytes(self.as_bytes()).ok()
    }

    /// The `S::BYTES` bytes backing this slot.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes.as_ref()[..S::BYTES]
    }

    /// Returns the backing span.
    pub fn into_inner(self) -> B {
        self.bytes
    }
}

impl<S: SlotState, B: AsRef<[u8]> + AsMut<[u8]>> FlatState<S, B> {
    /// Overwrites the slot with `value`.
    pub fn store(&mut self, value: &S) {
        self.bytes_mut().copy_from_slice(bytemuck::bytes_of(value));
    }

    /// Resets the slot to the empty state.
    pub fn set_zero(&mut self) {
        self.bytes_mut().fill(0);
    }

    /// Folds one observation into the stored state.
    pub fn update(&mut self, observation: S::Observation) -> &mut Self {
        match self.view_mut() {
            Some(slot) => slot.update(observation),
            None => {
                let mut value = self.load();
                value.update(observation);
                self.store(&value);
            }
        }
        self
    }

    /// Folds `other` into the stored state.
    pub fn merge(&mut self, other: &S) -> &mut Self {
        match self.view_mut() {
            Some(slot) => slot.merge(other),
            None => {
                let mut value = self.load();
                value.merge(other);
                self.store(&value);
            }
        }
        self
    }

    /// Mutably borrows the slot value in place, if the span is suitably
    /// aligned.
    pub fn view_mut(&mut self) -> Option<&mut S> {
        bytemuck::try_from_bytes_mut(self.bytes_mut()).ok()
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes.as_mut()[..S::BYTES]
    }
}

impl<S: SlotState> FlatState<S, Vec<u8>> {
    /// Allocates an owned, zeroed (empty) state.
    pub fn zeroed() -> Self {
        Self {
            bytes: vec![0; S::BYTES],
            _slot: PhantomData,
        }
    }
}

impl<B: AsRef<[u8]>> FlatState<Accumulator, B> {
    /// Reads the `u64` count at [`COUNT_OFFSET`].
    pub fn count(&self) -> u64 {
        self.read_field(COUNT_OFFSET)
    }

    /// Reads the `f64` sum at [`SUM_OFFSET`].
    pub fn sum(&self) -> f64 {
        self.read_field(SUM_OFFSET)
    }

    /// Reads the raw `f64` CSS at [`CSS_OFFSET`].
    pub fn corrected_sum_squares(&self) -> f64 {
        self.read_field(CSS_OFFSET)
    }

    fn read_field<T: Pod>(&self, offset: usize) -> T {
        let end = offset + std::mem::size_of::<T>();
        bytemuck::pod_read_unaligned(&self.bytes.as_ref()[offset..end])
    }
}
