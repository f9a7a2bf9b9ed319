//! Arrays of slot states sharing one flat buffer.
//!
//! A [`MultiAccumulator`] lays `slot_count` slot values end to end, after
//! an optional header:
//!
//! - [`Fixed<N>`]: no header. The buffer is exactly `N` blocks and any
//!   runtime slot count must equal `N`.
//! - [`Dynamic`]: an 8-byte native-endian `u64` header holding the slot
//!   count, then the blocks.
//!
//! The slot count never changes for the lifetime of a buffer. Two states
//! merge only when their slot counts agree; growing a state means laying
//! out a new, larger buffer.

use std::marker::PhantomData;

use crate::accumulator::Accumulator;
use crate::error::StateError;
use crate::flat::{FlatState, SlotState};

/// Size of the slot-count header of a [`Dynamic`] layout.
pub const DYNAMIC_HEADER_BYTES: usize = 8;

/// Compile-time or buffer-stored slot count.
pub trait Arity {
    /// `Some(n)` when the slot count is fixed at compile time.
    const FIXED: Option<usize>;
    /// Bytes in front of the first slot.
    const HEADER_BYTES: usize;
}

/// Exactly `N` slots, no header.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fixed<const N: usize>;

impl<const N: usize> Arity for Fixed<N> {
    const FIXED: Option<usize> = Some(N);
    const HEADER_BYTES: usize = 0;
}

/// Slot count stored in a leading `u64` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dynamic;

impl Arity for Dynamic {
    const FIXED: Option<usize> = None;
    const HEADER_BYTES: usize = DYNAMIC_HEADER_BYTES;
}

/// `slot_count` states of type `S` inside one buffer `B`.
///
/// # Examples
/// ```
/// use u_dispersion::{Accumulator, Dynamic, MultiAccumulator};
/// let mut groups = MultiAccumulator::<Accumulator, Dynamic>::zeroed(3).unwrap();
/// for (group, x) in [(0, 1.0), (2, 5.0), (0, 3.0), (1, 4.0)] {
///     groups.update(group, x).unwrap();
/// }
/// assert_eq!(groups.slot(0).count(), 2);
/// assert_eq!(groups.slot(0).sum(), 4.0);
/// assert_eq!(groups.as_bytes().len(), 8 + 3 * 24);
/// ```
#[derive(Debug, Clone)]
pub struct MultiAccumulator<S, A, B = Vec<u8>> {
    bytes: B,
    slot_count: usize,
    _layout: PhantomData<(S, A)>,
}

/// Two-sample state: slot 0 holds sample X, slot 1 sample Y.
pub type TwoSample<B = Vec<u8>> = MultiAccumulator<Accumulator, Fixed<2>, B>;

impl<S: SlotState, A: Arity, B> MultiAccumulator<S, A, B> {
    /// Number of bytes a layout of `slot_count` slots occupies.
    ///
    /// # Errors
    /// Returns [`StateError::ArityMismatch`] if `A` is fixed and
    /// `slot_count` differs from it.
    pub fn required_bytes(slot_count: usize) -> Result<usize, StateError> {
        check_arity::<A>(slot_count)?;
        Ok(layout_bytes::<S, A>(slot_count))
    }

    /// Number of slots in the layout.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Returns the backing buffer.
    pub fn into_inner(self) -> B {
        self.bytes
    }

    fn offset(&self, index: usize) -> Result<usize, StateError> {
        if index >= self.slot_count {
            return Err(StateError::SlotOutOfRange {
                index,
                slot_count: self.slot_count,
            });
        }
        Ok(A::HEADER_BYTES + index * S::BYTES)
    }
}

impl<S: SlotState, A: Arity> MultiAccumulator<S, A, Vec<u8>> {
    /// Allocates an owned buffer of `slot_count` empty slots.
    ///
    /// # Errors
    /// Returns [`StateError::ArityMismatch`] if `A` is fixed and
    /// `slot_count` differs from it.
    pub fn zeroed(slot_count: usize) -> Result<Self, StateError> {
        let len = Self::required_bytes(slot_count)?;
        Self::init(vec![0; len], slot_count)
    }
}

impl<S: SlotState, A: Arity, B: AsRef<[u8]>> MultiAccumulator<S, A, B> {
    /// Views an already laid-out buffer.
    ///
    /// The slot count comes from `A` when fixed, otherwise from the header.
    ///
    /// # Errors
    /// Returns [`StateError::BufferTooSmall`] if the buffer cannot hold the
    /// header or the slots it announces.
    pub fn attach(bytes: B) -> Result<Self, StateError> {
        let slot_count = match A::FIXED {
            Some(n) => n,
            None => read_header(bytes.as_ref())?,
        };
        check_len(bytes.as_ref().len(), layout_bytes::<S, A>(slot_count))?;
        Ok(Self {
            bytes,
            slot_count,
            _layout: PhantomData,
        })
    }

    /// Read-only view of slot `index`.
    ///
    /// # Errors
    /// Returns [`StateError::SlotOutOfRange`] if `index >= slot_count`.
    pub fn try_slot(&self, index: usize) -> Result<FlatState<S, &[u8]>, StateError> {
        let start = self.offset(index)?;
        FlatState::new(&self.bytes.as_ref()[start..start + S::BYTES])
    }

    /// Read-only view of slot `index`.
    ///
    /// # Panics
    /// Panics if `index >= slot_count`.
    pub fn slot(&self, index: usize) -> FlatState<S, &[u8]> {
        match self.try_slot(index) {
            Ok(slot) => slot,
            Err(err) => panic!("{err}"),
        }
    }

    /// Copies of every slot value, in index order.
    pub fn slots(&self) -> impl Iterator<Item = S> + '_ {
        (0..self.slot_count).map(move |i| self.slot(i).load())
    }

    /// Copies every slot value out, in slot order.
    pub fn to_vec(&self) -> Vec<S> {
        self.slots().collect()
    }

    /// The header and slot bytes, excluding any trailing buffer space.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes.as_ref()[..layout_bytes::<S, A>(self.slot_count)]
    }
}

impl<S: SlotState, A: Arity, B: AsRef<[u8]> + AsMut<[u8]>> MultiAccumulator<S, A, B> {
    /// Lays out `slot_count` empty slots over `bytes`, writing the header
    /// for a [`Dynamic`] layout.
    ///
    /// # Errors
    /// Returns [`StateError::ArityMismatch`] for a fixed arity other than
    /// `slot_count`, or [`StateError::BufferTooSmall`] if the buffer is
    /// too short.
    pub fn init(mut bytes: B, slot_count: usize) -> Result<Self, StateError> {
        let required = Self::required_bytes(slot_count)?;
        check_len(bytes.as_ref().len(), required)?;

        let buf = &mut bytes.as_mut()[..required];
        buf.fill(0);
        if A::FIXED.is_none() {
            buf[..DYNAMIC_HEADER_BYTES].copy_from_slice(&(slot_count as u64).to_ne_bytes());
        }
        Ok(Self {
            bytes,
            slot_count,
            _layout: PhantomData,
        })
    }

    /// Mutable view of slot `index`.
    ///
    /// # Errors
    /// Returns [`StateError::SlotOutOfRange`] if `index >= slot_count`.
    pub fn try_slot_mut(&mut self, index: usize) -> Result<FlatState<S, &mut [u8]>, StateError> {
        let start = self.offset(index)?;
        FlatState::new(&mut self.bytes.as_mut()[start..start + S::BYTES])
    }

    /// Mutable view of slot `index`.
    ///
    /// # Panics
    /// Panics if `index >= slot_count`.
    pub fn slot_mut(&mut self, index: usize) -> FlatState<S, &mut [u8]> {
        match self.try_slot_mut(index) {
            Ok(slot) => slot,
            Err(err) => panic!("{err}"),
        }
    }

    /// Routes one observation to slot `index`.
    ///
    /// # Errors
    /// Returns [`StateError::SlotOutOfRange`] if `index >= slot_count`.
    pub fn update(&mut self, index: usize, observation: S::Observation) -> Result<(), StateError> {
        self.try_slot_mut(index)?.update(observation);
        Ok(())
    }

    /// Merges `other` into `self` slot by slot.
    ///
    /// # Errors
    /// Returns [`StateError::ShapeMismatch`] if the slot counts differ;
    /// `self` is left untouched in that case.
    pub fn merge<A2: Arity, B2: AsRef<[u8]>>(
        &mut self,
        other: &MultiAccumulator<S, A2, B2>,
    ) -> Result<(), StateError> {
        if self.slot_count != other.slot_count() {
            tracing::warn!(
                left = self.slot_count,
                right = other.slot_count(),
                "refusing to merge states of different shape"
            );
            return Err(StateError::ShapeMismatch {
                left: self.slot_count,
                right: other.slot_count(),
            });
        }
        for (index, value) in other.slots().enumerate() {
            self.slot_mut(index).merge(&value);
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]>> MultiAccumulator<Accumulator, Fixed<2>, B> {
    /// The `(x, y)` sample states.
    pub fn pair(&self) -> (Accumulator, Accumulator) {
        (self.slot(0).load(), self.slot(1).load())
    }
}

fn layout_bytes<S: SlotState, A: Arity>(slot_count: usize) -> usize {
    slot_count
        .saturating_mul(S::BYTES)
        .saturating_add(A::HEADER_BYTES)
}

fn check_arity<A: Arity>(slot_count: usize) -> Result<(), StateError> {
    match A::FIXED {
        Some(expected) if expected != slot_count => {
            tracing::warn!(expected, actual = slot_count, "slot count does not match fixed arity");
            Err(StateError::ArityMismatch {
                expected,
                actual: slot_count,
            })
        }
        _ => Ok(()),
    }
}

fn check_len(actual: usize, required: usize) -> Result<(), StateError> {
    if actual < required {
        tracing::warn!(required, actual, "multi-slot state buffer too small");
        return Err(StateError::BufferTooSmall { required, actual });
    }
    Ok(())
}

fn read_header(bytes: &[u8]) -> Result<usize, StateError> {
    check_len(bytes.len(), DYNAMIC_HEADER_BYTES)?;
    let raw: u64 = bytemuck::pod_read_unaligned(&bytes[..DYNAMIC_HEADER_BYTES]);
    // An unrepresentable count can never fit in memory anyway.
    Ok(usize::try_from(raw).unwrap_or(usize::MAX))
}
