use crate::{FRAME_SHIFT, PhysicalAddress};
use core::fmt;

/// A physical frame, identified by its index (`base / FRAME_SIZE`).
///
/// The index doubles as the slot number in per-frame tables such as the
/// reference count table.
///
/// ### Invariants
/// - `base()` is always frame aligned.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let f = PhysicalFrame::from_index(0x80);
/// assert_eq!(f.base().as_u64(), 0x8_0000);
/// assert_eq!(PhysicalFrame::from_aligned(f.base()), Some(f));
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalFrame(u64);

impl PhysicalFrame {
    #[inline]
    #[must_use]
    pub const fn from_index(index: u64) -> Self {
        Self(index)
    }

    /// The frame that contains `pa` (rounds down).
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u64() >> FRAME_SHIFT)
    }

    /// The frame starting exactly at `pa`, or `None` if `pa` is not frame aligned.
    #[inline]
    #[must_use]
    pub const fn from_aligned(pa: PhysicalAddress) -> Option<Self> {
        if pa.is_frame_aligned() {
            Some(Self::containing(pa))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << FRAME_SHIFT)
    }

    /// Frame index as a table slot.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalFrame(#{} @ {:#018X})", self.0, self.base().as_u64())
    }
}

impl fmt::Display for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.base(), f)
    }
}
