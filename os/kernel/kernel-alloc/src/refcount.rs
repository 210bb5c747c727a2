//! Per-frame reference counts.
//!
//! One counter per frame slot in `[0, FRAMES)`, i.e. for the whole physical
//! range from address zero, including the kernel image whose slots are simply
//! never touched after boot.
//!
//! The table itself is not synchronized; the allocator keeps it behind its
//! `"ref"` lock.

use kernel_memory_addresses::PhysicalFrame;

/// `count == 0` iff the frame is on the free list (or was never handed to the
/// allocator). `count >= 1` is the number of mappings sharing the frame.
pub struct RefCountTable<const FRAMES: usize> {
    counts: [u32; FRAMES],
}

impl<const FRAMES: usize> RefCountTable<FRAMES> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counts: [0; FRAMES],
        }
    }

    #[inline]
    fn slot(frame: PhysicalFrame) -> usize {
        let i = frame.index();
        assert!(
            i < FRAMES,
            "refcount: {frame:?} is outside the {}-slot table",
            FRAMES
        );
        i
    }

    #[inline]
    #[must_use]
    pub fn get(&self, frame: PhysicalFrame) -> u32 {
        self.counts[Self::slot(frame)]
    }

    /// Force the count, used when a frame is claimed fresh or seeded at boot.
    #[inline]
    pub fn set(&mut self, frame: PhysicalFrame, value: u32) {
        self.counts[Self::slot(frame)] = value;
    }

    /// Add one sharer and return the new count. Overflow is not guarded.
    #[inline]
    pub fn increment(&mut self, frame: PhysicalFrame) -> u32 {
        let c = &mut self.counts[Self::slot(frame)];
        *c = c.wrapping_add(1);
        *c
    }

    /// Drop one sharer; `true` if that was the last one.
    ///
    /// # Panics
    /// If the count is already zero: the frame is free and someone released
    /// it again.
    #[inline]
    pub fn decrement_and_test(&mut self, frame: PhysicalFrame) -> bool {
        let c = &mut self.counts[Self::slot(frame)];
        assert!(*c > 0, "refcount: underflow on {frame:?} (double free?)");
        *c -= 1;
        *c == 0
    }
}

impl<const FRAMES: usize> Default for RefCountTable<FRAMES> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F: PhysicalFrame = PhysicalFrame::from_index(3);

    #[test]
    fn starts_at_zero() {
        let t = RefCountTable::<8>::new();
        for i in 0..8 {
            assert_eq!(t.get(PhysicalFrame::from_index(i)), 0);
        }
    }

    #[test]
    fn increment_then_decrement_reports_last_reference() {
        let mut t = RefCountTable::<8>::new();
        t.set(F, 1);
        assert_eq!(t.increment(F), 2);
        assert!(!t.decrement_and_test(F));
        assert!(t.decrement_and_test(F));
        assert_eq!(t.get(F), 0);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn decrement_at_zero_panics() {
        let mut t = RefCountTable::<8>::new();
        t.decrement_and_test(F);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn out_of_table_panics() {
        let t = RefCountTable::<8>::new();
        let _ = t.get(PhysicalFrame::from_index(8));
    }
}
