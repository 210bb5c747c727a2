//! LIFO list of free frames.
//!
//! Links live in a side table indexed by frame, not in the free frames
//! themselves, so a free frame's bytes are never read or interpreted. Both
//! `push` and `pop` are O(1).
//!
//! The allocator keeps the list behind its `"kmem"` lock.

use kernel_memory_addresses::PhysicalFrame;

/// Link terminator.
const NIL: u32 = u32::MAX;

/// `next` value of a frame that is not on the list.
const UNLINKED: u32 = u32::MAX - 1;

pub struct FrameFreeList<const FRAMES: usize> {
    /// Most recently freed frame, or `NIL`.
    head: u32,
    /// `next[i]` is the frame after frame `i`, or `UNLINKED` if `i` is not free.
    next: [u32; FRAMES],
    len: usize,
}

impl<const FRAMES: usize> FrameFreeList<FRAMES> {
    #[must_use]
    pub const fn new() -> Self {
        assert!(
            FRAMES < UNLINKED as usize,
            "free list: frame index must fit in u32"
        );
        Self {
            head: NIL,
            next: [UNLINKED; FRAMES],
            len: 0,
        }
    }

    /// Make `frame` the new head.
    ///
    /// # Panics
    /// If the frame is outside the table or already on the list.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, frame: PhysicalFrame) {
        let i = frame.index();
        assert!(i < FRAMES, "free list: {frame:?} is outside the table");
        assert!(
            self.next[i] == UNLINKED,
            "free list: {frame:?} is already free"
        );
        self.next[i] = self.head;
        self.head = i as u32;
        self.len += 1;
    }

    /// Remove and return the head; `None` when empty.
    pub fn pop(&mut self) -> Option<PhysicalFrame> {
        if self.head == NIL {
            return None;
        }
        let i = self.head as usize;
        self.head = self.next[i];
        self.next[i] = UNLINKED;
        self.len -= 1;
        Some(PhysicalFrame::from_index(i as u64))
    }

    /// Whether `frame` is on the list. Frames outside the table never are.
    #[inline]
    #[must_use]
    pub fn contains(&self, frame: PhysicalFrame) -> bool {
        self.next
            .get(frame.index())
            .is_some_and(|&link| link != UNLINKED)
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head == NIL
    }

    /// Walk the list from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = PhysicalFrame> + '_ {
        let mut cur = self.head;
        core::iter::from_fn(move || {
            if cur == NIL {
                return None;
            }
            let i = cur as usize;
            cur = self.next[i];
            Some(PhysicalFrame::from_index(i as u64))
        })
    }
}

impl<const FRAMES: usize> Default for FrameFreeList<FRAMES> {
    fn default() -> Self {
        Self::new()
    }
}
