//! # Physical Frame Allocator
//!
//! Hands out 4 KiB frames from `[kernel_end, phys_ceiling)` and takes them
//! back once the last sharer lets go.
//!
//! ## State
//! - a [`FrameFreeList`] behind the `"kmem"` lock,
//! - a [`RefCountTable`] behind the `"ref"` lock.
//!
//! A managed frame has a count of zero iff it is on the free list.
//!
//! ## Lock order
//! ```text
//! alloc_frame:  kmem ──► ref (nested) ──► release ref ──► release kmem
//! free_frame:   ref ──► release ref ──► kmem (only if the count hit zero)
//! ```
//! `free_frame` never holds `ref` while waiting for `kmem`, and nothing takes
//! `kmem` while holding `ref`, so the two paths cannot deadlock.
//!
//! ## Fill patterns
//! Freshly allocated frames are filled with [`ALLOC_JUNK`], released frames
//! with [`FREE_JUNK`]. Neither is zero: code that reads memory it never wrote
//! sees garbage instead of plausible zeroes.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::frame_alloc::{ALLOC_JUNK, FrameAllocator};
//! use kernel_alloc::phys_mapper::SimulatedRam;
//! use kernel_info::memory::MemoryLayout;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::{FrameAlloc, PhysMapper};
//!
//! let layout = MemoryLayout {
//!     kernel_end: PhysicalAddress::new(0x10_0000),
//!     phys_ceiling: PhysicalAddress::new(0x10_8000),
//!     ..MemoryLayout::DEFAULT
//! };
//! let ram = SimulatedRam::covering(&layout);
//! let frames = FrameAllocator::<_, 0x108>::new(layout, &ram);
//! assert_eq!(frames.init(), 8);
//!
//! let f = frames.alloc_frame().unwrap();
//! assert_eq!(frames.refcount(f), 1);
//! assert!(unsafe { ram.frame_bytes(f) }.iter().all(|&b| b == ALLOC_JUNK));
//!
//! frames.free_frame(f.base());
//! assert_eq!(frames.free_frames(), 8);
//! ```

use crate::cow::CowResolver;
use crate::free_list::FrameFreeList;
use crate::phys_mapper::HhdmPhysMapper;
use crate::refcount::RefCountTable;
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_info::memory::{LayoutError, MemoryLayout, PHYS_FRAME_SLOTS};
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame};
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, PhysMapper};

/// Byte written over every frame handed out by [`FrameAllocator::alloc_frame`].
pub const ALLOC_JUNK: u8 = 5;

/// Byte written over every frame returned to the free list.
pub const FREE_JUNK: u8 = 1;

/// The allocator the kernel runs on: direct-mapped memory, table sized for
/// the default layout.
pub type KernelFrameAllocator = FrameAllocator<HhdmPhysMapper, PHYS_FRAME_SLOTS>;

/// Reference-counted physical frame allocator.
///
/// `FRAMES` is the number of table slots; it must cover every frame below
/// `layout.phys_ceiling`.
pub struct FrameAllocator<M: PhysMapper, const FRAMES: usize = PHYS_FRAME_SLOTS> {
    layout: MemoryLayout,
    mapper: M,
    free: SpinLock<FrameFreeList<FRAMES>>,
    refs: SpinLock<RefCountTable<FRAMES>>,
    /// Frames handed over by `init_range` so far.
    seeded: AtomicUsize,
}

impl<M: PhysMapper, const FRAMES: usize> FrameAllocator<M, FRAMES> {
    /// An empty allocator; nothing is allocatable until [`init`](Self::init)
    /// or [`init_range`](Self::init_range) runs.
    ///
    /// Usable in a `static`.
    ///
    /// # Panics
    /// If `layout` does not validate against a `FRAMES`-slot table.
    #[must_use]
    pub const fn new(layout: MemoryLayout, mapper: M) -> Self {
        assert!(
            layout.validate(FRAMES).is_ok(),
            "frame allocator: memory layout does not fit the frame table"
        );
        Self {
            layout,
            mapper,
            free: SpinLock::new("kmem", FrameFreeList::new()),
            refs: SpinLock::new("ref", RefCountTable::new()),
            seeded: AtomicUsize::new(0),
        }
    }

    /// Like [`new`](Self::new), reporting a bad layout instead of panicking.
    ///
    /// # Errors
    /// See [`LayoutError`].
    pub fn try_new(layout: MemoryLayout, mapper: M) -> Result<Self, LayoutError> {
        layout.validate(FRAMES)?;
        Ok(Self::new(layout, mapper))
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// The copy-on-write fault path bound to this allocator.
    #[inline]
    #[must_use]
    pub const fn cow(&self) -> CowResolver<'_, M, FRAMES> {
        CowResolver::new(self)
    }

    /// Seed the free list with every whole frame between the end of the kernel
    /// image and the physical ceiling. Returns the number of frames added.
    pub fn init(&self) -> usize {
        self.init_range(self.layout.kernel_end, self.layout.phys_ceiling)
    }

    /// Seed the free list with every whole frame in `[start, end)`, `start`
    /// rounded up to a frame boundary. Returns the number of frames added.
    ///
    /// Each frame goes through [`free_frame`](Self::free_frame) with its count
    /// forced to one, so it is scrubbed and pushed exactly like a frame
    /// released at runtime. The last frame seeded is the first one allocated.
    ///
    /// Meant for boot: the frames must not have been seeded before. A frame
    /// seeded while allocated would have its count clobbered.
    ///
    /// # Panics
    /// If any frame in the range is outside the managed range (see
    /// [`free_frame`](Self::free_frame)) or already on the free list.
    pub fn init_range(&self, start: PhysicalAddress, end: PhysicalAddress) -> usize {
        let mut pa = start.frame_ceil();
        let mut seeded = 0;
        while pa.as_u64() + FRAME_SIZE <= end.as_u64() {
            let frame = pa.frame();
            assert!(
                !self.free.lock().contains(frame),
                "init_range: {frame} is already free"
            );
            self.refs.lock().set(frame, 1);
            self.free_frame(pa);
            pa += FRAME_SIZE;
            seeded += 1;
        }
        self.seeded.fetch_add(seeded, Ordering::Relaxed);

        log::info!(
            "frame allocator: seeded {seeded} frames from [{start}, {end}), {} free",
            self.free_frames()
        );
        seeded
    }

    /// Take a frame off the free list. Its count is one and its bytes are
    /// [`ALLOC_JUNK`].
    ///
    /// `None` means all frames are in use; nothing changes in that case.
    pub fn alloc_frame(&self) -> Option<PhysicalFrame> {
        let frame = {
            let mut free = self.free.lock();
            let frame = free.pop();
            if let Some(frame) = frame {
                // Set while `kmem` is still held; whatever count the slot had
                // is stale.
                self.refs.lock().set(frame, 1);
            }
            frame
        };

        let Some(frame) = frame else {
            log::warn!("frame allocator: out of frames");
            return None;
        };

        // SAFETY: The frame just left the free list and has no other owner.
        unsafe { self.mapper.frame_bytes(frame) }.fill(ALLOC_JUNK);
        Some(frame)
    }

    /// Release one reference to the frame at `pa`. The last release scrubs it
    /// with [`FREE_JUNK`] and puts it back on the free list.
    ///
    /// # Panics
    /// If `pa` is not frame aligned, lies below the end of the kernel image or
    /// at/above the physical ceiling, or the frame is already free. Each of
    /// these means the caller corrupted its own bookkeeping.
    pub fn free_frame(&self, pa: PhysicalAddress) {
        let frame = match self.check_frame(pa) {
            Ok(frame) => frame,
            Err(e) => panic!("free_frame: {e}"),
        };

        let last = self.refs.lock().decrement_and_test(frame);
        if !last {
            return;
        }

        // SAFETY: The count reached zero; no mapping or owner remains.
        unsafe { self.mapper.frame_bytes(frame) }.fill(FREE_JUNK);
        self.free.lock().push(frame);
    }

    /// Add one sharer to an allocated frame and return the new count.
    ///
    /// # Errors
    /// If `pa` is not a managed frame address.
    pub fn add_ref(&self, pa: PhysicalAddress) -> Result<u32, FrameError> {
        let frame = self.check_frame(pa)?;
        Ok(self.refs.lock().increment(frame))
    }

    /// Current sharer count of `frame`. Zero for free frames.
    ///
    /// # Panics
    /// If `frame` is outside the table.
    #[must_use]
    pub fn refcount(&self, frame: PhysicalFrame) -> u32 {
        self.refs.lock().get(frame)
    }

    /// Number of frames on the free list.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.free.lock().len()
    }

    /// Number of frames seeded through [`init`](Self::init) or
    /// [`init_range`](Self::init_range), free or not.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.seeded.load(Ordering::Relaxed)
    }

    /// Validate `pa` as the base of a managed frame.
    ///
    /// # Errors
    /// See [`FrameError`].
    pub const fn check_frame(&self, pa: PhysicalAddress) -> Result<PhysicalFrame, FrameError> {
        let Some(frame) = PhysicalFrame::from_aligned(pa) else {
            return Err(FrameError::Misaligned(pa));
        };
        if pa.as_u64() < self.layout.kernel_end.as_u64() {
            return Err(FrameError::BelowKernel(pa));
        }
        if pa.as_u64() >= self.layout.phys_ceiling.as_u64() {
            return Err(FrameError::AboveCeiling(pa));
        }
        Ok(frame)
    }
}

impl<M: PhysMapper, const FRAMES: usize> FrameAlloc for FrameAllocator<M, FRAMES> {
    fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
        self.alloc_frame().map(PhysicalFrame::base)
    }
}

impl<M: PhysMapper, const FRAMES: usize> FrameAlloc for &FrameAllocator<M, FRAMES> {
    fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
        self.alloc_frame().map(PhysicalFrame::base)
    }
}

/// A physical address that is not the base of a managed frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("{0} is not frame aligned")]
    Misaligned(PhysicalAddress),
    #[error("{0} lies inside the kernel image")]
    BelowKernel(PhysicalAddress),
    #[error("{0} lies at or above the physical ceiling")]
    AboveCeiling(PhysicalAddress),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phys_mapper::SimulatedRam;

    const FRAMES: usize = 0x110;
    const LAYOUT: MemoryLayout = MemoryLayout {
        kernel_end: PhysicalAddress::new(0x10_0000),
        phys_ceiling: PhysicalAddress::new(0x11_0000),
        ..MemoryLayout::DEFAULT
    };

    fn setup() -> SimulatedRam {
        SimulatedRam::covering(&LAYOUT)
    }

    #[test]
    fn empty_until_seeded() {
        let ram = setup();
        let frames = FrameAllocator::<_, FRAMES>::new(LAYOUT, &ram);
        assert_eq!(frames.free_frames(), 0);
        assert_eq!(frames.alloc_frame(), None);
        assert_eq!(frames.capacity(), 0);
        frames.init();
        assert_eq!(frames.capacity(), 16);
    }

    #[test]
    fn try_new_rejects_undersized_table() {
        let ram = setup();
        assert_eq!(
            FrameAllocator::<_, 8>::try_new(LAYOUT, &ram).err(),
            Some(LayoutError::TableTooSmall {
                needed: FRAMES,
                available: 8
            })
        );
    }

    #[test]
    fn init_seeds_every_managed_frame_scrubbed() {
        let ram = setup();
        let frames = FrameAllocator::<_, FRAMES>::new(LAYOUT, &ram);
        assert_eq!(frames.init(), 16);
        assert_eq!(frames.free_frames(), 16);

        for i in 0..16 {
            let f = PhysicalFrame::containing(LAYOUT.kernel_end + i * FRAME_SIZE);
            assert_eq!(frames.refcount(f), 0);
            assert!(unsafe { ram.frame_bytes(f) }.iter().all(|&b| b == FREE_JUNK));
        }
    }

    #[test]
    fn init_range_takes_whole_frames_only() {
        let ram = setup();
        let frames = FrameAllocator::<_, FRAMES>::new(LAYOUT, &ram);
        // [0x10_0001, 0x10_3fff) rounds to frames 0x101 and 0x102.
        let seeded = frames.init_range(
            PhysicalAddress::new(0x10_0001),
            PhysicalAddress::new(0x10_3fff),
        );
        assert_eq!(seeded, 2);
        assert_eq!(frames.capacity(), 2);
        assert_eq!(frames.alloc_frame(), Some(PhysicalFrame::from_index(0x102)));
        assert_eq!(frames.alloc_frame(), Some(PhysicalFrame::from_index(0x101)));
        assert_eq!(frames.alloc_frame(), None);
    }

    #[test]
    fn last_seeded_frame_is_allocated_first() {
        let ram = setup();
        let frames = FrameAllocator::<_, FRAMES>::new(LAYOUT, &ram);
        frames.init();
        let top = PhysicalFrame::containing(LAYOUT.phys_ceiling).index() - 1;
        assert_eq!(frames.alloc_frame().map(PhysicalFrame::index), Some(top));
    }

    #[test]
    fn alloc_sets_count_and_junk() {
        let ram = setup();
        let frames = FrameAllocator::<_, FRAMES>::new(LAYOUT, &ram);
        frames.init();
        let f = frames.alloc_frame().unwrap();
        assert_eq!(frames.refcount(f), 1);
        assert_eq!(frames.free_frames(), 15);
        assert!(unsafe { ram.frame_bytes(f) }.iter().all(|&b| b == ALLOC_JUNK));
    }

    #[test]
    fn shared_frame_stays_allocated_until_last_release() {
        let ram = setup();
        let frames = FrameAllocator::<_, FRAMES>::new(LAYOUT, &ram);
        frames.init();
        let f = frames.alloc_frame().unwrap();
        unsafe { ram.frame_bytes(f) }.fill(0x42);

        assert_eq!(frames.add_ref(f.base()), Ok(2));
        frames.free_frame(f.base());
        assert_eq!(frames.refcount(f), 1);
        assert_eq!(frames.free_frames(), 15);
        assert!(unsafe { ram.frame_bytes(f) }.iter().all(|&b| b == 0x42));

        frames.free_frame(f.base());
        assert_eq!(frames.refcount(f), 0);
        assert_eq!(frames.free_frames(), 16);
    }

    #[test]
    fn check_frame_classifies_bad_addresses() {
        let ram = setup();
        let frames = FrameAllocator::<_, FRAMES>::new(LAYOUT, &ram);
        let below = PhysicalAddress::new(LAYOUT.kernel_end.as_u64() - FRAME_SIZE);
        assert_eq!(
            frames.check_frame(LAYOUT.kernel_end + 1),
            Err(FrameError::Misaligned(LAYOUT.kernel_end + 1))
        );
        assert_eq!(frames.check_frame(below), Err(FrameError::BelowKernel(below)));
        assert_eq!(
            frames.check_frame(LAYOUT.phys_ceiling),
            Err(FrameError::AboveCeiling(LAYOUT.phys_ceiling))
        );
        assert!(frames.check_frame(LAYOUT.kernel_end).is_ok());
    }

    #[test]
    #[should_panic(expected = "free_frame:")]
    fn free_of_unaligned_address_panics() {
        let ram = setup();
        let frames = FrameAllocator::<_, FRAMES>::new(LAYOUT, &ram);
        frames.free_frame(LAYOUT.kernel_end + 0x10);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn double_free_panics() {
        let ram = setup();
        let frames = FrameAllocator::<_, FRAMES>::new(LAYOUT, &ram);
        frames.init();
        let f = frames.alloc_frame().unwrap();
        frames.free_frame(f.base());
        frames.free_frame(f.base());
    }

    #[test]
    #[should_panic(expected = "is already free")]
    fn seeding_a_free_frame_twice_panics() {
        let ram = setup();
        let frames = FrameAllocator::<_, FRAMES>::new(LAYOUT, &ram);
        let start = LAYOUT.kernel_end;
        frames.init_range(start, start + 2 * FRAME_SIZE);
        frames.init_range(start + FRAME_SIZE, start + 3 * FRAME_SIZE);
    }

    #[test]
    fn frame_alloc_trait_hands_out_frame_bases() {
        fn take_two(alloc: &mut impl FrameAlloc) -> [Option<PhysicalAddress>; 2] {
            [alloc.alloc_4k(), alloc.alloc_4k()]
        }

        let ram = setup();
        let mut frames = FrameAllocator::<_, FRAMES>::new(LAYOUT, &ram);
        frames.init_range(LAYOUT.kernel_end, LAYOUT.kernel_end + FRAME_SIZE);

        let [a, b] = take_two(&mut &frames);
        assert_eq!(a, Some(LAYOUT.kernel_end));
        assert_eq!(b, None);
        assert_eq!(frames.refcount(LAYOUT.kernel_end.frame()), 1);

        frames.free_frame(LAYOUT.kernel_end);
        assert_eq!(take_two(&mut frames)[0], Some(LAYOUT.kernel_end));
    }

    #[test]
    #[should_panic(expected = "does not fit the frame table")]
    fn new_panics_on_bad_layout() {
        let ram = setup();
        let _ = FrameAllocator::<_, 4>::new(LAYOUT, &ram);
    }
}
