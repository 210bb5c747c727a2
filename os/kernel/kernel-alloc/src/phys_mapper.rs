//! # Physical Memory Mappers
//!
//! The allocator never touches frame contents through a raw address; it goes
//! through a [`PhysMapper`]. Two are provided:
//!
//! - [`HhdmPhysMapper`]: the kernel's higher-half direct map, `va = HHDM_BASE + pa`.
//! - [`SimulatedRam`]: a heap-backed block of 4 KiB frames standing in for
//!   physical memory, used when the allocator runs hosted (tests, tooling).
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::SimulatedRam;
//! use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame};
//! use kernel_vmem::PhysMapper;
//!
//! let ram = SimulatedRam::new(PhysicalAddress::new(0x10_0000), 2);
//! let frame = PhysicalFrame::containing(PhysicalAddress::new(0x10_1000));
//! unsafe {
//!     ram.frame_bytes(frame).fill(0xAA);
//!     assert_eq!(ram.frame_bytes(frame)[4095], 0xAA);
//! }
//! ```

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use kernel_info::memory::{HHDM_BASE, MemoryLayout};
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress};
use kernel_vmem::{FrameBytes, PhysMapper};

/// [`PhysMapper`] implementation for kernels with a higher-half direct map (HHDM).
///
/// Converts a physical address to a usable pointer in the kernel's virtual
/// address space by adding `HHDM_BASE` to it.
///
/// # Safety
/// - The HHDM mapping must be present and cover the referenced physical range.
/// - The returned pointer must only be used for valid, mapped, and writable memory.
#[derive(Debug, Copy, Clone, Default)]
pub struct HhdmPhysMapper;

impl PhysMapper for HhdmPhysMapper {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = (HHDM_BASE + pa.as_u64()) as usize as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and mapped via HHDM.
        unsafe { &mut *va }
    }

    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_ref<'a, T>(&self, pa: PhysicalAddress) -> &'a T {
        let va = (HHDM_BASE + pa.as_u64()) as usize as *const T;
        // SAFETY: As above; the caller excludes writers for `'a`.
        unsafe { &*va }
    }
}

#[repr(C, align(4096))]
struct RamFrame(UnsafeCell<FrameBytes>);

const _: () = assert!(size_of::<RamFrame>() as u64 == FRAME_SIZE);

/// Zero-initialized frames covering `[base, base + frames * FRAME_SIZE)`.
///
/// Each frame is 4 KiB aligned in host memory, so a `FrameBytes` reference
/// handed out by [`PhysMapper::frame_bytes`] has the same alignment it would
/// have in the direct map.
pub struct SimulatedRam {
    base: PhysicalAddress,
    frames: Box<[RamFrame]>,
}

// SAFETY: Access goes through `PhysMapper`, whose callers guarantee that a
// mutable reference never coexists with any other reference to the same bytes.
// The allocator's locks hand each writable frame to exactly one owner; shared
// COW frames are only read.
unsafe impl Sync for SimulatedRam {}

impl SimulatedRam {
    /// # Panics
    /// If `base` is not frame aligned.
    #[must_use]
    pub fn new(base: PhysicalAddress, frames: usize) -> Self {
        assert!(base.is_frame_aligned(), "simulated RAM base {base} is not frame aligned");
        let frames = (0..frames)
            .map(|_| RamFrame(UnsafeCell::new([0; size_of::<FrameBytes>()])))
            .collect();
        Self { base, frames }
    }

    /// RAM covering exactly the frames an allocator with `layout` manages.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn covering(layout: &MemoryLayout) -> Self {
        Self::new(
            layout.kernel_end.frame_ceil(),
            layout.managed_frames() as usize,
        )
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// Exclusive end of the simulated range.
    #[must_use]
    pub fn end(&self) -> PhysicalAddress {
        self.base + self.frames.len() as u64 * FRAME_SIZE
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames.len()
    }
}

impl SimulatedRam {
    /// Raw pointer to a `T` at `pa`, checked to lie within one frame.
    #[allow(clippy::cast_possible_truncation)]
    fn ptr_to<T>(&self, pa: PhysicalAddress) -> *mut T {
        assert!(
            pa >= self.base && pa < self.end(),
            "simulated RAM: {pa:?} is outside [{}, {})",
            self.base,
            self.end()
        );
        let rel = pa.as_u64() - self.base.as_u64();
        let index = (rel / FRAME_SIZE) as usize;
        let offset = (rel % FRAME_SIZE) as usize;
        assert!(
            offset + size_of::<T>() <= size_of::<FrameBytes>(),
            "simulated RAM: access at {pa:?} crosses a frame boundary"
        );
        assert!(
            offset.is_multiple_of(align_of::<T>()),
            "simulated RAM: {pa:?} is misaligned for the requested type"
        );

        let frame = self.frames[index].0.get().cast::<u8>();
        // SAFETY: `offset` is within the frame, checked above.
        unsafe { frame.add(offset).cast::<T>() }
    }
}

impl PhysMapper for SimulatedRam {
    /// # Panics
    /// If `T` at `pa` does not lie within a single simulated frame.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        // SAFETY: In bounds and aligned. The caller guarantees exclusive
        // access for `'a`.
        unsafe { &mut *self.ptr_to::<T>(pa) }
    }

    /// # Panics
    /// If `T` at `pa` does not lie within a single simulated frame.
    unsafe fn phys_to_ref<'a, T>(&self, pa: PhysicalAddress) -> &'a T {
        // SAFETY: In bounds and aligned. The caller guarantees there is no
        // writer for `'a`.
        unsafe { &*self.ptr_to::<T>(pa).cast_const() }
    }
}
