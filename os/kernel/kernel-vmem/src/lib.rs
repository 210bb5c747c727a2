//! # Page Table Interface
//!
//! What the physical frame allocator and its copy-on-write fault path consume
//! from the paging layer, and nothing more.
//!
//! ## What you get
//! - [`PageEntryBits`]: a leaf page-table entry as a bitfield, including the
//!   software **COW** bit.
//! - [`AddressSpace`]: look up / edit / install leaf entries of one address
//!   space, plus a TLB invalidation hook.
//! - [`FlatAddressSpace`]: a software page table implementing [`AddressSpace`].
//! - [`PhysMapper`]: turn a physical address into a usable reference, which is
//!   how frame contents get filled, scrubbed and copied.
//! - [`FrameAlloc`]: hand out single 4 KiB frames to paging code.
//! - [`access::collect_accessed`]: accessed-bit scan over a run of pages.
//!
//! ## Flag semantics used by the fault path
//!
//! | Flag | Meaning here |
//! |------|--------------|
//! | `valid` | The entry maps a frame. Cleared briefly while a mapping is replaced. |
//! | `writable` | Writes allowed. Never set together with `cow`. |
//! | `cow` | The frame is (or was) shared; the first write faults. |
//! | `accessed` | Touched since the last accessed-bit scan. |

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod access;
pub mod address_space;
mod flat;
mod page_entry_bits;

extern crate alloc;

pub use crate::address_space::{AddressSpace, MapError};
pub use crate::flat::FlatAddressSpace;
pub use crate::page_entry_bits::PageEntryBits;
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

#[allow(clippy::cast_possible_truncation)]
const FRAME_BYTES: usize = FRAME_SIZE as usize;

/// The contents of one physical frame.
pub type FrameBytes = [u8; FRAME_BYTES];

/// Source of fresh 4 KiB physical frames for paging code (page tables,
/// anonymous pages). Returned addresses are frame aligned.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame.
    fn alloc_4k(&mut self) -> Option<PhysicalAddress>;
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space (e.g., via identity map or a higher-half direct map, HHDM).
///
/// # Safety
/// - You must ensure `pa` is mapped as writable in the current page tables
///   for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation; additionally no other live reference may
    /// alias the same bytes.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Convert a *physical* address to a shared reference.
    ///
    /// # Safety
    /// See the trait documentation; additionally nobody may hold a mutable
    /// reference to, or write, the same bytes for `'a`. Any number of shared
    /// references may coexist.
    unsafe fn phys_to_ref<'a, T>(&self, pa: PhysicalAddress) -> &'a T;

    /// The bytes of `frame`.
    ///
    /// # Safety
    /// As for [`phys_to_mut`](Self::phys_to_mut): the caller must own the
    /// frame (or otherwise exclude concurrent access) for `'a`.
    #[inline]
    unsafe fn frame_bytes<'a>(&self, frame: PhysicalFrame) -> &'a mut FrameBytes {
        unsafe { self.phys_to_mut::<FrameBytes>(frame.base()) }
    }

    /// The bytes of `frame`, read-only.
    ///
    /// # Safety
    /// As for [`phys_to_ref`](Self::phys_to_ref): the frame must not be
    /// written for `'a`.
    #[inline]
    unsafe fn frame_bytes_ref<'a>(&self, frame: PhysicalFrame) -> &'a FrameBytes {
        unsafe { self.phys_to_ref::<FrameBytes>(frame.base()) }
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { (**self).phys_to_mut(pa) }
    }

    #[inline]
    unsafe fn phys_to_ref<'a, T>(&self, pa: PhysicalAddress) -> &'a T {
        unsafe { (**self).phys_to_ref(pa) }
    }
}
