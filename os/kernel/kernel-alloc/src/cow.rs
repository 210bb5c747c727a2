//! # Copy-on-Write Fault Path
//!
//! Frames shared between address spaces are mapped read-only with the `cow`
//! bit set. The first write through such a mapping faults; the trap handler
//! asks [`is_cow_page`] and, if so, calls [`CowResolver::resolve_cow_fault`].
//!
//! ```text
//!                  refcount(frame) == 1 ──► set writable, clear cow, keep frame
//! write fault ──►
//!                  refcount(frame) >= 2 ──► alloc, copy, remap to the copy,
//!                                           drop one reference on the original
//! ```
//!
//! Process duplication shares pages with [`CowResolver::share_page`], or does
//! its own page-table work and calls [`CowResolver::bump_refcount`] once per
//! new mapping.
//!
//! Concurrent faults on the *same* page of the *same* address space must be
//! serialized by the caller (they already are, by `&mut A`). Faults in
//! different address spaces sharing one frame may run in parallel; the shared
//! frame is only ever read.

use crate::frame_alloc::{FrameAllocator, FrameError};
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_vmem::{AddressSpace, FrameBytes, MapError, PhysMapper};

/// Whether the valid page at `va` is marked copy-on-write.
///
/// `Ok(false)` is a normal answer (a private page); the errors mean there is
/// no page to ask about.
///
/// # Errors
/// See [`CowCheckError`].
pub fn is_cow_page<A: AddressSpace + ?Sized>(
    aspace: &A,
    va: VirtualAddress,
) -> Result<bool, CowCheckError> {
    if va >= aspace.max_virtual() {
        return Err(CowCheckError::OutOfRange(va));
    }
    let entry = aspace.entry(va).ok_or(CowCheckError::NoEntry(va))?;
    if !entry.valid() {
        return Err(CowCheckError::NotValid(va));
    }
    Ok(entry.cow())
}

/// The COW fault path of one [`FrameAllocator`].
pub struct CowResolver<'f, M: PhysMapper, const FRAMES: usize> {
    frames: &'f FrameAllocator<M, FRAMES>,
}

impl<'f, M: PhysMapper, const FRAMES: usize> CowResolver<'f, M, FRAMES> {
    #[inline]
    #[must_use]
    pub const fn new(frames: &'f FrameAllocator<M, FRAMES>) -> Self {
        Self { frames }
    }

    /// Give the faulting mapping at `va` a private, writable frame.
    ///
    /// Returns the frame `va` maps afterwards: the original one if this was
    /// its last sharer, a fresh copy otherwise.
    ///
    /// On error the entry for `va` is exactly as it was before the call.
    ///
    /// # Errors
    /// See [`CowFaultError`].
    pub fn resolve_cow_fault<A: AddressSpace + ?Sized>(
        &self,
        aspace: &mut A,
        va: VirtualAddress,
    ) -> Result<PhysicalFrame, CowFaultError> {
        if !va.is_page_aligned() {
            return Err(CowFaultError::Misaligned(va));
        }
        if va >= aspace.max_virtual() || va >= self.frames.layout().max_virtual {
            return Err(CowFaultError::Unmapped(va));
        }
        let entry = aspace
            .entry(va)
            .filter(|e| e.valid())
            .ok_or(CowFaultError::Unmapped(va))?;
        if !entry.cow() {
            return Err(CowFaultError::NotCow(va));
        }
        let old = self
            .frames
            .check_frame(entry.physical_address())
            .map_err(CowFaultError::Frame)?;

        if self.frames.refcount(old) == 1 {
            if let Some(e) = aspace.entry_mut(va) {
                *e = e.promoted_to_private();
            }
            aspace.invalidate(va);
            log::debug!("cow: {va} was the last sharer of {old}, made writable in place");
            return Ok(old);
        }

        let Some(new) = self.frames.alloc_frame() else {
            return Err(CowFaultError::OutOfMemory(va));
        };

        let mapper = self.frames.mapper();
        // SAFETY: `new` is ours alone. `old` is mapped read-only everywhere and
        // keeps our reference until after the copy, so it is neither written
        // nor scrubbed while other sharers may be reading it too.
        unsafe {
            let src: &FrameBytes = mapper.frame_bytes_ref(old);
            mapper.frame_bytes(new).copy_from_slice(src);
        }

        if let Some(slot) = aspace.entry_mut(va) {
            slot.set_valid(false);
        }
        if let Err(e) = aspace.install(va, new.base(), entry.flags().promoted_to_private()) {
            self.frames.free_frame(new.base());
            if let Some(slot) = aspace.entry_mut(va) {
                slot.set_valid(true);
            }
            log::debug!("cow: remapping {va} failed: {e}");
            return Err(CowFaultError::Map(e));
        }
        aspace.invalidate(va);

        self.frames.free_frame(old.base());
        log::trace!("cow: {va} copied from {old} to {new}");
        Ok(new)
    }

    /// Record one more mapping of the frame at `pa` and return its new count.
    ///
    /// # Errors
    /// If `pa` is not a managed frame address; the count is unchanged.
    pub fn bump_refcount(&self, pa: PhysicalAddress) -> Result<u32, FrameError> {
        self.frames.add_ref(pa)
    }

    /// Share the page at `va` of `parent` with `child` at the same address.
    ///
    /// Writable pages become read-only and `cow` in both spaces; pages that
    /// were not writable are shared as they are. The frame gains one
    /// reference. Returns the shared frame.
    ///
    /// On error neither space nor the count has changed.
    ///
    /// # Errors
    /// See [`ShareError`].
    pub fn share_page<P, C>(
        &self,
        parent: &mut P,
        child: &mut C,
        va: VirtualAddress,
    ) -> Result<PhysicalFrame, ShareError>
    where
        P: AddressSpace + ?Sized,
        C: AddressSpace + ?Sized,
    {
        if !va.is_page_aligned() {
            return Err(ShareError::Misaligned(va));
        }
        if va >= parent.max_virtual() || va >= self.frames.layout().max_virtual {
            return Err(ShareError::NotMapped(va));
        }
        let entry = parent
            .entry(va)
            .filter(|e| e.valid())
            .ok_or(ShareError::NotMapped(va))?;
        let frame = self
            .frames
            .check_frame(entry.physical_address())
            .map_err(ShareError::Frame)?;

        let flags = if entry.writable() || entry.cow() {
            entry.flags().demoted_to_shared()
        } else {
            entry.flags()
        };
        child
            .install(va, frame.base(), flags)
            .map_err(ShareError::Map)?;
        self.frames
            .add_ref(frame.base())
            .map_err(ShareError::Frame)?;

        if flags.cow() && !entry.cow() {
            if let Some(e) = parent.entry_mut(va) {
                *e = e.demoted_to_shared();
            }
            parent.invalidate(va);
        }
        log::trace!("cow: shared {va} -> {frame} (cow: {})", flags.cow());
        Ok(frame)
    }
}

/// Why a page could not be checked for the `cow` bit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum CowCheckError {
    #[error("virtual address {0} is outside the address space")]
    OutOfRange(VirtualAddress),
    #[error("no page table entry for {0}")]
    NoEntry(VirtualAddress),
    #[error("page at {0} is not mapped")]
    NotValid(VirtualAddress),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum CowFaultError {
    #[error("fault address {0} is not page aligned")]
    Misaligned(VirtualAddress),
    #[error("fault address {0} is not mapped")]
    Unmapped(VirtualAddress),
    #[error("page at {0} is not copy-on-write")]
    NotCow(VirtualAddress),
    #[error("faulting page maps an unmanaged frame: {0}")]
    Frame(FrameError),
    #[error("no free frame to copy {0} into")]
    OutOfMemory(VirtualAddress),
    #[error("failed to remap the copy: {0}")]
    Map(MapError),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ShareError {
    #[error("virtual address {0} is not page aligned")]
    Misaligned(VirtualAddress),
    #[error("page at {0} is not mapped")]
    NotMapped(VirtualAddress),
    #[error("shared page maps an unmanaged frame: {0}")]
    Frame(FrameError),
    #[error("failed to map the page in the child: {0}")]
    Map(MapError),
}
