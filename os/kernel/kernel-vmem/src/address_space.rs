//! # Address Space Interface
//!
//! The narrow capability the frame allocator's fault path needs from a page
//! table: look up the leaf entry for a virtual address, edit it in place,
//! install a fresh mapping, and get told when an in-place edit must be made
//! visible to the MMU.
//!
//! How the table is walked (levels, intermediate table allocation, CR3) is up
//! to the implementor. [`FlatAddressSpace`](crate::FlatAddressSpace) is a
//! software implementation with no hardware walk at all.
//!
//! ## Contract
//!
//! - `entry` / `entry_mut` return the **leaf** entry slot for the page that
//!   contains `va`, whether or not it is valid. `None` means no slot exists
//!   (no leaf table on the walk).
//! - `install` behaves like a single-page `mappages`: it refuses to overwrite
//!   a *valid* entry, so callers that replace a mapping clear `valid` first.
//! - `invalidate` is called after an existing entry was edited in place.

use crate::PageEntryBits;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

pub trait AddressSpace {
    /// Exclusive upper bound of virtual addresses this space can map.
    fn max_virtual(&self) -> VirtualAddress;

    /// Copy of the leaf entry for the page containing `va`.
    fn entry(&self, va: VirtualAddress) -> Option<PageEntryBits>;

    /// Editable leaf entry for the page containing `va`.
    fn entry_mut(&mut self, va: VirtualAddress) -> Option<&mut PageEntryBits>;

    /// Map the page at `va` to the frame at `pa` with `flags`. `valid` is
    /// forced on and the address bits of `flags` are ignored.
    ///
    /// # Errors
    /// See [`MapError`]; on error the space is unchanged.
    fn install(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), MapError>;

    /// Make an in-place edit of the entry for `va` visible (TLB shootdown).
    fn invalidate(&mut self, _va: VirtualAddress) {}

    /// Translate `va` to a physical address if a valid leaf maps it.
    fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        if va >= self.max_virtual() {
            return None;
        }
        let e = self.entry(va)?;
        if !e.valid() {
            return None;
        }
        Some(e.physical_address() + (va.as_u64() - va.page_floor().as_u64()))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("virtual address {0} is not page aligned")]
    Misaligned(VirtualAddress),
    #[error("physical address {0} is not frame aligned")]
    MisalignedFrame(PhysicalAddress),
    #[error("virtual address {0} is outside the address space")]
    OutOfRange(VirtualAddress),
    #[error("virtual address {0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    #[error("no page table could be provided for {0}")]
    NoTable(VirtualAddress),
}
