//! A software page table: one leaf entry per page, kept in an ordered map.
//!
//! There is no hardware walk; translation consults the map only. It is the
//! page table used by the allocator's tests and is handy for any code that
//! needs an address space without an MMU behind it.

use crate::address_space::{AddressSpace, MapError};
use crate::PageEntryBits;
use alloc::collections::BTreeMap;
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

#[derive(Debug, Clone)]
pub struct FlatAddressSpace {
    max_virtual: VirtualAddress,
    entries: BTreeMap<u64, PageEntryBits>,
    /// Maximum number of entry slots, emulating running out of table frames.
    slot_limit: Option<usize>,
    invalidations: usize,
}

impl Default for FlatAddressSpace {
    fn default() -> Self {
        Self::for_layout(&MemoryLayout::DEFAULT)
    }
}

impl FlatAddressSpace {
    #[must_use]
    pub const fn new(max_virtual: VirtualAddress) -> Self {
        Self {
            max_virtual,
            entries: BTreeMap::new(),
            slot_limit: None,
            invalidations: 0,
        }
    }

    /// An empty space bounded by `layout.max_virtual`.
    #[must_use]
    pub const fn for_layout(layout: &MemoryLayout) -> Self {
        Self::new(layout.max_virtual)
    }

    /// Refuse to create more than `limit` entry slots; further `install`s on
    /// new pages fail with [`MapError::NoTable`].
    #[must_use]
    pub fn with_slot_limit(mut self, limit: usize) -> Self {
        self.slot_limit = Some(limit);
        self
    }

    /// Remove the entry for `va` entirely and return it.
    pub fn unmap(&mut self, va: VirtualAddress) -> Option<PageEntryBits> {
        let removed = self.entries.remove(&va.page_floor().as_u64());
        if removed.is_some() {
            self.invalidations += 1;
        }
        removed
    }

    /// Number of entry slots, valid or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many times an in-place edit was announced through `invalidate`.
    #[must_use]
    pub const fn invalidations(&self) -> usize {
        self.invalidations
    }

    /// Iterate over `(va, entry)` in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = (VirtualAddress, PageEntryBits)> + '_ {
        self.entries
            .iter()
            .map(|(va, e)| (VirtualAddress::new(*va), *e))
    }
}

impl AddressSpace for FlatAddressSpace {
    fn max_virtual(&self) -> VirtualAddress {
        self.max_virtual
    }

    fn entry(&self, va: VirtualAddress) -> Option<PageEntryBits> {
        self.entries.get(&va.page_floor().as_u64()).copied()
    }

    fn entry_mut(&mut self, va: VirtualAddress) -> Option<&mut PageEntryBits> {
        self.entries.get_mut(&va.page_floor().as_u64())
    }

    fn install(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), MapError> {
        if !va.is_page_aligned() {
            return Err(MapError::Misaligned(va));
        }
        if !pa.is_frame_aligned() {
            return Err(MapError::MisalignedFrame(pa));
        }
        if va >= self.max_virtual {
            return Err(MapError::OutOfRange(va));
        }

        let entry = flags.with_physical_address(pa).with_valid(true);
        match self.entries.get_mut(&va.as_u64()) {
            Some(existing) if existing.valid() => Err(MapError::AlreadyMapped(va)),
            Some(existing) => {
                *existing = entry;
                Ok(())
            }
            None => {
                if self.slot_limit.is_some_and(|limit| self.entries.len() >= limit) {
                    return Err(MapError::NoTable(va));
                }
                self.entries.insert(va.as_u64(), entry);
                Ok(())
            }
        }
    }

    fn invalidate(&mut self, _va: VirtualAddress) {
        self.invalidations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VA: VirtualAddress = VirtualAddress::new(0x4000_0000);
    const PA: PhysicalAddress = PhysicalAddress::new(0x0050_0000);

    #[test]
    fn install_then_translate_keeps_offset() {
        let mut s = FlatAddressSpace::default();
        s.install(VA, PA, PageEntryBits::new_user_rw()).unwrap();
        assert_eq!(s.translate(VA + 0x10), Some(PA + 0x10));
        assert!(s.entry(VA).unwrap().valid());
    }

    #[test]
    fn install_refuses_valid_entries_but_reuses_invalid_slots() {
        let mut s = FlatAddressSpace::default();
        s.install(VA, PA, PageEntryBits::new_user_ro()).unwrap();
        assert_eq!(
            s.install(VA, PA + 0x1000, PageEntryBits::new_user_rw()),
            Err(MapError::AlreadyMapped(VA))
        );

        s.entry_mut(VA).unwrap().set_valid(false);
        assert_eq!(s.translate(VA), None);
        s.install(VA, PA + 0x1000, PageEntryBits::new_user_rw())
            .unwrap();
        assert_eq!(s.translate(VA), Some(PA + 0x1000));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn install_validates_arguments() {
        let mut s = FlatAddressSpace::new(VirtualAddress::new(0x1000_0000));
        let flags = PageEntryBits::new_user_rw();
        assert_eq!(
            s.install(VA + 1, PA, flags),
            Err(MapError::Misaligned(VA + 1))
        );
        assert_eq!(
            s.install(VirtualAddress::new(0x1000), PA + 8, flags),
            Err(MapError::MisalignedFrame(PA + 8))
        );
        assert_eq!(s.install(VA, PA, flags), Err(MapError::OutOfRange(VA)));
        assert!(s.is_empty());
    }

    #[test]
    fn layout_bounds_the_space() {
        let layout = MemoryLayout {
            max_virtual: VirtualAddress::new(0x8000_0000),
            ..MemoryLayout::DEFAULT
        };
        let mut s = FlatAddressSpace::for_layout(&layout);
        assert_eq!(s.max_virtual(), layout.max_virtual);
        assert_eq!(
            s.install(layout.max_virtual, PA, PageEntryBits::new_user_rw()),
            Err(MapError::OutOfRange(layout.max_virtual))
        );
        assert_eq!(
            FlatAddressSpace::default().max_virtual(),
            MemoryLayout::DEFAULT.max_virtual
        );
    }

    #[test]
    fn slot_limit_emulates_table_exhaustion() {
        let mut s = FlatAddressSpace::default().with_slot_limit(1);
        s.install(VA, PA, PageEntryBits::new_user_rw()).unwrap();
        assert_eq!(
            s.install(VA + 0x1000, PA, PageEntryBits::new_user_rw()),
            Err(MapError::NoTable(VA + 0x1000))
        );
    }

    #[test]
    fn unmap_removes_slot() {
        let mut s = FlatAddressSpace::default();
        s.install(VA, PA, PageEntryBits::new_user_rw()).unwrap();
        assert!(s.unmap(VA).is_some());
        assert!(s.entry(VA).is_none());
        assert_eq!(s.invalidations(), 1);
    }
}
