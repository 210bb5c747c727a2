//! Accessed-bit scanning.
//!
//! Reports which of a run of consecutive pages the CPU touched since the last
//! scan, and re-arms the accessed bit for the next one.

use crate::AddressSpace;
use kernel_memory_addresses::VirtualAddress;

/// Largest number of pages a single scan may cover (one bit each in a `u64`).
pub const MAX_SCAN_PAGES: usize = 64;

/// Scan `pages` pages starting at the page containing `start`.
///
/// Bit `i` of the result is set if page `i` had its accessed bit set. Every
/// reported bit is cleared in the entry. The scan is all-or-nothing: if any
/// page in the run has no entry slot, no entry is modified.
///
/// # Errors
/// See [`ScanError`].
pub fn collect_accessed<A: AddressSpace + ?Sized>(
    aspace: &mut A,
    start: VirtualAddress,
    pages: usize,
) -> Result<u64, ScanError> {
    if pages > MAX_SCAN_PAGES {
        return Err(ScanError::TooManyPages {
            requested: pages,
            max: MAX_SCAN_PAGES,
        });
    }

    let start = start.page_floor();
    for i in 0..pages as u64 {
        let va = start
            .checked_add_pages(i)
            .ok_or(ScanError::OutOfRange(start))?;
        if va >= aspace.max_virtual() {
            return Err(ScanError::OutOfRange(va));
        }
        if aspace.entry(va).is_none() {
            return Err(ScanError::NoEntry(va));
        }
    }

    let mut mask = 0u64;
    for i in 0..pages as u64 {
        let Some(va) = start.checked_add_pages(i) else {
            break;
        };
        let Some(entry) = aspace.entry_mut(va) else {
            continue;
        };
        if entry.accessed() {
            entry.set_accessed(false);
            mask |= 1 << i;
            aspace.invalidate(va);
        }
    }

    log::trace!("accessed-bit scan of {pages} pages at {start}: {mask:#018x}");
    Ok(mask)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ScanError {
    #[error("cannot scan {requested} pages at once (max {max})")]
    TooManyPages { requested: usize, max: usize },
    #[error("virtual address {0} is outside the address space")]
    OutOfRange(VirtualAddress),
    #[error("no page table entry for {0}")]
    NoEntry(VirtualAddress),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FlatAddressSpace, PageEntryBits};
    use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress};

    const BASE: VirtualAddress = VirtualAddress::new(0x10_0000);

    fn space_with_pages(n: u64) -> FlatAddressSpace {
        let mut s = FlatAddressSpace::default();
        for i in 0..n {
            s.install(
                BASE + i * FRAME_SIZE,
                PhysicalAddress::new(0x80_0000 + i * FRAME_SIZE),
                PageEntryBits::new_user_rw(),
            )
            .unwrap();
        }
        s
    }

    #[test]
    fn reports_and_clears_accessed_pages() {
        let mut s = space_with_pages(8);
        for i in [1u64, 4, 7] {
            s.entry_mut(BASE + i * FRAME_SIZE).unwrap().set_accessed(true);
        }

        let mask = collect_accessed(&mut s, BASE, 8).unwrap();
        assert_eq!(mask, 0b1001_0010);

        // second scan sees nothing new
        assert_eq!(collect_accessed(&mut s, BASE, 8).unwrap(), 0);
    }

    #[test]
    fn missing_entry_aborts_without_side_effects() {
        let mut s = space_with_pages(2);
        s.entry_mut(BASE).unwrap().set_accessed(true);

        assert_eq!(
            collect_accessed(&mut s, BASE, 3),
            Err(ScanError::NoEntry(BASE + 2 * FRAME_SIZE))
        );
        assert!(s.entry(BASE).unwrap().accessed());
    }

    #[test]
    fn rejects_oversized_scans() {
        let mut s = space_with_pages(1);
        assert_eq!(
            collect_accessed(&mut s, BASE, MAX_SCAN_PAGES + 1),
            Err(ScanError::TooManyPages {
                requested: MAX_SCAN_PAGES + 1,
                max: MAX_SCAN_PAGES
            })
        );
    }

    #[test]
    fn zero_pages_is_an_empty_mask() {
        let mut s = FlatAddressSpace::default();
        assert_eq!(collect_accessed(&mut s, BASE, 0), Ok(0));
    }
}
