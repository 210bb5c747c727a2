use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// A single 64-bit leaf page-table entry in its raw bitfield form.
///
/// The layout follows the x86-64 leaf PTE. Bit 9, one of the bits the
/// hardware leaves to the operating system, carries the copy-on-write mark.
///
/// ### Bit layout
///
/// | Bits      | Name              | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `valid` (P)       | Entry maps a frame |
/// | 1         | `writable` (RW)   | Writes allowed |
/// | 2         | `user_access` (US)| User-mode accessible |
/// | 3         | `write_through`   | PWT |
/// | 4         | `cache_disabled`  | PCD |
/// | 5         | `accessed` (A)    | Set by the CPU on any access |
/// | 6         | `dirty` (D)       | Set by the CPU on write |
/// | 7         | `large_page` (PS) | Must be clear for 4 KiB leaves |
/// | 8         | `global_translation` | G |
/// | 9         | `cow`             | Copy-on-write share (OS use) |
/// | 10–11     | OS avail low      | Unused |
/// | 12–51     | address           | Physical frame bits [51:12] |
/// | 52–58     | OS avail high     | Unused |
/// | 59–62     | `protection_key`  | PKU |
/// | 63        | `no_execute` (NX) | Execute disable |
///
/// ### Invariant kept by the fault path
/// An entry with `cow` set never has `writable` set.
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let e = PageEntryBits::new_user_rw()
///     .with_cow(true)
///     .with_writable(false)
///     .with_physical_address(PhysicalAddress::new(0x4000));
/// assert!(e.valid() && e.cow() && !e.writable());
/// assert_eq!(e.physical_address().as_u64(), 0x4000);
/// assert_eq!(e.flags().physical_address().as_u64(), 0);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Valid / present (bit 0).
    pub valid: bool,

    /// Writable (bit 1).
    pub writable: bool,

    /// User/Supervisor (bit 2).
    pub user_access: bool,

    /// Page Write-Through (bit 3).
    pub write_through: bool,

    /// Page Cache Disable (bit 4).
    pub cache_disabled: bool,

    /// Accessed (bit 5). Set by the CPU, cleared by the accessed-bit scan.
    pub accessed: bool,

    /// Dirty (bit 6).
    pub dirty: bool,

    /// Large Page (bit 7). Always clear for the 4 KiB leaves handled here.
    pub large_page: bool,

    /// Global (bit 8).
    pub global_translation: bool,

    /// Copy-on-write (bit 9, OS-available).
    ///
    /// Set on every mapping of a frame shared between address spaces; a
    /// write to such a page faults and is resolved by the COW fault path.
    pub cow: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available_low: u8,

    /// Physical address bits [51:12].
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection Key (bits 59..=62).
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysicalAddress) -> Self {
        self.set_physical_address(phys);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << 12)
    }

    /// Everything but the address bits.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> Self {
        self.with_phys_addr_bits_51_12(0)
    }

    /// The same flags with write access restored and the COW mark dropped.
    #[inline]
    #[must_use]
    pub const fn promoted_to_private(self) -> Self {
        self.with_writable(true).with_cow(false)
    }

    /// The same flags write-protected and marked as a COW share.
    #[inline]
    #[must_use]
    pub const fn demoted_to_shared(self) -> Self {
        self.with_writable(false).with_cow(true)
    }

    #[inline]
    #[must_use]
    pub const fn new_user_rw() -> Self {
        Self::new()
            .with_valid(true)
            .with_writable(true)
            .with_user_access(true)
            .with_no_execute(true)
    }

    #[inline]
    #[must_use]
    pub const fn new_user_ro() -> Self {
        Self::new()
            .with_valid(true)
            .with_writable(false)
            .with_user_access(true)
            .with_no_execute(true)
    }
}
