//! # Memory Layout

use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, VirtualAddress};

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel image is placed in *physical* memory.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// First physical address after the kernel image.
///
/// The real value comes from the linker; this is the upper bound reserved for
/// the image and is what [`MemoryLayout::DEFAULT`] uses.
pub const KERNEL_PHYS_END: u64 = 0x0040_0000; // 4 MiB

/// Exclusive upper bound of managed physical memory.
pub const PHYS_CEILING: u64 = 0x0800_0000; // 128 MiB

/// Exclusive upper bound of user virtual addresses (lower canonical half).
pub const MAX_USER_VIRTUAL: u64 = 0x0000_8000_0000_0000;

/// Number of frame slots needed to cover `[0, PHYS_CEILING)`.
#[allow(clippy::cast_possible_truncation)]
pub const PHYS_FRAME_SLOTS: usize = (PHYS_CEILING / FRAME_SIZE) as usize;

const _: () = {
    assert!(PHYS_LOAD < KERNEL_PHYS_END);
    assert!(KERNEL_PHYS_END < PHYS_CEILING);
    assert!(PHYS_CEILING.is_multiple_of(FRAME_SIZE));
    assert!(HHDM_BASE >= MAX_USER_VIRTUAL);
};

/// The physical and virtual bounds the allocator and fault path work against.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryLayout {
    /// First address above the kernel image. Frees below this are fatal.
    pub kernel_end: PhysicalAddress,
    /// Exclusive end of managed physical memory.
    pub phys_ceiling: PhysicalAddress,
    /// Exclusive end of valid virtual addresses.
    pub max_virtual: VirtualAddress,
}

impl MemoryLayout {
    pub const DEFAULT: Self = Self {
        kernel_end: PhysicalAddress::new(KERNEL_PHYS_END),
        phys_ceiling: PhysicalAddress::new(PHYS_CEILING),
        max_virtual: VirtualAddress::new(MAX_USER_VIRTUAL),
    };

    /// Number of table slots covering `[0, phys_ceiling)`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn frame_slots(&self) -> usize {
        (self.phys_ceiling.as_u64() / FRAME_SIZE) as usize
    }

    /// Number of whole frames the allocator will manage, i.e. the frames in
    /// `[round_up(kernel_end), phys_ceiling)`.
    #[inline]
    #[must_use]
    pub const fn managed_frames(&self) -> u64 {
        let start = self.kernel_end.frame_ceil().as_u64();
        let end = self.phys_ceiling.as_u64();
        if start >= end {
            0
        } else {
            (end - start) / FRAME_SIZE
        }
    }

    /// Whether `pa` lies in the range the allocator may hand out.
    #[inline]
    #[must_use]
    pub const fn is_managed(&self, pa: PhysicalAddress) -> bool {
        pa.as_u64() >= self.kernel_end.as_u64() && pa.as_u64() < self.phys_ceiling.as_u64()
    }

    /// Check the layout against a table with `slots` entries.
    ///
    /// # Errors
    /// See [`LayoutError`].
    pub const fn validate(&self, slots: usize) -> Result<(), LayoutError> {
        if !self.phys_ceiling.is_frame_aligned() {
            return Err(LayoutError::UnalignedCeiling(self.phys_ceiling));
        }
        if self.kernel_end.as_u64() >= self.phys_ceiling.as_u64() {
            return Err(LayoutError::KernelBeyondCeiling {
                kernel_end: self.kernel_end,
                phys_ceiling: self.phys_ceiling,
            });
        }
        if self.frame_slots() > slots {
            return Err(LayoutError::TableTooSmall {
                needed: self.frame_slots(),
                available: slots,
            });
        }
        Ok(())
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("physical ceiling {0} is not frame aligned")]
    UnalignedCeiling(PhysicalAddress),
    #[error("kernel end {kernel_end} is not below the physical ceiling {phys_ceiling}")]
    KernelBeyondCeiling {
        kernel_end: PhysicalAddress,
        phys_ceiling: PhysicalAddress,
    },
    #[error("layout needs {needed} frame slots but the table holds {available}")]
    TableTooSmall { needed: usize, available: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_valid() {
        assert_eq!(MemoryLayout::DEFAULT.validate(PHYS_FRAME_SLOTS), Ok(()));
        assert_eq!(MemoryLayout::DEFAULT.frame_slots(), PHYS_FRAME_SLOTS);
        assert_eq!(
            MemoryLayout::DEFAULT.managed_frames(),
            (PHYS_CEILING - KERNEL_PHYS_END) / FRAME_SIZE
        );
    }

    #[test]
    fn unaligned_kernel_end_rounds_up() {
        let layout = MemoryLayout {
            kernel_end: PhysicalAddress::new(0x1_0001),
            phys_ceiling: PhysicalAddress::new(0x2_0000),
            max_virtual: VirtualAddress::new(MAX_USER_VIRTUAL),
        };
        assert_eq!(layout.managed_frames(), 15);
    }

    #[test]
    fn validate_rejects_bad_layouts() {
        let mut layout = MemoryLayout::DEFAULT;
        layout.phys_ceiling = PhysicalAddress::new(PHYS_CEILING + 1);
        assert!(matches!(
            layout.validate(usize::MAX),
            Err(LayoutError::UnalignedCeiling(_))
        ));

        let mut layout = MemoryLayout::DEFAULT;
        layout.kernel_end = layout.phys_ceiling;
        assert!(matches!(
            layout.validate(PHYS_FRAME_SLOTS),
            Err(LayoutError::KernelBeyondCeiling { .. })
        ));

        assert_eq!(
            MemoryLayout::DEFAULT.validate(16),
            Err(LayoutError::TableTooSmall {
                needed: PHYS_FRAME_SLOTS,
                available: 16
            })
        );
    }

    #[test]
    fn is_managed_bounds() {
        let l = MemoryLayout::DEFAULT;
        assert!(!l.is_managed(PhysicalAddress::new(KERNEL_PHYS_END - 1)));
        assert!(l.is_managed(PhysicalAddress::new(KERNEL_PHYS_END)));
        assert!(l.is_managed(PhysicalAddress::new(PHYS_CEILING - 1)));
        assert!(!l.is_managed(PhysicalAddress::new(PHYS_CEILING)));
    }
}
