//! # Physical and Virtual Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses and physical frames used
//! by the frame allocator and the page-table interface.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`VirtualAddress`] | A byte address in some address space, translated by page tables. |
//! | [`PhysicalFrame`] | A frame **index**, i.e. `address / FRAME_SIZE`. |
//!
//! All management happens at [`FRAME_SIZE`] granularity. A physical address is
//! turned into a frame either by rounding down ([`PhysicalFrame::containing`])
//! or by insisting on alignment ([`PhysicalFrame::from_aligned`]).
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0020_3042);
//! let frame = PhysicalFrame::containing(pa);
//! assert_eq!(frame.index(), 0x203);
//! assert_eq!(frame.base().as_u64(), 0x0020_3000);
//! assert!(PhysicalFrame::from_aligned(pa).is_none());
//!
//! let va = VirtualAddress::new(0x4000_1234);
//! assert_eq!(va.page_floor().as_u64(), 0x4000_1000);
//! ```
//!
//! The types are `#[repr(transparent)]` and all conversions are `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod physical_address;
mod physical_frame;
mod virtual_address;

pub use physical_address::PhysicalAddress;
pub use physical_frame::PhysicalFrame;
pub use virtual_address::VirtualAddress;

/// Size of one managed frame (and one leaf page) in bytes.
pub const FRAME_SIZE: u64 = 4096;

/// `log2(FRAME_SIZE)`.
pub const FRAME_SHIFT: u32 = 12;

const _: () = assert!(1 << FRAME_SHIFT == FRAME_SIZE);

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0,    4096), 0);
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + a - 1` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(1,    4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(4097, 4096), 8192);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}
