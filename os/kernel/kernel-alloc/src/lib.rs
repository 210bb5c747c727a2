//! # Kernel Physical Frame Allocation and Copy-on-Write
//!
//! This crate owns physical memory after boot: which 4 KiB frames are free,
//! how many mappings share each allocated frame, and how a write to a shared
//! copy-on-write page is turned into a private, writable page.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              COW Fault Resolver ([`cow`])           │
//! │    • is_cow_page / resolve_cow_fault                │
//! │    • bump_refcount / share_page                     │
//! └──────────┬──────────────────────────────┬───────────┘
//!            │                              │
//! ┌──────────▼──────────────────┐ ┌─────────▼───────────┐
//! │ Frame Allocator             │ │ AddressSpace        │
//! │ ([`frame_alloc`])           │ │ (kernel-vmem)       │
//! │  • alloc_frame / free_frame │ │  • entry / install  │
//! │  • init / init_range        │ │  • invalidate       │
//! └──────┬───────────────┬──────┘ └─────────────────────┘
//!        │ "kmem" lock   │ "ref" lock
//! ┌──────▼──────────┐ ┌──▼──────────────┐ ┌─────────────────┐
//! │ FrameFreeList   │ │ RefCountTable   │ │ PhysMapper      │
//! │ ([`free_list`]) │ │ ([`refcount`])  │ │ ([`phys_mapper`])│
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame Allocator ([`frame_alloc`])
//! * **Reference counted**: a frame returns to the free list only when its
//!   last sharer releases it.
//! * **LIFO reuse**: the most recently freed frame is handed out next.
//! * **Junk fills**: allocated and freed frames are overwritten with distinct
//!   non-zero bytes.
//! * **Fail-fast frees**: releasing an address that is not a managed frame
//!   panics.
//!
//! ### COW Fault Resolver ([`cow`])
//! * **Sole owner**: flips the faulting entry to writable in place.
//! * **Shared**: copies into a fresh frame, remaps, drops one reference.
//! * **All-or-nothing**: a failed resolution leaves the mapping untouched.
//!
//! ### Physical Mappers ([`phys_mapper`])
//! * [`HhdmPhysMapper`](phys_mapper::HhdmPhysMapper) for the running kernel.
//! * [`SimulatedRam`](phys_mapper::SimulatedRam) for hosted use.
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::{FrameAllocator, is_cow_page};
//! use kernel_alloc::phys_mapper::SimulatedRam;
//! use kernel_info::memory::MemoryLayout;
//! use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
//! use kernel_vmem::{AddressSpace, FlatAddressSpace, PageEntryBits};
//!
//! let layout = MemoryLayout {
//!     kernel_end: PhysicalAddress::new(0x10_0000),
//!     phys_ceiling: PhysicalAddress::new(0x11_0000),
//!     ..MemoryLayout::DEFAULT
//! };
//! let ram = SimulatedRam::covering(&layout);
//! let frames = FrameAllocator::<_, 0x110>::new(layout, &ram);
//! frames.init();
//!
//! let va = VirtualAddress::new(0x4000_0000);
//! let mut parent = FlatAddressSpace::default();
//! let mut child = FlatAddressSpace::default();
//! let f = frames.alloc_frame().unwrap();
//! parent.install(va, f.base(), PageEntryBits::new_user_rw()).unwrap();
//!
//! let cow = frames.cow();
//! cow.share_page(&mut parent, &mut child, va).unwrap();
//! assert_eq!(is_cow_page(&child, va), Ok(true));
//!
//! // The child writes: it gets its own copy.
//! let g = cow.resolve_cow_fault(&mut child, va).unwrap();
//! assert_ne!(f, g);
//! // The parent writes: it is now the only sharer and keeps the frame.
//! assert_eq!(cow.resolve_cow_fault(&mut parent, va), Ok(f));
//! ```
//!
//! ## Integration Points
//! * **kernel-vmem**: page table entries, `AddressSpace`, `PhysMapper`
//! * **kernel-info**: memory layout and its validation
//! * **kernel-sync**: the spin locks guarding the free list and counts

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod cow;
pub mod frame_alloc;
pub mod free_list;
pub mod phys_mapper;
pub mod refcount;

pub use crate::cow::{CowFaultError, CowCheckError, CowResolver, ShareError, is_cow_page};
pub use crate::frame_alloc::{FrameAllocator, FrameError, KernelFrameAllocator};
