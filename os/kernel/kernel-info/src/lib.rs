//! # Kernel Memory Configuration
//!
//! Boundary constants shared by the frame allocator, the page-table
//! interface and the copy-on-write fault path.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000     ┌─────────────────────────────────┐
//!                 │     Low Memory (< 1MiB)         │
//! PHYS_LOAD       ├─────────────────────────────────┤ 0x0010_0000 (1 MiB)
//!                 │       Kernel Image              │
//!                 │   (Text, Data, BSS)             │
//! KERNEL_PHYS_END ├─────────────────────────────────┤
//!                 │    Available RAM                │
//!                 │  (Managed by frame allocator)   │
//! PHYS_CEILING    └─────────────────────────────────┘
//! ```
//!
//! Everything in `[KERNEL_PHYS_END, PHYS_CEILING)` is handed to the frame
//! allocator at boot. The per-frame tables are nevertheless sized for the
//! whole range starting at physical zero, so slots below the kernel end exist
//! but are never touched.
//!
//! ## Runtime Layout
//!
//! The constants describe the default machine. Code that needs to run against
//! a different layout (most notably tests backed by a simulated RAM) uses a
//! [`MemoryLayout`](memory::MemoryLayout) value instead and validates it once
//! with [`MemoryLayout::validate`](memory::MemoryLayout::validate).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
