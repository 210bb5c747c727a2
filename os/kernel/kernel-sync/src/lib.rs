//! # Kernel synchronization primitives
//!
//! A single primitive: a named, test-and-test-and-set [`SpinLock`].
//! Critical sections guarded by it are expected to be short and must never
//! block; nesting of different locks follows whatever order the owning
//! subsystem documents.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
