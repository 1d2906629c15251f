//! # xino-arch
//!
//! AArch64 EL2 architecture support for the xino µkernel.
//!
//! - [`cpu`]: event/wait primitives, DAIF masking, TLB invalidation,
//!   the panic sink
//! - [`registers`]: EL2 and feature system registers not covered by
//!   `aarch64-cpu`
//! - [`sync`]: the WFE/SEV spinlock
//! - [`cache`]: instruction-cache maintenance for freshly written code
//! - [`smccc`]: firmware service calls (SMC/HVC conduits)
//!
//! # Safety
//!
//! This crate contains extensive `unsafe` code for system-register and
//! cache access. All unsafe operations carry `// SAFETY:` comments with
//! the invariants that must hold.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cache;
pub mod cpu;
pub mod registers;
pub mod smccc;
pub mod sync;

pub use sync::{SpinLock, SpinLockGuard};
