//! # xino-mmio
//!
//! Memory barriers and device-register access for AArch64.
//!
//! - [`barrier`]: the full barrier family (`mb`/`rmb`/`wmb`, `smp_*`,
//!   `dma_*`, `io*`, `isb`) plus the raw `dsb_*`/`dmb_*` generators
//! - [`access`]: raw / relaxed / ordered MMIO accessors with sized
//!   `read{b,w,l,q}` / `write{b,w,l,q}` helpers
//!
//! # Safety
//!
//! MMIO accessors assume the target address is a valid Device-nGnRE (or
//! stronger) mapping. Barriers themselves are always safe to execute.
//!
//! Host (non-AArch64) builds compile the barriers down to compiler
//! fences so the dependent logic can be unit-tested off-target.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod access;
pub mod barrier;

pub use access::{
    readb, readb_relaxed, readl, readl_relaxed, readq, readq_relaxed, readw, readw_relaxed,
    writeb, writeb_relaxed, writel, writel_relaxed, writeq, writeq_relaxed, writew,
    writew_relaxed,
};
