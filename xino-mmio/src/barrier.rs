//! AArch64 barrier family
//!
//! Families provided, Linux-like intent:
//! - `mb()` / `rmb()` / `wmb()`: strong system barriers (DSB).
//! - `smp_mb()` / `smp_rmb()` / `smp_wmb()`: inter-CPU ordering on normal
//!   cacheable memory (DMB ISH*); compiler fences in non-SMP builds.
//! - `dma_mb()` / `dma_rmb()` / `dma_wmb()`: device-visible ordering
//!   (DMB OSH*).
//! - `iomb()` / `iormb()` / `iowmb()`: aliases of the dma_* family used by
//!   the MMIO accessors.
//!
//! OSH* orders relative to devices and DMA; ISH* orders between CPUs on
//! normal memory; DSB is completion, DMB is ordering only.

#[cfg(target_arch = "aarch64")]
use core::arch::asm;

/// Compiler barrier: no codegen, no reordering across it.
#[inline(always)]
pub fn barrier() {
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

macro_rules! barrier_fn {
    ($(#[$doc:meta])* $name:ident, $insn:literal) => {
        $(#[$doc])*
        #[inline(always)]
        pub fn $name() {
            #[cfg(target_arch = "aarch64")]
            // SAFETY: barriers only constrain ordering; no other effects.
            unsafe {
                asm!($insn, options(nostack, preserves_flags));
            }
            #[cfg(not(target_arch = "aarch64"))]
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    };
}

// Raw generators, one per (kind, domain) pair the µkernel uses.

barrier_fn!(/// `DSB SY`: full-system completion barrier.
    dsb_sy, "dsb sy");
barrier_fn!(/// `DSB LD`: full-system completion barrier for loads.
    dsb_ld, "dsb ld");
barrier_fn!(/// `DSB ST`: full-system completion barrier for stores.
    dsb_st, "dsb st");
barrier_fn!(/// `DSB ISH`: inner-shareable completion barrier.
    dsb_ish, "dsb ish");
barrier_fn!(/// `DSB ISHST`: inner-shareable completion barrier for stores.
    dsb_ishst, "dsb ishst");
barrier_fn!(/// `DMB ISH`: inner-shareable ordering barrier.
    dmb_ish, "dmb ish");
barrier_fn!(/// `DMB ISHLD`: inner-shareable ordering barrier for loads.
    dmb_ishld, "dmb ishld");
barrier_fn!(/// `DMB ISHST`: inner-shareable ordering barrier for stores.
    dmb_ishst, "dmb ishst");
barrier_fn!(/// `DMB OSH`: outer-shareable ordering barrier.
    dmb_osh, "dmb osh");
barrier_fn!(/// `DMB OSHLD`: outer-shareable ordering barrier for loads.
    dmb_oshld, "dmb oshld");
barrier_fn!(/// `DMB OSHST`: outer-shareable ordering barrier for stores.
    dmb_oshst, "dmb oshst");
barrier_fn!(/// `ISB`: instruction synchronization barrier (pipeline flush).
    isb, "isb");

// Strong system barriers.

#[inline(always)]
pub fn mb() {
    dsb_sy();
}

#[inline(always)]
pub fn rmb() {
    dsb_ld();
}

#[inline(always)]
pub fn wmb() {
    dsb_st();
}

// DMA and IO barriers.

#[inline(always)]
pub fn dma_mb() {
    dmb_osh();
}

#[inline(always)]
pub fn dma_rmb() {
    dmb_oshld();
}

#[inline(always)]
pub fn dma_wmb() {
    dmb_oshst();
}

#[inline(always)]
pub fn iomb() {
    dma_mb();
}

#[inline(always)]
pub fn iormb() {
    dma_rmb();
}

#[inline(always)]
pub fn iowmb() {
    dma_wmb();
}

// SMP barriers.

#[cfg(feature = "smp")]
#[inline(always)]
pub fn smp_mb() {
    dmb_ish();
}

#[cfg(feature = "smp")]
#[inline(always)]
pub fn smp_rmb() {
    dmb_ishld();
}

#[cfg(feature = "smp")]
#[inline(always)]
pub fn smp_wmb() {
    dmb_ishst();
}

#[cfg(not(feature = "smp"))]
#[inline(always)]
pub fn smp_mb() {
    barrier();
}

#[cfg(not(feature = "smp"))]
#[inline(always)]
pub fn smp_rmb() {
    barrier();
}

#[cfg(not(feature = "smp"))]
#[inline(always)]
pub fn smp_wmb() {
    barrier();
}
