//! Instruction-cache maintenance
//!
//! After the UEFI stub writes the decompressed µkernel image, the
//! instruction stream must be made coherent with the data side before
//! jumping into the fresh code.

#[cfg(target_arch = "aarch64")]
use core::arch::asm;

use xino_mmio::barrier::{dsb_ish, isb};

/// Data cache minimum line size in bytes, from `CTR_EL0.DminLine`
/// (log2 of the number of 4-byte words per line).
#[inline]
#[must_use]
pub fn cache_line_size() -> usize {
    #[cfg(target_arch = "aarch64")]
    {
        4 << ((crate::registers::read_ctr_el0() >> 16) & 0xf)
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        64
    }
}

/// Make freshly written code fetchable.
///
/// Cleans the data cache to the point of unification over
/// `[base, base + size)` (one `DC CVAU` per `DminLine` bytes), then
/// invalidates the whole instruction cache inner-shareable and
/// synchronizes the fetch stream:
///
/// `DC CVAU` loop; `DSB ISH`; `IC IALLUIS`; `DSB ISH`; `ISB`.
///
/// CTR_EL0.IDC is deliberately ignored; we always clean to PoU.
///
/// # Safety
///
/// `[base, base + size)` must be mapped and writable in the current
/// translation regime.
pub unsafe fn clean_code_range(base: u64, size: usize) {
    let line = cache_line_size() as u64;
    let mut addr = base & !(line - 1);
    let end = base + size as u64;

    while addr < end {
        #[cfg(target_arch = "aarch64")]
        // SAFETY: DC CVAU on a mapped line is the caller's contract.
        unsafe {
            asm!("dc cvau, {}", in(reg) addr, options(nostack));
        }
        addr += line;
    }

    dsb_ish();

    #[cfg(target_arch = "aarch64")]
    // SAFETY: IC IALLUIS only affects instruction caching.
    unsafe {
        asm!("ic ialluis", options(nostack));
    }

    dsb_ish();
    isb();
}
