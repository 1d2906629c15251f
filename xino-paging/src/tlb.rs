//! TLB maintenance
//!
//! Every operation is inner-shareable and framed by
//! `dsb(ishst)` … `dsb(ish); isb` so the descriptor stores that preceded
//! it are visible before invalidation and the invalidation completes
//! before execution continues.

use xino_arch::cpu;
use xino_common::config::PAGE_SIZE;
use xino_common::{AddrRange, IpaAddr, VirtAddr};
use xino_mmio::barrier::{dsb_ish, dsb_ishst, isb};

/// Invalidate all EL2 stage-1 translations.
pub fn invalidate_all_stage1() {
    dsb_ishst();
    cpu::tlbi_alle2is();
    dsb_ish();
    isb();
}

/// Invalidate stage-1 translations for a VA range, keyed by ASID.
pub fn invalidate_va_range(va: VirtAddr, size: usize, asid: u16) {
    let g = PAGE_SIZE as u64;
    let start = va.align_down(g);
    let end = va.wrapping_add(size as u64).align_up(g);

    dsb_ishst();
    for it in AddrRange::new(start, end, g) {
        cpu::tlbi_vae2is(it, asid);
    }
    dsb_ish();
    isb();
}

/// Invalidate all stage-2 (and associated stage-1) translations for the
/// current VMID.
pub fn invalidate_all_stage2() {
    dsb_ishst();
    cpu::tlbi_vmalls12e1is();
    dsb_ish();
    isb();
}

/// Invalidate stage-2 translations for an IPA range.
pub fn invalidate_ipa_range(ipa: IpaAddr, size: usize) {
    let g = PAGE_SIZE as u64;
    let start = ipa.align_down(g);
    let end = ipa.wrapping_add(size as u64).align_up(g);

    dsb_ishst();
    for it in AddrRange::new(start, end, g) {
        cpu::tlbi_ipas2e1is(it);
    }
    dsb_ish();
    isb();
}
