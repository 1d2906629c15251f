//! CPU control
//!
//! Wait/event primitives, interrupt masking, EL inspection, the TLB
//! invalidation operations used by the page-table engine, and the single
//! fatal-error sink every unrecoverable path converges on.

#[cfg(target_arch = "aarch64")]
use core::arch::asm;

use xino_common::{IpaAddr, VirtAddr};

/// Saved DAIF state returned by [`irq_save`].
pub type IrqFlags = u64;

/// Wait for event.
///
/// `WFE` checks a 1-bit local event register: if it is set, `WFE` clears
/// it and returns immediately; if clear, the core may sleep until an
/// event arrives (`SEV`, interrupt, ...).
#[inline(always)]
pub fn wfe() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: WFE is always safe to execute.
    unsafe {
        asm!("wfe", options(nomem, nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    core::hint::spin_loop();
}

/// Send event to all cores.
#[inline(always)]
pub fn sev() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: SEV is always safe to execute.
    unsafe {
        asm!("sev", options(nomem, nostack));
    }
}

/// Set the local core's event register.
///
/// `SEVL` guarantees the *next* `WFE` cannot block. Used to prevent
/// "sleep too long" hazards in `WFE` wait loops (see `SpinLock::lock`).
#[inline(always)]
pub fn sevl() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: SEVL is always safe to execute.
    unsafe {
        asm!("sevl", options(nomem, nostack));
    }
}

/// Wait for interrupt.
#[inline(always)]
pub fn wfi() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: WFI is always safe to execute.
    unsafe {
        asm!("wfi", options(nomem, nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    core::hint::spin_loop();
}

/// Current exception level (0..3).
#[cfg(target_arch = "aarch64")]
#[must_use]
pub fn current_el() -> u8 {
    use aarch64_cpu::registers::CurrentEL;
    use tock_registers::interfaces::Readable;

    ((CurrentEL.get() >> 2) & 0x3) as u8
}

#[cfg(not(target_arch = "aarch64"))]
#[must_use]
pub fn current_el() -> u8 {
    2
}

/// Save DAIF and mask IRQ and FIQ.
///
/// Returns the previous DAIF value for [`irq_restore`].
#[inline(always)]
#[must_use]
pub fn irq_save() -> IrqFlags {
    #[cfg(target_arch = "aarch64")]
    {
        use aarch64_cpu::registers::DAIF;
        use tock_registers::interfaces::Readable;

        let flags = DAIF.get();
        // SAFETY: masking IRQ/FIQ at EL2 has no memory effects.
        unsafe {
            asm!("msr daifset, #0x3", options(nomem, nostack));
        }
        flags
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        0
    }
}

/// Restore DAIF exactly as saved by [`irq_save`].
#[inline(always)]
pub fn irq_restore(flags: IrqFlags) {
    #[cfg(target_arch = "aarch64")]
    {
        use aarch64_cpu::registers::DAIF;
        use tock_registers::interfaces::Writeable;

        DAIF.set(flags);
    }
    #[cfg(not(target_arch = "aarch64"))]
    let _ = flags;
}

/// Fatal-error sink: spin in `WFE` forever.
///
/// All unrecoverable boot conditions (reserved relocation type, missing
/// VHE, impossible stage-2 start level) converge here.
#[inline]
pub fn panic() -> ! {
    loop {
        wfe();
    }
}

// TLB maintenance. The bulk operations are framed by the caller
// (`dsb ishst` before, `dsb ish; isb` after); these are the bare TLBI
// instructions.

/// Invalidate all stage-1 EL2 translations, inner-shareable
/// (`TLBI ALLE2IS`).
#[inline(always)]
pub fn tlbi_alle2is() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: TLB invalidation has no effect beyond translation caching.
    unsafe {
        asm!("tlbi alle2is", options(nostack));
    }
}

/// Invalidate all stage-1 and stage-2 translations for the current VMID,
/// inner-shareable (`TLBI VMALLS12E1IS`).
#[inline(always)]
pub fn tlbi_vmalls12e1is() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: TLB invalidation has no effect beyond translation caching.
    unsafe {
        asm!("tlbi vmalls12e1is", options(nostack));
    }
}

/// Invalidate one stage-1 EL2 translation by VA and ASID,
/// inner-shareable (`TLBI VAE2IS`).
///
/// The operand packs `arg[43:0] = va[55:12]`, `arg[47:44] = TTL hint`
/// (0 = any level), `arg[63:48] = ASID`.
#[inline(always)]
pub fn tlbi_vae2is(va: VirtAddr, asid: u16) {
    let mut arg: u64 = (va.value() >> 12) & ((1u64 << 44) - 1);
    arg |= (asid as u64) << 48;
    #[cfg(target_arch = "aarch64")]
    // SAFETY: TLB invalidation has no effect beyond translation caching.
    unsafe {
        asm!("tlbi vae2is, {}", in(reg) arg, options(nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    let _ = arg;
}

/// Invalidate stage-2 translations by IPA, inner-shareable
/// (`TLBI IPAS2E1IS`).
///
/// The operand packs `arg[43:0] = ipa[55:12]`, `arg[47:44] = TTL hint`
/// (0 = any level).
#[inline(always)]
pub fn tlbi_ipas2e1is(ipa: IpaAddr) {
    let arg: u64 = (ipa.value() >> 12) & ((1u64 << 44) - 1);
    #[cfg(target_arch = "aarch64")]
    // SAFETY: TLB invalidation has no effect beyond translation caching.
    unsafe {
        asm!("tlbi ipas2e1is, {}", in(reg) arg, options(nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    let _ = arg;
}
