//! System register access
//!
//! Accessors for the EL2 translation registers and the ID registers the
//! feature-negotiation code reads, none of which are covered by the
//! `aarch64-cpu` register set this crate otherwise uses. Host builds
//! read zero and discard writes so dependent logic stays testable.

#[cfg(target_arch = "aarch64")]
use core::arch::asm;

macro_rules! sysreg_read {
    ($(#[$doc:meta])* $name:ident, $reg:literal) => {
        $(#[$doc])*
        #[inline]
        #[must_use]
        pub fn $name() -> u64 {
            #[cfg(target_arch = "aarch64")]
            {
                let v: u64;
                // SAFETY: reading this register at EL2 has no side effects.
                unsafe {
                    asm!(concat!("mrs {}, ", $reg), out(reg) v,
                         options(nomem, nostack, preserves_flags));
                }
                v
            }
            #[cfg(not(target_arch = "aarch64"))]
            0
        }
    };
}

macro_rules! sysreg_write {
    ($(#[$doc:meta])* $name:ident, $reg:literal) => {
        $(#[$doc])*
        ///
        /// # Safety
        ///
        /// The caller must ensure the value is architecturally valid and
        /// that writing it at this point of bring-up cannot break the
        /// currently active translation regime.
        #[inline]
        pub unsafe fn $name(v: u64) {
            #[cfg(target_arch = "aarch64")]
            // SAFETY: forwarded caller contract.
            unsafe {
                asm!(concat!("msr ", $reg, ", {}"), in(reg) v,
                     options(nomem, nostack, preserves_flags));
            }
            #[cfg(not(target_arch = "aarch64"))]
            let _ = v;
        }
    };
}

sysreg_read!(/// `ID_AA64MMFR0_EL1`: PARange, TGran4/16 (+ stage-2 variants).
    read_id_aa64mmfr0_el1, "id_aa64mmfr0_el1");
sysreg_read!(/// `ID_AA64MMFR1_EL1`: VH (VHE support).
    read_id_aa64mmfr1_el1, "id_aa64mmfr1_el1");
sysreg_read!(/// `ID_AA64MMFR2_EL1`: ST (small translation tables).
    read_id_aa64mmfr2_el1, "id_aa64mmfr2_el1");
sysreg_read!(/// `CTR_EL0`: cache type register (DminLine).
    read_ctr_el0, "ctr_el0");
sysreg_read!(/// `TPIDR_EL2`: per-CPU base register.
    read_tpidr_el2, "tpidr_el2");
sysreg_read!(/// `SCTLR_EL2`: system control register.
    read_sctlr_el2, "sctlr_el2");

sysreg_write!(/// Write `TPIDR_EL2` (per-CPU base).
    write_tpidr_el2, "tpidr_el2");
sysreg_write!(/// Write `MAIR_EL2`.
    write_mair_el2, "mair_el2");
sysreg_write!(/// Write `TCR_EL2`.
    write_tcr_el2, "tcr_el2");
sysreg_write!(/// Write `VTCR_EL2`.
    write_vtcr_el2, "vtcr_el2");
sysreg_write!(/// Write `TTBR0_EL2`.
    write_ttbr0_el2, "ttbr0_el2");
sysreg_write!(/// Write `TTBR1_EL2`.
    write_ttbr1_el2, "ttbr1_el2");
sysreg_write!(/// Write `VTTBR_EL2`.
    write_vttbr_el2, "vttbr_el2");
sysreg_write!(/// Write `SCTLR_EL2`.
    write_sctlr_el2, "sctlr_el2");
