//! CPU feature negotiation and translation-register assembly
//!
//! Each CPU reads its ID registers, derives the PA/IPA widths, and
//! precomputes MAIR_EL2, TCR_EL2 (VHE layout), and VTCR_EL2. The shared
//! [`CpuState`] holds the least-common feature set: the first CPU writes
//! it in full, later CPUs may only narrow it. Missing VHE or an
//! impossible stage-2 start level is fatal.

use tock_registers::interfaces::{ReadWriteable, Readable};
use tock_registers::register_bitfields;
use tock_registers::registers::InMemoryRegister;

use xino_arch::cpu;
use xino_arch::registers as regs;
use xino_arch::SpinLock;
use xino_common::config::{PAGE_SHIFT, VA_BITS};
use xino_common::PhysAddr;
use xino_mmio::barrier::isb;
use xino_paging::geometry::root_hw_level_for_bits;

register_bitfields![u64,
    /// TCR_EL2 when E2H is set (VHE): the TCR_EL1-like layout.
    TcrEl2Vhe [
        T0SZ OFFSET(0) NUMBITS(6) [],
        IRGN0 OFFSET(8) NUMBITS(2) [
            WriteBackWriteAlloc = 0b01
        ],
        ORGN0 OFFSET(10) NUMBITS(2) [
            WriteBackWriteAlloc = 0b01
        ],
        SH0 OFFSET(12) NUMBITS(2) [
            InnerShareable = 0b11
        ],
        TG0 OFFSET(14) NUMBITS(2) [
            Granule4K = 0b00,
            Granule16K = 0b10
        ],
        T1SZ OFFSET(16) NUMBITS(6) [],
        IRGN1 OFFSET(24) NUMBITS(2) [
            WriteBackWriteAlloc = 0b01
        ],
        ORGN1 OFFSET(26) NUMBITS(2) [
            WriteBackWriteAlloc = 0b01
        ],
        SH1 OFFSET(28) NUMBITS(2) [
            InnerShareable = 0b11
        ],
        TG1 OFFSET(30) NUMBITS(2) [
            Granule16K = 0b01,
            Granule4K = 0b10
        ],
        IPS OFFSET(32) NUMBITS(3) []
    ],

    VtcrEl2 [
        T0SZ OFFSET(0) NUMBITS(6) [],
        SL0 OFFSET(6) NUMBITS(2) [],
        IRGN0 OFFSET(8) NUMBITS(2) [
            WriteBackWriteAlloc = 0b01
        ],
        ORGN0 OFFSET(10) NUMBITS(2) [
            WriteBackWriteAlloc = 0b01
        ],
        SH0 OFFSET(12) NUMBITS(2) [
            InnerShareable = 0b11
        ],
        TG0 OFFSET(14) NUMBITS(2) [
            Granule4K = 0b00,
            Granule16K = 0b10
        ],
        PS OFFSET(16) NUMBITS(3) []
    ]
];

/// Least-common feature set across the CPUs seen so far.
#[derive(Clone, Copy, Debug)]
pub struct CpuState {
    /// 0 ⇔ no CPU has negotiated yet.
    pub pa_bits: u32,
    pub ipa_bits: u32,
    pub feat_vhe: bool,
    pub mair_el2: u64,
    pub tcr_el2: u64,
    pub vtcr_el2: u64,
}

impl CpuState {
    const fn empty() -> Self {
        Self {
            pa_bits: 0,
            ipa_bits: 0,
            feat_vhe: false,
            mair_el2: 0,
            tcr_el2: 0,
            vtcr_el2: 0,
        }
    }
}

static CPU_STATE: SpinLock<CpuState> = SpinLock::new(CpuState::empty());

/// Snapshot of the negotiated state.
#[must_use]
pub fn cpu_state() -> CpuState {
    *CPU_STATE.lock()
}

// ID_AA64MMFR0_EL1 field decoding.

/// PA width from ID_AA64MMFR0_EL1.PARange; 52/56-bit parts are clamped
/// to the 48-bit output addresses the descriptors carry.
fn parange_bits(mmfr0: u64) -> u32 {
    match mmfr0 & 0xf {
        0b0000 => 32,
        0b0001 => 36,
        0b0010 => 40,
        0b0011 => 42,
        0b0100 => 44,
        _ => 48,
    }
}

/// TCR_EL2.IPS / VTCR_EL2.PS encoding for a PA width.
fn ps_for_bits(bits: u32) -> u64 {
    match bits {
        0..=32 => 0b000,
        33..=36 => 0b001,
        37..=40 => 0b010,
        41..=42 => 0b011,
        43..=44 => 0b100,
        _ => 0b101,
    }
}

fn gran4_s1_supported(mmfr0: u64) -> bool {
    // 0b1111 is "not supported"; 0b0000 and 0b0001 (52-bit) are.
    (mmfr0 >> 28) & 0xf != 0b1111
}

fn gran16_s1_supported(mmfr0: u64) -> bool {
    // 0b0000 is "not supported".
    (mmfr0 >> 20) & 0xf != 0b0000
}

fn gran4_s2_supported(mmfr0: u64) -> bool {
    match (mmfr0 >> 40) & 0xf {
        0b0000 => gran4_s1_supported(mmfr0), // as TGran4
        0b0001 => false,
        _ => true,
    }
}

fn gran16_s2_supported(mmfr0: u64) -> bool {
    match (mmfr0 >> 32) & 0xf {
        0b0000 => gran16_s1_supported(mmfr0), // as TGran16
        0b0001 => false,
        _ => true,
    }
}

fn granule_supported(mmfr0: u64) -> bool {
    if PAGE_SHIFT == 12 {
        gran4_s1_supported(mmfr0) && gran4_s2_supported(mmfr0)
    } else {
        gran16_s1_supported(mmfr0) && gran16_s2_supported(mmfr0)
    }
}

fn vhe_supported(mmfr1: u64) -> bool {
    (mmfr1 >> 8) & 0xf != 0
}

/// ID_AA64MMFR2_EL1.ST: small translation tables (SL0 == 0b11 legal).
fn st_supported(mmfr2: u64) -> bool {
    (mmfr2 >> 28) & 0xf != 0
}

/// MAIR_EL2: Attr0 = Normal write-back (0xff), Attr1 = Device-nGnRnE
/// (0x00). Must stay in sync with the descriptor AttrIdx convention.
fn make_mair_el2() -> u64 {
    let attr_normal: u64 = 0xff;
    let attr_device: u64 = 0x00;
    attr_normal | (attr_device << 8)
}

/// TCR_EL2 under VHE: both halves WBWA, inner-shareable, configured
/// granule, T0SZ = T1SZ = 64 − VA bits, IPS from the PA width.
fn make_tcr_el2(pa_bits: u32, va_bits: u32) -> u64 {
    let tcr = InMemoryRegister::<u64, TcrEl2Vhe::Register>::new(0);

    tcr.modify(
        TcrEl2Vhe::T0SZ.val((64 - va_bits) as u64)
            + TcrEl2Vhe::IRGN0::WriteBackWriteAlloc
            + TcrEl2Vhe::ORGN0::WriteBackWriteAlloc
            + TcrEl2Vhe::SH0::InnerShareable
            + TcrEl2Vhe::T1SZ.val((64 - va_bits) as u64)
            + TcrEl2Vhe::IRGN1::WriteBackWriteAlloc
            + TcrEl2Vhe::ORGN1::WriteBackWriteAlloc
            + TcrEl2Vhe::SH1::InnerShareable
            + TcrEl2Vhe::IPS.val(ps_for_bits(pa_bits)),
    );

    if PAGE_SHIFT == 12 {
        tcr.modify(TcrEl2Vhe::TG0::Granule4K + TcrEl2Vhe::TG1::Granule4K);
    } else {
        tcr.modify(TcrEl2Vhe::TG0::Granule16K + TcrEl2Vhe::TG1::Granule16K);
    }

    tcr.get()
}

/// VTCR_EL2.SL0 for the stage-2 root level implied by the IPA width.
///
/// `None` when the granule/root-level combination has no encoding (or
/// needs the ST feature the CPU lacks); the caller treats that as
/// fatal.
fn vtcr_sl0(ipa_bits: u32, st: bool) -> Option<u64> {
    let root = root_hw_level_for_bits(ipa_bits);

    if PAGE_SHIFT == 12 {
        match root {
            0 => Some(0b10),
            1 => Some(0b01),
            2 => Some(0b00),
            3 if st => Some(0b11),
            _ => None,
        }
    } else {
        match root {
            1 => Some(0b10),
            2 => Some(0b01),
            3 => Some(0b00),
            _ => None,
        }
    }
}

/// VTCR_EL2: WBWA, inner-shareable, configured granule,
/// T0SZ = 64 − IPA bits, SL0 per the root level, PS from the PA width.
fn make_vtcr_el2(pa_bits: u32, ipa_bits: u32, st: bool) -> Option<u64> {
    let vtcr = InMemoryRegister::<u64, VtcrEl2::Register>::new(0);

    vtcr.modify(
        VtcrEl2::T0SZ.val((64 - ipa_bits) as u64)
            + VtcrEl2::SL0.val(vtcr_sl0(ipa_bits, st)?)
            + VtcrEl2::IRGN0::WriteBackWriteAlloc
            + VtcrEl2::ORGN0::WriteBackWriteAlloc
            + VtcrEl2::SH0::InnerShareable
            + VtcrEl2::PS.val(ps_for_bits(pa_bits)),
    );

    if PAGE_SHIFT == 12 {
        vtcr.modify(VtcrEl2::TG0::Granule4K);
    } else {
        vtcr.modify(VtcrEl2::TG0::Granule16K);
    }

    Some(vtcr.get())
}

/// Negotiate features on the calling CPU and fold them into the shared
/// state.
///
/// The first CPU writes the state in full. A later CPU with a narrower
/// PA width narrows `pa_bits` (and `ipa_bits` to the new minimum) and
/// recomputes TCR/VTCR; widening never happens. Callers serialize
/// bring-up so this completes strictly before dependent page-table
/// construction.
///
/// Panics (WFE sink) when run outside EL2, without VHE, with an
/// unsupported granule, or with no valid stage-2 start level.
pub fn init_paging() {
    if cpu::current_el() != 2 {
        cpu::panic();
    }

    let mmfr0 = regs::read_id_aa64mmfr0_el1();
    let mmfr1 = regs::read_id_aa64mmfr1_el1();
    let mmfr2 = regs::read_id_aa64mmfr2_el1();

    if !granule_supported(mmfr0) {
        cpu::panic();
    }
    if !vhe_supported(mmfr1) {
        cpu::panic();
    }

    let pa_bits = parange_bits(mmfr0);
    let va_bits = VA_BITS;
    // Cap the IPA width at what stage-1 can address and the CPU can
    // back; a wider stage-2 would only deepen its walk for nothing.
    let ipa_bits = va_bits.min(pa_bits);
    let st = st_supported(mmfr2);

    let mut state = CPU_STATE.lock();
    if state.pa_bits == 0 {
        // First CPU: write the state in full.
        let vtcr = match make_vtcr_el2(pa_bits, ipa_bits, st) {
            Some(v) => v,
            None => cpu::panic(),
        };
        *state = CpuState {
            pa_bits,
            ipa_bits,
            feat_vhe: true,
            mair_el2: make_mair_el2(),
            tcr_el2: make_tcr_el2(pa_bits, va_bits),
            vtcr_el2: vtcr,
        };
    } else if pa_bits < state.pa_bits {
        state.pa_bits = pa_bits;
        if ipa_bits < state.ipa_bits {
            state.ipa_bits = ipa_bits;
        }
        state.tcr_el2 = make_tcr_el2(pa_bits, va_bits);
        state.vtcr_el2 = match make_vtcr_el2(pa_bits, state.ipa_bits, st) {
            Some(v) => v,
            None => cpu::panic(),
        };
    }
}

/// Program MAIR/TCR/VTCR from the negotiated state on the calling CPU.
pub fn apply_translation_config() {
    let state = cpu_state();
    // SAFETY: the values were computed for this EL2/VHE configuration
    // and the MMU is still off.
    unsafe {
        regs::write_mair_el2(state.mair_el2);
        regs::write_tcr_el2(state.tcr_el2);
        regs::write_vtcr_el2(state.vtcr_el2);
    }
    isb();
}

fn ttbr_value(pa: PhysAddr, asid: u16) -> u64 {
    (pa.value() & 0x0000_ffff_ffff_fffe) | ((asid as u64) << 48)
}

/// Install TTBR1_EL2 (the µkernel's high half).
pub fn install_kernel_ttbr(root: PhysAddr, asid: u16) {
    // SAFETY: `root` is a live stage-1 root table.
    unsafe { regs::write_ttbr1_el2(ttbr_value(root, asid)) };
    isb();
}

/// Install TTBR0_EL2 (the low half: EL0, or the boot identity window).
pub fn install_user_ttbr(root: PhysAddr, asid: u16) {
    // SAFETY: `root` is a live stage-1 root table.
    unsafe { regs::write_ttbr0_el2(ttbr_value(root, asid)) };
    isb();
}

/// Install VTTBR_EL2 for a guest's stage-2 tables.
#[allow(dead_code)] // guest bring-up path
pub fn install_vttbr(root: PhysAddr, vmid: u16) {
    // SAFETY: `root` is a live stage-2 root table.
    unsafe { regs::write_vttbr_el2(ttbr_value(root, vmid)) };
    isb();
}

/// Turn on the MMU and caches: SCTLR_EL2.{M, C, I}.
pub fn enable_mmu() {
    const SCTLR_M: u64 = 1 << 0;
    const SCTLR_C: u64 = 1 << 2;
    const SCTLR_I: u64 = 1 << 12;

    let sctlr = regs::read_sctlr_el2() | SCTLR_M | SCTLR_C | SCTLR_I;
    // SAFETY: MAIR/TCR and the TTBRs were programmed by the caller.
    unsafe { regs::write_sctlr_el2(sctlr) };
    isb();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parange_decode_clamps_to_48() {
        assert_eq!(parange_bits(0b0000), 32);
        assert_eq!(parange_bits(0b0010), 40);
        assert_eq!(parange_bits(0b0101), 48);
        assert_eq!(parange_bits(0b0110), 48); // 52-bit parts clamp
        assert_eq!(parange_bits(0b0111), 48); // 56-bit parts clamp
    }

    #[test]
    fn ps_encoding() {
        assert_eq!(ps_for_bits(32), 0b000);
        assert_eq!(ps_for_bits(36), 0b001);
        assert_eq!(ps_for_bits(40), 0b010);
        assert_eq!(ps_for_bits(42), 0b011);
        assert_eq!(ps_for_bits(44), 0b100);
        assert_eq!(ps_for_bits(48), 0b101);
    }

    #[test]
    #[cfg(not(feature = "granule-16k"))]
    fn tcr_fields_for_48_39() {
        let tcr = make_tcr_el2(48, 39);
        assert_eq!(tcr & 0x3f, 25); // T0SZ
        assert_eq!((tcr >> 16) & 0x3f, 25); // T1SZ
        assert_eq!((tcr >> 8) & 0x3, 0b01); // IRGN0 WBWA
        assert_eq!((tcr >> 10) & 0x3, 0b01); // ORGN0 WBWA
        assert_eq!((tcr >> 12) & 0x3, 0b11); // SH0 inner
        assert_eq!((tcr >> 14) & 0x3, 0b00); // TG0 4K
        assert_eq!((tcr >> 28) & 0x3, 0b11); // SH1 inner
        assert_eq!((tcr >> 30) & 0x3, 0b10); // TG1 4K
        assert_eq!((tcr >> 32) & 0x7, 0b101); // IPS 48-bit
    }

    #[test]
    #[cfg(not(feature = "granule-16k"))]
    fn vtcr_fields_for_48_39() {
        let vtcr = make_vtcr_el2(48, 39, false).unwrap();
        assert_eq!(vtcr & 0x3f, 25); // T0SZ
        assert_eq!((vtcr >> 6) & 0x3, 0b01); // SL0: root at level 1
        assert_eq!((vtcr >> 12) & 0x3, 0b11); // SH0 inner
        assert_eq!((vtcr >> 14) & 0x3, 0b00); // TG0 4K
        assert_eq!((vtcr >> 16) & 0x7, 0b101); // PS 48-bit

        // A 30-bit IPA walk roots at level 2.
        let vtcr = make_vtcr_el2(40, 30, false).unwrap();
        assert_eq!((vtcr >> 6) & 0x3, 0b00);
        assert_eq!((vtcr >> 16) & 0x7, 0b010);
    }

    #[test]
    #[cfg(not(feature = "granule-16k"))]
    fn sl0_needs_st_for_level3_roots() {
        // A 21-bit IPA would root at hardware level 3.
        assert_eq!(vtcr_sl0(21, true), Some(0b11));
        assert_eq!(vtcr_sl0(21, false), None);
    }

    #[test]
    fn granule_checks() {
        // TGran4 = 0, TGran4_2 = 2 (supported), TGran16 = 1.
        let mmfr0: u64 = (0b0010 << 40) | (0b0001 << 20);
        assert!(gran4_s1_supported(mmfr0));
        assert!(gran4_s2_supported(mmfr0));
        assert!(gran16_s1_supported(mmfr0));

        // TGran4 = 0b1111: no 4K at stage 1, and TGran4_2 = 0 defers.
        let no4k: u64 = 0b1111 << 28;
        assert!(!gran4_s1_supported(no4k));
        assert!(!gran4_s2_supported(no4k));
    }

    #[test]
    fn ttbr_packs_base_and_asid() {
        let v = ttbr_value(PhysAddr::new(0x8000_1000), 5);
        assert_eq!(v & 0x0000_ffff_ffff_fffe, 0x8000_1000);
        assert_eq!(v >> 48, 5);
    }
}
