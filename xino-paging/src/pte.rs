//! Descriptor encoding (D8.3.1 VMSAv8-64 descriptor formats)
//!
//! A descriptor is one 64-bit word. Bits [1:0] select the form:
//!
//! | bits[1:0] | non-last level | last level |
//! |-----------|----------------|------------|
//! | `00`      | FAULT          | FAULT      |
//! | `01`      | BLOCK          | (reserved) |
//! | `11`      | TABLE          | PAGE       |
//!
//! The remaining bits split into the output-address window,
//! `[PAGE_SHIFT .. pa_bits-1]`, and the attribute window (everything
//! else). Both masks depend on the *negotiated* `pa_bits`, so they are
//! runtime functions rather than constants.

use xino_common::config::{PAGE_SHIFT, PAGE_SIZE};
use xino_common::{PhysAddr, Prot};

/// Underlying storage of a page-table entry.
pub type Pte = u64;

pub const PTE_TYPE_MASK: Pte = 0x3;
pub const PTE_TYPE_FAULT: Pte = 0x0;
pub const PTE_TYPE_BLOCK: Pte = 0x1;
pub const PTE_TYPE_PAGE_OR_TABLE: Pte = 0x3;

#[inline]
#[must_use]
pub const fn pte_is_fault(pte: Pte) -> bool {
    pte & PTE_TYPE_MASK == PTE_TYPE_FAULT
}

#[inline]
#[must_use]
pub const fn pte_is_block(pte: Pte) -> bool {
    pte & PTE_TYPE_MASK == PTE_TYPE_BLOCK
}

#[inline]
#[must_use]
pub const fn pte_is_table_or_page(pte: Pte) -> bool {
    pte & PTE_TYPE_MASK == PTE_TYPE_PAGE_OR_TABLE
}

// Stage 1 attribute fields (Figure D8-16).

pub const PTE_ATTRINDX_SHIFT: u32 = 2; // 3 bits
pub const PTE_AP_SHIFT: u32 = 6; // 2 bits
pub const PTE_SH_SHIFT: u32 = 8; // 2 bits
pub const PTE_AF_SHIFT: u32 = 10; // 1 bit
pub const PTE_NG_SHIFT: u32 = 11; // 1 bit
pub const PTE_PXN_SHIFT: u32 = 53; // 1 bit
pub const PTE_UXN_SHIFT: u32 = 54; // 1 bit

#[inline]
#[must_use]
pub const fn pte_attrindx(idx: u64) -> Pte {
    (idx & 0x7) << PTE_ATTRINDX_SHIFT
}

/// MAIR_EL2 attribute-index conventions; must match the value the
/// feature-negotiation code programs into MAIR_EL2.
pub const MAIR_IDX_NORMAL: u64 = 0; // Normal, WBWA
pub const MAIR_IDX_DEVICE: u64 = 1; // Device, nGnRnE

// D8.4.1.2.1 stage-1 data access permissions (Table D8-63).
pub const PTE_AP_RW_EL2: Pte = 0 << PTE_AP_SHIFT;
pub const PTE_AP_RW_EL0_EL2: Pte = 1 << PTE_AP_SHIFT;
pub const PTE_AP_RO_EL2: Pte = 2 << PTE_AP_SHIFT;
pub const PTE_AP_RO_EL0_EL2: Pte = 3 << PTE_AP_SHIFT;

// D8.6.2 stage-1 shareability (Table D8-95).
pub const PTE_SH_NON_SHAREABLE: Pte = 0 << PTE_SH_SHIFT;
pub const PTE_SH_OUTER_SHAREABLE: Pte = 2 << PTE_SH_SHIFT;
pub const PTE_SH_INNER_SHAREABLE: Pte = 3 << PTE_SH_SHIFT;

pub const PTE_AF: Pte = 1 << PTE_AF_SHIFT;
pub const PTE_NG: Pte = 1 << PTE_NG_SHIFT;
pub const PTE_PXN: Pte = 1 << PTE_PXN_SHIFT;
pub const PTE_UXN: Pte = 1 << PTE_UXN_SHIFT;

// Stage 2 attribute fields (Figure D8-17).

pub const PTE_S2_MEMATTR_SHIFT: u32 = 2; // 4 bits
pub const PTE_S2_AP_SHIFT: u32 = 6; // 2 bits
pub const PTE_S2_AF_SHIFT: u32 = 10; // 1 bit

#[inline]
#[must_use]
pub const fn pte_s2_memattr(attr: u64) -> Pte {
    (attr & 0xf) << PTE_S2_MEMATTR_SHIFT
}

// D8.6.5 stage-2 memory type with FWB disabled.
pub const S2_MEMATTR_DEVICE_NGNRNE: u64 = 0x0;
pub const S2_MEMATTR_NORMAL_WB: u64 = 0xf; // outer+inner write-back

// D8.4.2.1.1 stage-2 data access permissions (Table D8-76).
pub const PTE_S2_AP_RDONLY: Pte = 1 << PTE_S2_AP_SHIFT;
pub const PTE_S2_AP_RDWR: Pte = 3 << PTE_S2_AP_SHIFT;

pub const PTE_S2_AF: Pte = 1 << PTE_S2_AF_SHIFT;

/// Stage-2 XN. Architecturally XN is the 2-bit field [54:53]; writing
/// only bit 54 encodes "execute-never at EL1&0", the conservative
/// setting, and leaves XN[0] zero.
pub const PTE_S2_XN: Pte = PTE_UXN;

/// Mask selecting the output-address field `[PAGE_SHIFT .. pa_bits-1]`.
///
/// E.g. `0x0000_ffff_ffff_f000` for a 4 KiB granule and 48-bit PA.
#[inline]
#[must_use]
pub fn phys_field_mask(pa_bits: u32) -> Pte {
    let mask = (1u64 << pa_bits) - 1;
    let granule_mask = PAGE_SIZE as u64 - 1;
    mask & !granule_mask
}

/// Mask selecting the attribute window: everything that is neither the
/// output address nor the type bits.
#[inline]
#[must_use]
pub fn attr_field_mask(pa_bits: u32) -> Pte {
    !phys_field_mask(pa_bits) & !PTE_TYPE_MASK
}

/// Encode a physical address into the descriptor address field.
#[inline]
#[must_use]
pub fn phys_to_pte(pa: PhysAddr, pa_bits: u32) -> Pte {
    pa.value() & phys_field_mask(pa_bits)
}

/// Extract the output address from a descriptor.
#[inline]
#[must_use]
pub fn pte_to_phys(pte: Pte, pa_bits: u32) -> PhysAddr {
    PhysAddr::new(pte & phys_field_mask(pa_bits))
}

/// Make a table descriptor (next-level pointer, no attributes).
#[inline]
#[must_use]
pub fn make_table(pa: PhysAddr, pa_bits: u32) -> Pte {
    PTE_TYPE_PAGE_OR_TABLE | phys_to_pte(pa, pa_bits)
}

/// Make a page leaf from a prebuilt attribute word.
#[inline]
#[must_use]
pub fn make_leaf_page_attr(pa: PhysAddr, attr: Pte, pa_bits: u32) -> Pte {
    PTE_TYPE_PAGE_OR_TABLE | attr | phys_to_pte(pa, pa_bits)
}

/// Make a block leaf from a prebuilt attribute word.
#[inline]
#[must_use]
pub fn make_leaf_block_attr(pa: PhysAddr, attr: Pte, pa_bits: u32) -> Pte {
    PTE_TYPE_BLOCK | attr | phys_to_pte(pa, pa_bits)
}

/// Stage-1 attribute bits for `p`.
///
/// AttrIdx selects Normal/Device per the MAIR convention above, AF is
/// always set (no access-flag faulting), SH is inner-shareable for
/// `SHARED`. AP follows Table D8-63: `KERNEL` mappings use the EL2-only
/// encodings, everything else the EL0&EL2 encodings plus nG (per-ASID).
/// Without `EXECUTE` both PXN and UXN are set.
#[must_use]
pub fn stage1_attrs(p: Prot, device: bool) -> Pte {
    let mut pte: Pte = PTE_TYPE_FAULT;

    pte |= pte_attrindx(if device { MAIR_IDX_DEVICE } else { MAIR_IDX_NORMAL });
    pte |= PTE_AF;
    pte |= if p.has(Prot::SHARED) {
        PTE_SH_INNER_SHAREABLE
    } else {
        PTE_SH_NON_SHAREABLE
    };

    if p.has(Prot::KERNEL) {
        pte |= if p.has(Prot::WRITE) {
            PTE_AP_RW_EL2
        } else {
            PTE_AP_RO_EL2
        };
    } else {
        pte |= if p.has(Prot::WRITE) {
            PTE_AP_RW_EL0_EL2
        } else {
            PTE_AP_RO_EL0_EL2
        };
        pte |= PTE_NG; // user page
    }

    if !p.has(Prot::EXECUTE) {
        pte |= PTE_PXN | PTE_UXN;
    }

    pte
}

/// Stage-2 attribute bits for `p`.
///
/// S2MemAttr is Device-nGnRnE or Normal WB (FWB off), AF is always set.
/// S2AP: R+W ⇒ RDWR, R alone ⇒ RDONLY, otherwise no access. XN is set
/// when `EXECUTE` is absent.
#[must_use]
pub fn stage2_attrs(p: Prot, device: bool) -> Pte {
    let mut pte: Pte = PTE_TYPE_FAULT;

    pte |= pte_s2_memattr(if device {
        S2_MEMATTR_DEVICE_NGNRNE
    } else {
        S2_MEMATTR_NORMAL_WB
    });
    pte |= PTE_S2_AF;

    let rd = p.has(Prot::READ);
    let wr = p.has(Prot::WRITE);
    if rd && wr {
        pte |= PTE_S2_AP_RDWR;
    } else if rd {
        pte |= PTE_S2_AP_RDONLY;
    }
    // else 00 => no access

    if !p.has(Prot::EXECUTE) {
        pte |= PTE_S2_XN;
    }

    pte
}
