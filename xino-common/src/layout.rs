//! µkernel virtual address layout
//!
//! The µkernel owns the top `1 << VA_BITS` bytes of the virtual address
//! space, `[UKERNEL_VA_START, UKERNEL_VA_END]`. Within it, top-down:
//!
//! ```text
//! UKERNEL_VA_END   ─┬─ image window   [UKIMAGE_VA   .. UKIMAGE_END]
//!                   ├─ device window  [DEVMAP_VA    .. DEVMAP_END]
//! UKERNEL_VA_START ─┴─ direct map     [PAGE_OFFSET  .. PAGE_END]
//! ```
//!
//! The runtime image bases ([`ukimage_va_base`], [`ukimage_pa_base`]) are
//! fixed once by [`init`] while the MMU is still off; the PA↔VA helpers
//! take an explicit `mmu_on` flag so a caller's translation policy cannot
//! drift silently between boot phases.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::addr::{PhysAddr, VirtAddr};
use crate::config::{DEVMAP_SLOT_SIZE, KIMAGE_SLOT_SIZE, PAGE_SIZE, VA_BITS};

/// Size in bytes of the µkernel virtual address space.
pub const UKERNEL_VA_SIZE: u64 = 1u64 << VA_BITS;

/// Last valid µkernel VA (inclusive).
pub const UKERNEL_VA_END: VirtAddr = VirtAddr::new(!0);

/// First µkernel VA.
pub const UKERNEL_VA_START: VirtAddr = VirtAddr::new(!(UKERNEL_VA_SIZE - 1));

/// Image mapping window `[UKIMAGE_VA, UKIMAGE_END]` (inclusive).
pub const UKIMAGE_END: VirtAddr = UKERNEL_VA_END;
pub const UKIMAGE_VA: VirtAddr = VirtAddr::new(UKIMAGE_END.value() - KIMAGE_SLOT_SIZE + 1);

/// Device mapping window `[DEVMAP_VA, DEVMAP_END]` (inclusive).
pub const DEVMAP_END: VirtAddr = VirtAddr::new(UKIMAGE_VA.value() - 1);
pub const DEVMAP_VA: VirtAddr = VirtAddr::new(DEVMAP_END.value() - DEVMAP_SLOT_SIZE + 1);

/// Direct-map window `[PAGE_OFFSET, PAGE_END]` (inclusive).
pub const PAGE_OFFSET: VirtAddr = UKERNEL_VA_START;
pub const PAGE_END: VirtAddr = VirtAddr::new(DEVMAP_VA.value() - 1);

const _: () = assert!(UKERNEL_VA_SIZE > KIMAGE_SLOT_SIZE + DEVMAP_SLOT_SIZE);

// Runtime layout state, written once by `init` before the MMU is enabled.

static UKIMAGE_VA_BASE: AtomicU64 = AtomicU64::new(UKIMAGE_VA.value());
static UKIMAGE_PA_BASE: AtomicU64 = AtomicU64::new(0);
static UKIMAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Runtime VA base of the µkernel image mapping.
///
/// The image may be placed anywhere inside the fixed image window (a
/// hook for future VA randomization); this is the chosen base.
#[inline]
#[must_use]
pub fn ukimage_va_base() -> VirtAddr {
    VirtAddr::new(UKIMAGE_VA_BASE.load(Ordering::Relaxed))
}

/// Runtime PA base of the µkernel image (its load address).
#[inline]
#[must_use]
pub fn ukimage_pa_base() -> PhysAddr {
    PhysAddr::new(UKIMAGE_PA_BASE.load(Ordering::Relaxed))
}

/// Size in bytes of the loaded µkernel image.
#[inline]
#[must_use]
pub fn ukimage_size() -> usize {
    UKIMAGE_SIZE.load(Ordering::Relaxed)
}

/// Fix the runtime layout bases while the MMU is off.
///
/// `pa_base` is the physical load address of the image (with the MMU off,
/// the runtime address of `__image_start` *is* the load PA), `va_base`
/// the chosen image VA, `size` the image extent in bytes.
///
/// Returns `false` if `va_base` is not granule-aligned or the image does
/// not fit in the image window.
pub fn init(pa_base: PhysAddr, va_base: VirtAddr, size: usize) -> bool {
    if !va_base.is_aligned(PAGE_SIZE as u64) {
        return false;
    }
    if va_base < UKIMAGE_VA || (UKIMAGE_END - va_base) as u64 + 1 < size as u64 {
        return false;
    }

    UKIMAGE_PA_BASE.store(pa_base.value(), Ordering::Relaxed);
    UKIMAGE_VA_BASE.store(va_base.value(), Ordering::Relaxed);
    UKIMAGE_SIZE.store(size, Ordering::Relaxed);
    true
}

/// Does `va` fall in the runtime image mapping?
#[inline]
#[must_use]
pub fn is_ukimage(va: VirtAddr) -> bool {
    let base = ukimage_va_base();
    va >= base && (va - base) as u64 <= KIMAGE_SLOT_SIZE - 1
}

/// Does `va` fall in the device window?
#[inline]
#[must_use]
pub fn is_devmap(va: VirtAddr) -> bool {
    va >= DEVMAP_VA && va <= DEVMAP_END
}

/// Does `va` fall in the direct-map window?
#[inline]
#[must_use]
pub fn is_direct_map(va: VirtAddr) -> bool {
    va >= PAGE_OFFSET && va <= PAGE_END
}

/// Convert a physical address to a usable virtual address.
///
/// Identity while the MMU is off, direct-map once it is on.
#[inline]
#[must_use]
pub fn phys_to_virt(pa: PhysAddr, mmu_on: bool) -> VirtAddr {
    if !mmu_on {
        return VirtAddr::new(pa.value());
    }
    PAGE_OFFSET + pa.value()
}

/// Convert a virtual address back to its physical address.
///
/// With the MMU on, only direct-map and image-window addresses have a
/// known PA; anything else (devmap included) yields `None`.
#[inline]
#[must_use]
pub fn virt_to_phys(va: VirtAddr, mmu_on: bool) -> Option<PhysAddr> {
    if !mmu_on {
        return Some(PhysAddr::new(va.value()));
    }

    if is_direct_map(va) {
        return Some(PhysAddr::new(va.value() - PAGE_OFFSET.value()));
    }

    if is_ukimage(va) {
        let off = (va - ukimage_va_base()) as u64;
        return Some(ukimage_pa_base() + off);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_are_disjoint_and_cover_the_space() {
        assert!(PAGE_OFFSET < PAGE_END);
        assert_eq!(PAGE_END.value() + 1, DEVMAP_VA.value());
        assert_eq!(DEVMAP_END.value() + 1, UKIMAGE_VA.value());
        assert_eq!(UKIMAGE_END, UKERNEL_VA_END);
        assert_eq!(PAGE_OFFSET, UKERNEL_VA_START);
    }

    #[test]
    fn identity_translation_with_mmu_off() {
        let pa = PhysAddr::new(0x8000_0000);
        assert_eq!(phys_to_virt(pa, false).value(), pa.value());
        assert_eq!(
            virt_to_phys(VirtAddr::new(0x8000_0000), false),
            Some(pa)
        );
    }

    #[test]
    fn direct_map_round_trip() {
        let pa = PhysAddr::new(0x4020_0000);
        let va = phys_to_virt(pa, true);
        assert!(is_direct_map(va));
        assert_eq!(virt_to_phys(va, true), Some(pa));
    }

    #[test]
    fn image_window_translation() {
        assert!(init(
            PhysAddr::new(0x8020_0000),
            UKIMAGE_VA,
            0x20_0000
        ));
        let va = ukimage_va_base() + 0x1234u64;
        assert!(is_ukimage(va));
        assert_eq!(
            virt_to_phys(va, true),
            Some(PhysAddr::new(0x8020_0000 + 0x1234))
        );
    }

    #[test]
    fn devmap_has_no_reverse_mapping() {
        assert!(is_devmap(DEVMAP_VA));
        assert_eq!(virt_to_phys(DEVMAP_VA, true), None);
    }
}
