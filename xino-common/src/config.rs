//! Compile-time configuration
//!
//! One place for the constants that shape the µkernel image and its
//! address space. The translation granule is selected by the
//! `granule-16k` cargo feature (4 KiB otherwise); everything granule- or
//! VA-width-derived must come from here.

/// Log2 of the translation granule.
#[cfg(not(feature = "granule-16k"))]
pub const PAGE_SHIFT: u32 = 12;
#[cfg(feature = "granule-16k")]
pub const PAGE_SHIFT: u32 = 14;

/// Translation granule in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Width of the µkernel virtual address space.
///
/// Chosen so the stage-1 walk starts at hardware level 1 (4 KiB granule)
/// or level 2 (16 KiB granule).
#[cfg(not(feature = "granule-16k"))]
pub const VA_BITS: u32 = 39;
#[cfg(feature = "granule-16k")]
pub const VA_BITS: u32 = 36;

/// Bytes reserved at the top of the VA space for the image mapping slot.
pub const KIMAGE_SLOT_SIZE: u64 = 512 * 1024 * 1024;

/// Bytes reserved below the image slot for device mappings.
pub const DEVMAP_SLOT_SIZE: u64 = 1024 * 1024 * 1024;

/// Link-time virtual base of the µkernel image. Must lie in the image
/// slot and be granule-aligned; the PIE relocator biases all absolute
/// relocations to this address.
pub const UKERNEL_BASE: u64 = !0 - KIMAGE_SLOT_SIZE + 1;

/// Physical alignment the UEFI stub guarantees for the loaded image.
pub const MIN_UKERNEL_ALIGN: usize = 2 * 1024 * 1024;

/// Size of the boot heap window `[__boot_heap_start, __boot_heap_end)`.
pub const BOOT_HEAP_SIZE: usize = 2 * 1024 * 1024;

/// Max order of the boot buddy: `2^BOOT_BUDDY_ORDER` pages.
pub const BOOT_BUDDY_ORDER: usize = {
    let pages = BOOT_HEAP_SIZE / PAGE_SIZE;
    let mut order = 0;
    let mut p = pages;
    while p > 1 {
        p >>= 1;
        order += 1;
    }
    order
};

/// Cache line size assumed for per-CPU layout and allocator alignment.
pub const CACHE_LINE: usize = 64;

/// MMIO base of the boot UART (QEMU virt PL011 by default).
pub const UART_BASE: u64 = 0x0900_0000;

const _: () = assert!(PAGE_SIZE.is_power_of_two());
const _: () = assert!(UKERNEL_BASE % PAGE_SIZE as u64 == 0);
const _: () = assert!(BOOT_HEAP_SIZE % PAGE_SIZE == 0);
const _: () = assert!((BOOT_HEAP_SIZE / PAGE_SIZE).is_power_of_two());
const _: () = assert!(MIN_UKERNEL_ALIGN % PAGE_SIZE == 0);
