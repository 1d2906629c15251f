//! Early boot
//!
//! Everything between the stub's jump and the first line of `main`.
//! Code on this path runs with the MMU off and must not touch statics
//! whose initializers carry absolute addresses: relocations have
//! already been biased to the link-time VA, which only becomes
//! dereferenceable after the switch to the high-half alias.

pub mod reloc;

use xino_common::config::{PAGE_SIZE, UART_BASE, UKERNEL_BASE, VA_BITS};
use xino_common::{layout, PhysAddr, VirtAddr};

use xino_arch::cpu;

use crate::{features, logging, memory, percpu};

extern "C" {
    static __image_start: u8;
    static __image_end: u8;
}

/// Physical load base of the image. With the MMU off, the runtime
/// address of `__image_start` *is* the load PA.
fn image_pa() -> PhysAddr {
    PhysAddr::new(core::ptr::addr_of!(__image_start) as u64)
}

fn image_size() -> usize {
    let start = core::ptr::addr_of!(__image_start) as u64;
    let end = core::ptr::addr_of!(__image_end) as u64;
    (end - start) as usize
}

/// Boot entry, called from the asm stub with the FDT pointer (possibly
/// null) in `x0`.
///
/// # Safety
///
/// Must run exactly once, on the boot CPU, with the MMU off.
#[no_mangle]
pub unsafe extern "C" fn ukernel_boot(fdt: u64) -> ! {
    // SAFETY: single call, MMU off, image span from the linker.
    unsafe { reloc::apply_relocations() };

    if !layout::init(image_pa(), VirtAddr::new(UKERNEL_BASE), image_size()) {
        cpu::panic();
    }

    // Feature negotiation must precede any page-table construction.
    features::init_paging();

    memory::init_boot_heap();

    percpu::bootstrap_init();

    xino_pal::console::init(VirtAddr::new(UART_BASE));
    logging::init();

    log::info!("xino: image {:#x}+{:#x}, fdt {:#x}", image_pa().value(), image_size(), fdt);
    if fdt == 0 {
        log::warn!("booting without a device tree");
    }

    if let Err(e) = memory::init_kernel_tables() {
        log::error!("page-table construction failed: {}", e);
        cpu::panic();
    }

    memory::switch_to_virtual();

    // Continue at the image's high-half alias so relocated absolute
    // addresses become live. The boot stack stays reachable through the
    // TTBR0 identity mapping until the first real context switch.
    let off = runtime_entry_offset();
    let va = layout::ukimage_va_base() + off;
    // SAFETY: the image window maps this exact code at `va`.
    let entry: extern "C" fn(u64) -> ! = unsafe { core::mem::transmute(va.as_ptr::<()>()) };
    entry(fdt)
}

/// Image offset of [`crate::runtime::ukernel_entry`].
fn runtime_entry_offset() -> u64 {
    let f = crate::runtime::ukernel_entry as *const ();
    f as u64 - core::ptr::addr_of!(__image_start) as u64
}

// The boot flow is built for the two supported granule/VA pairs.
const _: () = assert!(VA_BITS == 39 || VA_BITS == 36);
const _: () = assert!(PAGE_SIZE.is_power_of_two());
