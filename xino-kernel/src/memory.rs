//! Memory management
//!
//! The process-wide boot buddy over `[__boot_heap_start,
//! __boot_heap_end)`, the global allocator bridging Rust's `alloc` onto
//! it, and the construction of the stage-1 kernel tables.
//!
//! The buddy instance lives in zero-initialized static storage and is
//! armed by [`init_boot_heap`]; the lock around it is the only
//! synchronization the allocator has.

use core::alloc::{GlobalAlloc, Layout};

use xino_alloc::{words_for, Buddy};
use xino_arch::SpinLock;
use xino_common::config::{BOOT_BUDDY_ORDER, PAGE_SIZE};
use xino_common::{layout, PhysAddr, VirtAddr};
use xino_paging::PageAllocator;

#[cfg(target_os = "none")]
use xino_common::config::{UART_BASE, VA_BITS};
#[cfg(target_os = "none")]
use xino_common::{Error, Prot, Result};
#[cfg(target_os = "none")]
use xino_paging::{PageTable, Stage1, Stage1Addr};

#[cfg(target_os = "none")]
use crate::features;

/// The boot allocator's pool is the linker-reserved boot heap.
type BootBuddy = Buddy<BOOT_BUDDY_ORDER, { words_for(BOOT_BUDDY_ORDER) }>;

static BOOT_HEAP: SpinLock<BootBuddy> = SpinLock::new(BootBuddy::new());

/// Allocate `2^order` pages from the boot heap.
#[must_use]
pub fn boot_alloc_pages(order: u32) -> Option<PhysAddr> {
    BOOT_HEAP.lock_irqsave().alloc_pages(order)
}

/// Return pages to the boot heap.
pub fn boot_free_pages(pa: PhysAddr, order: u32) {
    BOOT_HEAP.lock_irqsave().free_pages(pa, order)
}

/// [`PageAllocator`] view of the boot heap for the page-table engine.
#[cfg_attr(not(target_os = "none"), allow(dead_code))]
pub struct BootPages;

impl PageAllocator for BootPages {
    fn alloc_pages(&mut self, order: u32) -> Option<PhysAddr> {
        boot_alloc_pages(order)
    }

    fn free_pages(&mut self, pa: PhysAddr, order: u32) {
        boot_free_pages(pa, order)
    }
}

/// Smallest order whose block covers `pages` pages.
const fn order_for_pages(pages: usize) -> u32 {
    pages.next_power_of_two().trailing_zeros()
}

/// Page-granular global allocator over the boot buddy.
///
/// Sizes round up to whole pages and orders; the returned pointer is
/// the kernel VA of the backing pages under the current translation
/// policy (identity pre-MMU, direct-map after). On dealloc, a VA with
/// no reverse mapping is silently dropped.
struct PageHeap;

unsafe impl GlobalAlloc for PageHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAGE_SIZE {
            return core::ptr::null_mut();
        }

        let pages = layout.size().div_ceil(PAGE_SIZE).max(1);
        let Some(pa) = boot_alloc_pages(order_for_pages(pages)) else {
            return core::ptr::null_mut();
        };

        layout::phys_to_virt(pa, xino_paging::translation_enabled()).as_mut_ptr()
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let va = VirtAddr::from_ptr(ptr);
        let pages = layout.size().div_ceil(PAGE_SIZE).max(1);

        if let Some(pa) = layout::virt_to_phys(va, xino_paging::translation_enabled()) {
            boot_free_pages(pa, order_for_pages(pages));
        }
    }
}

#[cfg(target_os = "none")]
#[global_allocator]
static HEAP: PageHeap = PageHeap;

#[cfg(target_os = "none")]
extern "C" {
    static __boot_heap_start: u8;
    static __boot_heap_end: u8;
}

/// Arm the boot buddy over the linker-reserved heap window.
///
/// Must run once, before the first allocation; a bad window is fatal.
#[cfg(target_os = "none")]
pub fn init_boot_heap() {
    let start = core::ptr::addr_of!(__boot_heap_start) as u64;
    let end = core::ptr::addr_of!(__boot_heap_end) as u64;

    let mut heap = BOOT_HEAP.lock();
    if heap
        .init(PhysAddr::new(start), (end - start) as usize)
        .is_err()
    {
        xino_arch::cpu::panic();
    }
}

// Stage-1 kernel tables.
//
// Two trees: the high half (TTBR1_EL2) carrying the image window, the
// direct map of the image span, and the UART page in the device
// window; and a low-half identity map of the image (TTBR0_EL2) that
// keeps the PC and boot stack valid across the MMU switch.

#[cfg(target_os = "none")]
static KERNEL_TABLE: SpinLock<PageTable<Stage1>> = SpinLock::new(PageTable::new());
#[cfg(target_os = "none")]
static IDENTITY_TABLE: SpinLock<PageTable<Stage1>> = SpinLock::new(PageTable::new());

/// Device-window VA the boot UART is mapped at.
#[cfg(target_os = "none")]
pub const UART_DEVMAP_VA: VirtAddr = layout::DEVMAP_VA;

/// Build and install the boot translation tables. The MMU stays off.
#[cfg(target_os = "none")]
pub fn init_kernel_tables() -> Result<()> {
    let state = features::cpu_state();
    if state.pa_bits == 0 {
        return Err(Error::Invalid);
    }

    let mut alloc = BootPages;
    let image_pa = layout::ukimage_pa_base();
    let image_va = layout::ukimage_va_base();
    let image_size = align_up_page(layout::ukimage_size());

    let mut kt = KERNEL_TABLE.lock();
    kt.init(VA_BITS, state.pa_bits, &mut alloc)?;

    // Image window: the µkernel itself.
    kt.map_range(
        Stage1Addr::new(image_va, 0),
        image_pa,
        image_size,
        Prot::KERNEL_RWX,
        &mut alloc,
    )?;

    // Direct map of the image span (covers the boot heap, which lives
    // inside the image).
    kt.map_range(
        Stage1Addr::new(layout::phys_to_virt(image_pa, true), 0),
        image_pa,
        image_size,
        Prot::KERNEL_RW,
        &mut alloc,
    )?;

    // Boot UART in the device window.
    kt.map_range(
        Stage1Addr::new(UART_DEVMAP_VA, 0),
        PhysAddr::new(UART_BASE),
        PAGE_SIZE,
        Prot::KERNEL_RW | Prot::DEVICE,
        &mut alloc,
    )?;

    // Low-half identity alias of the image for the switch itself.
    let mut it = IDENTITY_TABLE.lock();
    it.init(VA_BITS, state.pa_bits, &mut alloc)?;
    it.map_range(
        Stage1Addr::new(VirtAddr::new(image_pa.value()), 0),
        image_pa,
        image_size,
        Prot::KERNEL_RWX,
        &mut alloc,
    )?;

    features::install_kernel_ttbr(kt.root(), 0);
    features::install_user_ttbr(it.root(), 0);

    Ok(())
}

/// Turn translations on and flip every policy latch that depends on
/// them, in one place.
#[cfg(target_os = "none")]
pub fn switch_to_virtual() {
    features::apply_translation_config();
    xino_paging::tlb::invalidate_all_stage1();
    features::enable_mmu();
    xino_paging::enable_translation();

    // The UART is now reachable through its device-window alias only.
    xino_pal::console::set_base(UART_DEVMAP_VA);
}

const fn align_up_page(n: usize) -> usize {
    (n + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_rounds_up() {
        assert_eq!(order_for_pages(1), 0);
        assert_eq!(order_for_pages(2), 1);
        assert_eq!(order_for_pages(3), 2);
        assert_eq!(order_for_pages(4), 2);
        assert_eq!(order_for_pages(5), 3);
    }

    #[test]
    fn page_alignment() {
        assert_eq!(align_up_page(1), PAGE_SIZE);
        assert_eq!(align_up_page(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(align_up_page(PAGE_SIZE + 1), 2 * PAGE_SIZE);
    }
}
