//! xino µkernel
//!
//! Boot flow, from the UEFI stub's jump to `main`:
//!
//! 1. `_start` (asm): park the FDT pointer, set up the boot stack, call
//!    `boot::ukernel_boot`.
//! 2. Apply PIE self-relocations; fix the VA-layout runtime bases.
//! 3. Negotiate CPU features (PA/IPA widths, VHE) and precompute
//!    MAIR/TCR/VTCR.
//! 4. Arm the boot buddy over `[__boot_heap_start, __boot_heap_end)`.
//! 5. Per-CPU bootstrap, UART, logger.
//! 6. Build the stage-1 tables, program the translation registers,
//!    enable the MMU, and continue at the image's high-half alias.
//! 7. Run `.init_array`, then [`main`].
//!
//! Everything tied to the firmware image (linker symbols, the asm
//! entry, the panic handler) is gated on `target_os = "none"` so the
//! pure logic in here stays testable on the host.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[cfg(target_os = "none")]
mod boot;
mod features;
mod logging;
mod memory;
#[cfg(target_os = "none")]
mod percpu;
#[cfg(target_os = "none")]
mod runtime;

use xino_arch::cpu;

#[cfg(all(target_os = "none", target_arch = "aarch64"))]
core::arch::global_asm!(
    r#"
    .section .text.boot, "ax"
    .globl _start
_start:
    // x0 = FDT pointer from the stub; keep it across the stack setup.
    mov  x19, x0
    adrp x1, __boot_stack_end
    add  x1, x1, :lo12:__boot_stack_end
    mov  sp, x1
    mov  x0, x19
    bl   ukernel_boot
0:  wfe
    b    0b
"#
);

/// Logical index of the CPU this code runs on.
#[cfg(target_os = "none")]
#[link_section = ".percpu"]
static THIS_CPU: percpu::PerCpu<u32> = percpu::PerCpu::new(0);

/// The µkernel proper, entered with translations live and the runtime
/// fully armed.
fn main() {
    #[cfg(target_os = "none")]
    {
        if let Err(e) = percpu::init(1) {
            log::error!("per-CPU init failed: {}", e);
            cpu::panic();
        }
        THIS_CPU.set(0);
        log::debug!("per-CPU area live on cpu {}", THIS_CPU.get());
    }

    log::info!("CurrentEL: {}", cpu::current_el());

    #[cfg(target_os = "none")]
    {
        let (major, minor) = xino_pal::psci::version();
        log::info!("PSCI v{}.{}", major, minor);
    }

    log::info!(
        "xino up; image at {}",
        xino_common::layout::ukimage_va_base()
    );
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    xino_pal::println!("KERNEL PANIC: {}", info);
    cpu::panic()
}
