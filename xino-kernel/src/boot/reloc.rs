//! PIE self-relocation
//!
//! Applies the `R_AARCH64_RELATIVE` entries recorded in `.rela.dyn`,
//! fixing absolute addresses up to their final virtual addresses in
//! `[UKERNEL_BASE, UKERNEL_BASE + image size)`:
//!
//! ```text
//! *(u64 *)(r_offset + load_base) = r_addend + UKERNEL_BASE
//! ```
//!
//! The image is linked at VMA 0, so `r_addend` is an image offset and
//! the bias is simply `UKERNEL_BASE`. Any other relocation type means a
//! build break (something produced a GOT/PLT-style reference) and lands
//! in the panic sink.
//!
//! This module must stay self-contained: it cannot reference any symbol
//! whose access would itself require a dynamic relocation. Plain code,
//! no statics with address initializers; the linker-symbol accesses
//! below compile to PC-relative `adrp`/`add` pairs resolved at link
//! time. The linker script asserts `.plt`/`.got.plt` stay empty.

use core::ptr::addr_of;

use xino_arch::cpu;
use xino_common::config::UKERNEL_BASE;

const R_AARCH64_RELATIVE: u32 = 1027;

#[repr(C)]
struct Elf64Rela {
    /// Location to apply the action, as an image offset.
    r_offset: u64,
    /// Symbol index and relocation type.
    r_info: u64,
    /// Constant addend.
    r_addend: i64,
}

#[inline]
const fn elf64_r_type(info: u64) -> u32 {
    info as u32
}

extern "C" {
    static __image_start: u8;
    static __rela_dyn_start: u8;
    static __rela_dyn_end: u8;
}

/// Apply `.rela.dyn`.
///
/// # Safety
///
/// Must run exactly once, on the boot CPU, with the MMU off, before
/// anything reads a relocated static.
pub unsafe fn apply_relocations() {
    let load_base = addr_of!(__image_start) as u64;

    let mut rela = addr_of!(__rela_dyn_start) as *const Elf64Rela;
    let end = addr_of!(__rela_dyn_end) as *const Elf64Rela;

    while rela < end {
        // SAFETY: `[__rela_dyn_start, __rela_dyn_end)` is an array of
        // Elf64Rela produced by the linker.
        let r = unsafe { &*rela };

        if elf64_r_type(r.r_info) != R_AARCH64_RELATIVE {
            // Nothing sane can continue from an unsupported relocation.
            cpu::panic();
        }

        let slot = r.r_offset.wrapping_add(load_base) as *mut u64;
        // SAFETY: `r_offset` is an image offset of a 64-bit slot; the
        // image is writable at this stage.
        unsafe { slot.write((r.r_addend as u64).wrapping_add(UKERNEL_BASE)) };

        // SAFETY: stays within the rela array bounds checked above.
        rela = unsafe { rela.add(1) };
    }
}
