//! Runtime glue
//!
//! The high-half entry: once translations are live and execution has
//! moved to the image window, run the `.init_array` constructors, the
//! µkernel proper, and the `.fini_array` destructors. Rust itself emits
//! no constructors; the arrays exist for linked components that do.

use core::ptr::addr_of;

extern "C" {
    static __init_array_start: u8;
    static __init_array_end: u8;
    static __fini_array_start: u8;
    static __fini_array_end: u8;
}

type Ctor = unsafe extern "C" fn();

/// Walk an array of constructor/destructor pointers, skipping nulls.
///
/// # Safety
///
/// `start..end` must be a linker-built function-pointer array whose
/// entries are safe to call in the current state.
unsafe fn run_ctor_array(start: *const u8, end: *const u8) {
    let mut p = start as *const usize;
    let end = end as *const usize;

    while p < end {
        // SAFETY: within the array per the caller's contract.
        let raw = unsafe { p.read() };
        if raw != 0 {
            // SAFETY: non-null entries are constructors per the ABI.
            let f: Ctor = unsafe { core::mem::transmute(raw) };
            unsafe { f() };
        }
        p = unsafe { p.add(1) };
    }
}

/// High-half µkernel entry: constructors, `main`, destructors.
///
/// # Safety
///
/// Must be reached exactly once, through the image-window alias, with
/// the MMU on and the heap live.
#[no_mangle]
pub unsafe extern "C" fn ukernel_entry(_fdt: u64) -> ! {
    // SAFETY: linker-built arrays; relocations are live at this point.
    unsafe {
        run_ctor_array(addr_of!(__init_array_start), addr_of!(__init_array_end));
    }

    crate::main();

    // SAFETY: as above.
    unsafe {
        run_ctor_array(addr_of!(__fini_array_start), addr_of!(__fini_array_end));
    }

    log::info!("µkernel main returned; parking");
    xino_arch::cpu::panic()
}
