//! Per-CPU storage
//!
//! The linker collects two adjacent input sections (`.percpu.aligned`
//! first, then `.percpu`) into a template spanning
//! `[__percpu_aligned_start, __percpu_end)`. During bootstrap the boot
//! CPU's per-CPU base register (TPIDR_EL2) points straight at the
//! template; [`init`] replicates the template once per CPU with a byte
//! copy and retargets the boot CPU at replica 0; each secondary calls
//! [`cpu_online`] to claim its own replica.
//!
//! A per-CPU symbol resolves as `TPIDR_EL2 + (sym − template start)`.
//!
//! Replication is `memcpy`, never a constructor, which is why the cell
//! payloads are bounded to `Copy` types. State needing real
//! construction must be built in place per CPU after `cpu_online`.
//!
//! # Declaring per-CPU variables
//!
//! ```ignore
//! #[link_section = ".percpu"]
//! static VMEXIT_COUNT: PerCpu<u64> = PerCpu::new(0);
//!
//! #[link_section = ".percpu.aligned"]
//! static FAST_COUNTER: PerCpuHot<u64> = PerCpuHot::new(0);
//!
//! VMEXIT_COUNT.set(VMEXIT_COUNT.get() + 1);
//! ```

use core::cell::UnsafeCell;
use core::ptr::addr_of;

use spin::Once;

use xino_arch::registers::{read_tpidr_el2, write_tpidr_el2};
use xino_common::config::CACHE_LINE;
use xino_common::{Error, Result};

extern "C" {
    static __percpu_aligned_start: u8;
    static __percpu_start: u8;
    static __percpu_end: u8;
}

/// A per-CPU variable. Place it in `.percpu` via `#[link_section]`.
#[repr(C)]
pub struct PerCpu<T: Copy> {
    value: UnsafeCell<T>,
}

// SAFETY: each CPU only ever touches its own replica through TPIDR_EL2.
unsafe impl<T: Copy> Sync for PerCpu<T> {}

impl<T: Copy> PerCpu<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    /// Address of this CPU's copy.
    fn this_cpu_ptr(&self) -> *mut T {
        let sym = self.value.get() as u64;
        this_cpu_addr(sym) as *mut T
    }

    /// Read this CPU's copy.
    #[must_use]
    pub fn get(&self) -> T {
        // SAFETY: the pointer targets this CPU's replica; no other CPU
        // accesses it.
        unsafe { *self.this_cpu_ptr() }
    }

    /// Write this CPU's copy.
    pub fn set(&self, value: T) {
        // SAFETY: as in `get`.
        unsafe { *self.this_cpu_ptr() = value };
    }
}

/// Cache-line-aligned per-CPU variable for hot state; place it in
/// `.percpu.aligned`.
#[allow(dead_code)]
#[repr(C, align(64))]
pub struct PerCpuHot<T: Copy> {
    inner: PerCpu<T>,
}

const _: () = assert!(CACHE_LINE == 64);

#[allow(dead_code)]
impl<T: Copy> PerCpuHot<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            inner: PerCpu::new(value),
        }
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.inner.get()
    }

    pub fn set(&self, value: T) {
        self.inner.set(value)
    }
}

/// `TPIDR_EL2 + (sym − template start)`.
fn this_cpu_addr(sym: u64) -> u64 {
    let template = addr_of!(__percpu_aligned_start) as u64;
    read_tpidr_el2() + (sym - template)
}

/// Template size; already cache-line padded by the linker script.
fn template_size() -> usize {
    let start = addr_of!(__percpu_aligned_start) as u64;
    let end = addr_of!(__percpu_end) as u64;
    (end - start) as usize
}

/// SMP area (base address, bytes per CPU), set once by `init`.
static AREA: Once<(u64, usize)> = Once::new();

/// Point the boot CPU's per-CPU base at the in-image template so
/// per-CPU accessors work before the SMP area exists.
///
/// Must run on the boot CPU before any per-CPU access.
pub fn bootstrap_init() {
    // SAFETY: TPIDR_EL2 is ours to program at EL2.
    unsafe { write_tpidr_el2(addr_of!(__percpu_aligned_start) as u64) };
}

/// Allocate and populate the per-CPU area for `ncpu` CPUs, then switch
/// the boot CPU from the template to replica 0.
///
/// # Errors
///
/// [`Error::Invalid`] for `ncpu == 0`, [`Error::Overflow`] when
/// `unit * ncpu` wraps, [`Error::NoMem`] when the allocation fails.
pub fn init(ncpu: usize) -> Result<()> {
    let unit = template_size();
    if unit == 0 {
        // No per-CPU variables were declared; nothing to replicate.
        return Ok(());
    }

    if ncpu == 0 {
        return Err(Error::Invalid);
    }

    let bytes = unit.checked_mul(ncpu).ok_or(Error::Overflow)?;
    let layout =
        core::alloc::Layout::from_size_align(bytes, CACHE_LINE).map_err(|_| Error::Invalid)?;

    // SAFETY: `layout` has nonzero size (unit != 0, ncpu != 0).
    let base = unsafe { alloc::alloc::alloc(layout) };
    if base.is_null() {
        return Err(Error::NoMem);
    }

    let template = addr_of!(__percpu_aligned_start);
    for cpu in 0..ncpu {
        // SAFETY: `base` spans `unit * ncpu` bytes; source and
        // destination never overlap.
        unsafe { core::ptr::copy_nonoverlapping(template, base.add(cpu * unit), unit) };
    }

    AREA.call_once(|| (base as u64, unit));

    // Switch the boot CPU from the bootstrap template to its replica.
    // SAFETY: replica 0 is fully populated above.
    unsafe { write_tpidr_el2(base as u64) };

    Ok(())
}

/// Claim replica `cpu_idx` on the calling CPU.
///
/// Must only run after [`init`], with `cpu_idx` below the `ncpu` it was
/// given.
#[allow(dead_code)] // secondary bring-up (PSCI CPU_ON path)
pub fn cpu_online(cpu_idx: usize) {
    let Some(&(base, unit)) = AREA.get() else {
        // Came online before the SMP area exists; nothing sane follows.
        xino_arch::cpu::panic();
    };
    // SAFETY: replica `cpu_idx` was populated by `init`.
    unsafe { write_tpidr_el2(base + (cpu_idx * unit) as u64) };
}
