//! MMIO accessors
//!
//! Three tiers of device-register access over a [`VirtAddr`] that maps
//! device memory:
//!
//! - `raw_*`: exactly one volatile load/store, no barrier of any kind.
//! - `*_relaxed`: one volatile access bracketed by compiler barriers.
//! - Ordered (`read_ordered`/`write_ordered` and the `read{b,w,l,q}` /
//!   `write{b,w,l,q}` helpers): reads are followed by `iormb()`, writes
//!   preceded by `iowmb()`.
//!
//! Only unsigned integers of 1/2/4/8 bytes are accepted; anything else
//! fails to compile via the sealed [`MmioWord`] bound.

use xino_common::VirtAddr;

use crate::barrier::{barrier, iormb, iowmb};

/// Types that may be moved over MMIO in a single access.
pub trait MmioWord: Copy + private::Sealed {}

impl MmioWord for u8 {}
impl MmioWord for u16 {}
impl MmioWord for u32 {}
impl MmioWord for u64 {}

mod private {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// One volatile load, no barrier.
///
/// # Safety
///
/// `addr` must be a valid, `T`-aligned device mapping.
#[inline(always)]
#[must_use]
pub unsafe fn raw_read<T: MmioWord>(addr: VirtAddr) -> T {
    // SAFETY: validity and alignment are the caller's contract.
    unsafe { core::ptr::read_volatile(addr.as_ptr::<T>()) }
}

/// One volatile store, no barrier.
///
/// # Safety
///
/// `addr` must be a valid, `T`-aligned device mapping.
#[inline(always)]
pub unsafe fn raw_write<T: MmioWord>(addr: VirtAddr, value: T) {
    // SAFETY: validity and alignment are the caller's contract.
    unsafe { core::ptr::write_volatile(addr.as_mut_ptr::<T>(), value) }
}

/// Relaxed MMIO load: compiler ordering only.
///
/// # Safety
///
/// `addr` must be a valid, `T`-aligned device mapping.
#[inline(always)]
#[must_use]
pub unsafe fn read_relaxed<T: MmioWord>(addr: VirtAddr) -> T {
    barrier();
    // SAFETY: forwarded caller contract.
    let v = unsafe { raw_read::<T>(addr) };
    barrier();
    v
}

/// Relaxed MMIO store: compiler ordering only.
///
/// # Safety
///
/// `addr` must be a valid, `T`-aligned device mapping.
#[inline(always)]
pub unsafe fn write_relaxed<T: MmioWord>(addr: VirtAddr, value: T) {
    barrier();
    // SAFETY: forwarded caller contract.
    unsafe { raw_write::<T>(addr, value) };
    barrier();
}

/// Ordered MMIO load: relaxed load, then an I/O read barrier so later
/// accesses cannot be hoisted above the device read.
///
/// # Safety
///
/// `addr` must be a valid, `T`-aligned device mapping.
#[inline(always)]
#[must_use]
pub unsafe fn read_ordered<T: MmioWord>(addr: VirtAddr) -> T {
    // SAFETY: forwarded caller contract.
    let v = unsafe { read_relaxed::<T>(addr) };
    iormb();
    v
}

/// Ordered MMIO store: an I/O write barrier, then the relaxed store, so
/// earlier accesses cannot sink below the device write.
///
/// # Safety
///
/// `addr` must be a valid, `T`-aligned device mapping.
#[inline(always)]
pub unsafe fn write_ordered<T: MmioWord>(addr: VirtAddr, value: T) {
    iowmb();
    // SAFETY: forwarded caller contract.
    unsafe { write_relaxed::<T>(addr, value) };
}

macro_rules! sized_accessors {
    ($ty:ty, $rd:ident, $rd_relaxed:ident, $wr:ident, $wr_relaxed:ident) => {
        /// Ordered sized MMIO read.
        ///
        /// # Safety
        ///
        /// `addr` must be a valid, aligned device mapping.
        #[inline(always)]
        #[must_use]
        pub unsafe fn $rd(addr: VirtAddr) -> $ty {
            // SAFETY: forwarded caller contract.
            unsafe { read_ordered::<$ty>(addr) }
        }

        /// Relaxed sized MMIO read.
        ///
        /// # Safety
        ///
        /// `addr` must be a valid, aligned device mapping.
        #[inline(always)]
        #[must_use]
        pub unsafe fn $rd_relaxed(addr: VirtAddr) -> $ty {
            // SAFETY: forwarded caller contract.
            unsafe { read_relaxed::<$ty>(addr) }
        }

        /// Ordered sized MMIO write.
        ///
        /// # Safety
        ///
        /// `addr` must be a valid, aligned device mapping.
        #[inline(always)]
        pub unsafe fn $wr(value: $ty, addr: VirtAddr) {
            // SAFETY: forwarded caller contract.
            unsafe { write_ordered::<$ty>(addr, value) }
        }

        /// Relaxed sized MMIO write.
        ///
        /// # Safety
        ///
        /// `addr` must be a valid, aligned device mapping.
        #[inline(always)]
        pub unsafe fn $wr_relaxed(value: $ty, addr: VirtAddr) {
            // SAFETY: forwarded caller contract.
            unsafe { write_relaxed::<$ty>(addr, value) }
        }
    };
}

sized_accessors!(u8, readb, readb_relaxed, writeb, writeb_relaxed);
sized_accessors!(u16, readw, readw_relaxed, writew, writew_relaxed);
sized_accessors!(u32, readl, readl_relaxed, writel, writel_relaxed);
sized_accessors!(u64, readq, readq_relaxed, writeq, writeq_relaxed);

#[cfg(test)]
mod tests {
    use super::*;

    // On the host these exercise the volatile plumbing against ordinary
    // memory, which is enough to pin the value paths.
    #[test]
    fn sized_round_trip() {
        let mut cell: u64 = 0;
        let addr = VirtAddr::from_ptr(&mut cell as *mut u64);
        unsafe {
            writeq(0x1122_3344_5566_7788, addr);
            assert_eq!(readq(addr), 0x1122_3344_5566_7788);
            writel(0xdead_beef, addr);
            assert_eq!(readl(addr), 0xdead_beef);
            writew(0xabcd, addr);
            assert_eq!(readw_relaxed(addr), 0xabcd);
            writeb_relaxed(0x5a, addr);
            assert_eq!(readb(addr), 0x5a);
        }
    }
}
