//! Spinlock
//!
//! [`SpinLock`] guards short critical sections with a CAS acquire and a
//! `SEVL`-primed `WFE` wait loop; [`SpinLock::lock_irqsave`] additionally
//! masks IRQ/FIQ for the lifetime of the guard so interrupt handlers on
//! the same core cannot deadlock against a holder.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::cpu::{self, IrqFlags};

/// A spinlock: state 0 = unlocked, 1 = locked.
///
/// Acquire is a CAS (0 → 1, acquire ordering); release is a store (0,
/// release ordering) followed by `SEV` to wake waiters.
pub struct SpinLock<T> {
    state: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: the lock serializes all access to `data`.
unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    #[inline]
    fn try_acquire(&self) -> bool {
        self.state
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquire the lock, spinning until successful.
    ///
    /// Why the `SEVL` is required: `WFE` waits on a single-bit event
    /// latch that many things set (`SEV`, interrupts) and that `WFE`
    /// itself consumes. Without `SEVL`, a waiter can issue a blocking
    /// `WFE` after the unlocker's `SEV` has already been consumed while
    /// it still observes the lock held; with IRQs masked there may be no
    /// other event source, and the core sleeps too long. Priming the
    /// latch with `SEVL` makes the first `WFE` of every round
    /// non-blocking, guaranteeing one extra check-`WFE`-recheck pass
    /// before the core truly sleeps. Do not remove it as an
    /// "optimization".
    #[must_use]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        if !self.try_acquire() {
            loop {
                cpu::sevl();
                while self.state.load(Ordering::Relaxed) != 0 {
                    cpu::wfe();
                }
                if self.try_acquire() {
                    break;
                }
            }
        }

        SpinLockGuard { lock: self }
    }

    /// Try to acquire the lock once.
    #[must_use]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.try_acquire() {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Acquire the lock with IRQ/FIQ masked.
    ///
    /// Interrupts are masked *before* the acquire attempt so an
    /// interrupt handler on this core can never preempt a holder and
    /// spin on the same lock. The saved DAIF state is restored when the
    /// guard drops.
    #[must_use]
    pub fn lock_irqsave(&self) -> IrqSpinLockGuard<'_, T> {
        let flags = cpu::irq_save();
        let guard = self.lock();
        IrqSpinLockGuard {
            guard: core::mem::ManuallyDrop::new(guard),
            flags,
            _not_send: PhantomData,
        }
    }

    /// Get a mutable reference to the underlying data.
    ///
    /// Safe because `&mut self` guarantees exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Guard providing access to the locked data.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: we hold the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: we hold the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
        cpu::sev();
    }
}

/// Guard for [`SpinLock::lock_irqsave`].
///
/// `!Send`: moving it to another core would restore DAIF on the wrong
/// CPU. On drop the lock is released first, then interrupts restored.
pub struct IrqSpinLockGuard<'a, T> {
    guard: core::mem::ManuallyDrop<SpinLockGuard<'a, T>>,
    flags: IrqFlags,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &**self.guard
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut **self.guard
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release the lock before restoring interrupts.
        // SAFETY: the inner guard is dropped exactly once, here.
        unsafe { core::mem::ManuallyDrop::drop(&mut self.guard) };
        cpu::irq_restore(self.flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_round_trip() {
        let lock = SpinLock::new(41u32);
        {
            let mut g = lock.lock();
            *g += 1;
        }
        assert_eq!(*lock.lock(), 42);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let g = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(g);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn irqsave_guard_releases() {
        let lock = SpinLock::new(7u64);
        {
            let mut g = lock.lock_irqsave();
            *g = 8;
        }
        assert_eq!(*lock.lock(), 8);
    }

    #[test]
    fn contended_increment() {
        use std::sync::Arc;

        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let l = Arc::clone(&lock);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    *l.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
