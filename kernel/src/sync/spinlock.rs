//! IRQ-safe ticket spinlock.
//!
//! A ticket lock rather than a test-and-set lock: under contention, each
//! waiter spins on its own ticket number, which gives FIFO fairness and
//! avoids the starvation a naive `compare_exchange` loop can suffer
//! under heavy contention. `lock_irqsave` disables interrupts before
//! taking the lock and hands the caller back the prior interrupt state;
//! `unlock_irqrestore` restores it. No sleeping is permitted inside the
//! critical section — callers that need to block use a [`crate::sync::waitqueue::WaitQueue`]
//! instead, taken outside the lock.

use core::cell::UnsafeCell;
use core::hint;
use core::sync::atomic::{AtomicU32, Ordering};

use x86_64::instructions::interrupts;

/// The interrupt-enabled state captured by [`SpinLock::lock_irqsave`],
/// to be handed back unchanged to [`SpinLock::unlock_irqrestore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IrqState(bool);

pub struct SpinLock<T> {
    next_ticket: AtomicU32,
    now_serving: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    ticket: u32,
}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        SpinLock {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Take the lock without touching the interrupt-enable flag. Callers
    /// must already be certain no interrupt handler on this CPU can take
    /// the same lock, or must already be running with interrupts off.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != ticket {
            hint::spin_loop();
        }
        SpinLockGuard { lock: self, ticket }
    }

    /// Disable interrupts, take the lock, and return the prior interrupt
    /// state so it can be restored by [`Self::unlock_irqrestore`].
    pub fn lock_irqsave(&self) -> (SpinLockGuard<'_, T>, IrqState) {
        let was_enabled = interrupts::are_enabled();
        interrupts::disable();
        (self.lock(), IrqState(was_enabled))
    }

    /// Drop the guard and restore the interrupt-enable state captured by
    /// `lock_irqsave`. Takes the guard by value so it is dropped (and the
    /// lock released) before interrupts are re-enabled.
    pub fn unlock_irqrestore(&self, guard: SpinLockGuard<'_, T>, state: IrqState) {
        drop(guard);
        if state.0 {
            interrupts::enable();
        }
    }

    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let ticket = self
            .next_ticket
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                if self.now_serving.load(Ordering::Acquire) == cur {
                    Some(cur + 1)
                } else {
                    None
                }
            })
            .ok()?;
        Some(SpinLockGuard { lock: self, ticket })
    }
}

impl<'a, T> core::ops::Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> core::ops::DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn mutual_exclusion_under_contention() {
        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = vec![];
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let mut g = lock.lock();
                    *g += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }

    #[test]
    fn tickets_serve_in_fifo_order() {
        let lock = SpinLock::new(());
        // Single-threaded sanity: each successive lock() call must get a
        // strictly increasing ticket and release exactly once.
        for _ in 0..100 {
            let g = lock.lock();
            drop(g);
        }
    }
}
