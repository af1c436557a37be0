//! Sleepable RCU.
//!
//! Unlike classic RCU, a reader may block inside its critical section —
//! no quiescent-state accounting is tied to context switches, so this
//! works for code paths the VMM and FKX loader need that have to sleep
//! (page-in under reclaim, module dependency I/O) while still holding a
//! read reference. Each [`SrcuStruct`] keeps a per-CPU pair of lock/unlock
//! counters indexed by the struct's current generation index (0 or 1);
//! [`SrcuStruct::synchronize`] flips the index and then waits for the
//! *old* index's lock and unlock counts to agree on every CPU, meaning
//! every reader that entered under the old index has left.

use core::hint;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::sync::percpu::{online_cpus, this_cpu_id, MAX_CPUS};

const ZERO_PAIR: [AtomicU32; 2] = [AtomicU32::new(0), AtomicU32::new(0)];

pub struct SrcuStruct {
    idx: AtomicUsize,
    lock_count: [[AtomicU32; 2]; MAX_CPUS],
    unlock_count: [[AtomicU32; 2]; MAX_CPUS],
}

/// Held for the duration of an SRCU read-side critical section. Dropping
/// it is equivalent to `srcu_read_unlock`.
pub struct SrcuGuard<'a> {
    srcu: &'a SrcuStruct,
    idx: usize,
}

impl SrcuStruct {
    pub const fn new() -> Self {
        SrcuStruct {
            idx: AtomicUsize::new(0),
            lock_count: [ZERO_PAIR; MAX_CPUS],
            unlock_count: [ZERO_PAIR; MAX_CPUS],
        }
    }

    /// Enter a read-side critical section. May be called nested and may
    /// sleep while held.
    pub fn read_lock(&self) -> SrcuGuard<'_> {
        let idx = self.idx.load(Ordering::Acquire) & 1;
        self.lock_count[this_cpu_id()][idx].fetch_add(1, Ordering::AcqRel);
        SrcuGuard { srcu: self, idx }
    }

    fn read_unlock_idx(&self, idx: usize) {
        self.unlock_count[this_cpu_id()][idx].fetch_add(1, Ordering::AcqRel);
    }

    /// Block until every reader that was active when this call began has
    /// called `read_unlock`. Readers that start after the index flip are
    /// counted against the new index and do not delay this call.
    pub fn synchronize(&self) {
        let old = self.idx.fetch_xor(1, Ordering::AcqRel) & 1;
        for cpu in 0..online_cpus().max(1) {
            loop {
                let locked = self.lock_count[cpu][old].load(Ordering::Acquire);
                let unlocked = self.unlock_count[cpu][old].load(Ordering::Acquire);
                if locked == unlocked {
                    break;
                }
                hint::spin_loop();
            }
        }
    }
}

impl Default for SrcuStruct {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Drop for SrcuGuard<'a> {
    fn drop(&mut self) {
        self.srcu.read_unlock_idx(self.idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn nested_read_sections_use_same_index() {
        let _guard = TEST_LOCK.lock().unwrap();
        let srcu = SrcuStruct::new();
        let outer = srcu.read_lock();
        let inner = srcu.read_lock();
        assert_eq!(outer.idx, inner.idx);
        drop(inner);
        drop(outer);
        // balanced: synchronize must return promptly.
        srcu.synchronize();
    }

    #[test]
    fn synchronize_waits_for_active_reader() {
        let _guard = TEST_LOCK.lock().unwrap();
        let srcu = Arc::new(SrcuStruct::new());
        let reader_entered = Arc::new(AtomicBool::new(false));
        let reader_left = Arc::new(AtomicBool::new(false));

        let srcu2 = Arc::clone(&srcu);
        let reader_entered2 = Arc::clone(&reader_entered);
        let reader_left2 = Arc::clone(&reader_left);
        let handle = thread::spawn(move || {
            let g = srcu2.read_lock();
            reader_entered2.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            reader_left2.store(true, Ordering::SeqCst);
            drop(g);
        });

        while !reader_entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        srcu.synchronize();
        // synchronize only returns once the reader has dropped its guard.
        assert!(reader_left.load(Ordering::SeqCst));
        handle.join().unwrap();
    }
}
