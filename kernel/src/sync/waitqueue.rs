//! Wait queues.
//!
//! A `WaitQueue` parks the calling task's id until some condition the
//! caller supplies becomes true, or (for the timed variant) a deadline
//! passes. The actual suspend/resume mechanics belong to the scheduler
//! ([`crate::sched`]); this module only owns the list of parked task ids
//! and the race-free retry loop around the condition check, matching the
//! classic `wait_event`/`wake_up` split where the waiter re-checks its
//! condition itself rather than trusting the wake-up to mean "ready".

use alloc::collections::VecDeque;

use crate::sync::spinlock::SpinLock;

/// Which run state a blocked task is parked in. `Uninterruptible` must
/// only be used for waits that are guaranteed to complete (no user-visible
/// signal can cut them short); everything that waits on I/O a caller
/// might want to abandon should use `Interruptible`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Interruptible,
    Uninterruptible,
}

/// Returned by [`WaitQueue::wait_event_interruptible`] when the task was
/// woken by a pending signal rather than the condition becoming true.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interrupted;

pub struct WaitQueue {
    waiters: SpinLock<VecDeque<usize>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue {
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    fn park(&self, kind: BlockKind) {
        let tid = crate::sched::current_task_id();
        self.waiters.lock().push_back(tid);
        crate::sched::block_current(kind);
    }

    /// Block until `condition()` is true. Not interruptible: use only
    /// when the condition is guaranteed to eventually hold (e.g. a
    /// resource a fellow kernel thread is certain to release).
    pub fn wait_event<F: Fn() -> bool>(&self, condition: F) {
        while !condition() {
            self.park(BlockKind::Uninterruptible);
        }
    }

    /// Block until `condition()` is true or a signal is pending on the
    /// current task, whichever comes first.
    pub fn wait_event_interruptible<F: Fn() -> bool>(
        &self,
        condition: F,
    ) -> Result<(), Interrupted> {
        while !condition() {
            if crate::sched::signal_pending() {
                return Err(Interrupted);
            }
            self.park(BlockKind::Interruptible);
        }
        Ok(())
    }

    /// Block until `condition()` is true or `timeout_ns` nanoseconds have
    /// elapsed. Returns `true` if woken by the condition, `false` on
    /// timeout.
    pub fn wait_event_timeout<F: Fn() -> bool>(&self, condition: F, timeout_ns: u64) -> bool {
        let deadline = crate::arch::x86_64::time::now_ns().saturating_add(timeout_ns);
        while !condition() {
            if crate::arch::x86_64::time::now_ns() >= deadline {
                return false;
            }
            self.park(BlockKind::Uninterruptible);
        }
        true
    }

    /// Wake the longest-waiting parked task, if any. Does not guarantee
    /// that task's condition now holds — it must re-check, as any other
    /// waiter would.
    pub fn wake_one(&self) {
        if let Some(tid) = self.waiters.lock().pop_front() {
            crate::sched::wake_up(tid);
        }
    }

    /// Wake every task currently parked on this queue.
    pub fn wake_all(&self) {
        let mut w = self.waiters.lock();
        while let Some(tid) = w.pop_front() {
            crate::sched::wake_up(tid);
        }
    }

    /// Number of tasks currently parked (diagnostics).
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue_reports_empty() {
        let wq = WaitQueue::new();
        assert!(wq.is_empty());
        assert_eq!(wq.len(), 0);
    }

    #[test]
    fn wake_on_empty_queue_is_a_no_op() {
        let wq = WaitQueue::new();
        // Must not panic when nothing is parked.
        wq.wake_one();
        wq.wake_all();
    }
}
