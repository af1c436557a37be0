//! Soft-interrupt (bottom-half) dispatch.
//!
//! A per-CPU pending bitmask plus one registered action per bit.
//! `raise_softirq` sets a bit and, if not already running inside
//! interrupt context, wakes the per-CPU softirq kernel thread. On IRQ
//! exit, [`run_pending`] drains pending bits inline (low bit first, as
//! the spec's "bitmask order (low to high)" prescribes) up to a restart
//! limit; anything still pending after that is left for the kthread.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::sync::percpu::{PerCpu, MAX_CPUS};
use crate::sync::preempt;

pub const NR_SOFTIRQS: usize = 8;
const RESTART_LIMIT: u32 = 10;

pub type Action = fn();

struct PendingBits(AtomicU32);
const INIT_PENDING: PendingBits = PendingBits(AtomicU32::new(0));
static PENDING: PerCpu<PendingBits> = PerCpu::from_array([INIT_PENDING; MAX_CPUS]);

static ACTIONS: spin::Mutex<[Option<Action>; NR_SOFTIRQS]> = spin::Mutex::new([None; NR_SOFTIRQS]);

/// True once `wake_softirqd` has something new to deliver to the
/// per-CPU kthread; the scheduler checks this at its own IRQ-exit path.
const INIT_NEEDS_KTHREAD: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);
static NEEDS_KTHREAD: PerCpu<core::sync::atomic::AtomicBool> =
    PerCpu::from_array([INIT_NEEDS_KTHREAD; MAX_CPUS]);

/// Register the handler invoked when softirq bit `nr` is processed. Must
/// be called before any `raise_softirq(nr)`.
pub fn register(nr: usize, action: Action) {
    ACTIONS.lock()[nr] = Some(action);
}

/// Mark softirq `nr` pending on this CPU. If not currently running
/// inside interrupt context, also flags the per-CPU softirq kthread for
/// wake-up (the inline IRQ-exit path only runs from IRQ return).
pub fn raise(nr: usize) {
    debug_assert!(nr < NR_SOFTIRQS);
    PENDING.this_cpu().0.fetch_or(1 << nr, Ordering::AcqRel);
    if !preempt::in_interrupt() {
        NEEDS_KTHREAD
            .this_cpu()
            .store(true, Ordering::Release);
    }
}

/// Run pending softirqs inline, low bit to high bit, until none remain
/// or `RESTART_LIMIT` passes have been made. Called from the IRQ-exit
/// path; must not itself be called from inside a disabled-preemption
/// region with softirqs already nested arbitrarily deep.
pub fn run_pending() {
    preempt::enter_softirq();
    let mut iterations = 0;
    loop {
        let bits = PENDING.this_cpu().0.swap(0, Ordering::AcqRel);
        if bits == 0 {
            break;
        }
        let actions = ACTIONS.lock();
        for nr in 0..NR_SOFTIRQS {
            if bits & (1 << nr) != 0 {
                if let Some(action) = actions[nr] {
                    action();
                }
            }
        }
        drop(actions);
        iterations += 1;
        if iterations >= RESTART_LIMIT {
            break;
        }
    }
    preempt::exit_softirq();
}

/// Whether bit `nr` is currently pending on this CPU (diagnostics/tests).
pub fn is_pending(nr: usize) -> bool {
    PENDING.this_cpu().0.load(Ordering::Acquire) & (1 << nr) != 0
}

/// Whether the per-CPU softirq kthread has outstanding work queued for
/// it (set when `raise` happens outside interrupt context).
pub fn kthread_has_work() -> bool {
    NEEDS_KTHREAD.this_cpu().swap(false, Ordering::AcqRel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32 as StdAtomicU32, Ordering as StdOrdering};
    static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    static RAN_LOW: StdAtomicU32 = StdAtomicU32::new(0);
    static RAN_HIGH: StdAtomicU32 = StdAtomicU32::new(0);

    fn low_action() {
        RAN_LOW.fetch_add(1, StdOrdering::SeqCst);
    }
    fn high_action() {
        RAN_HIGH.fetch_add(1, StdOrdering::SeqCst);
    }

    #[test]
    fn pending_bits_drain_on_run() {
        let _guard = TEST_LOCK.lock().unwrap();
        RAN_LOW.store(0, StdOrdering::SeqCst);
        RAN_HIGH.store(0, StdOrdering::SeqCst);
        register(0, low_action);
        register(1, high_action);

        raise(1);
        raise(0);
        assert!(is_pending(0));
        assert!(is_pending(1));

        run_pending();

        assert_eq!(RAN_LOW.load(StdOrdering::SeqCst), 1);
        assert_eq!(RAN_HIGH.load(StdOrdering::SeqCst), 1);
        assert!(!is_pending(0));
        assert!(!is_pending(1));
    }

    #[test]
    fn raise_outside_interrupt_flags_kthread() {
        let _guard = TEST_LOCK.lock().unwrap();
        let _ = kthread_has_work(); // drain any stale flag
        register(2, low_action);
        raise(2);
        assert!(kthread_has_work());
        // Consuming it clears the flag.
        assert!(!kthread_has_work());
        run_pending();
    }
}
