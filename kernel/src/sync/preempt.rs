//! Preemption control and interrupt-nesting counters.
//!
//! `hardirq_nesting` and `softirq_nesting` track how deep the current
//! CPU is inside hardware- and soft-interrupt context; `in_interrupt()`
//! is true whenever either is nonzero. `preempt_count` tracks nested
//! `preempt_disable()` regions: while nonzero, `schedule()` must not run
//! on this CPU (see spec §5, "Suspension").

use core::sync::atomic::{AtomicU32, Ordering};

use crate::sync::percpu::{this_cpu_id, PerCpu, MAX_CPUS};

struct Counters {
    preempt: AtomicU32,
    hardirq: AtomicU32,
    softirq: AtomicU32,
}

impl Counters {
    const fn new() -> Self {
        Counters {
            preempt: AtomicU32::new(0),
            hardirq: AtomicU32::new(0),
            softirq: AtomicU32::new(0),
        }
    }
}

const INIT: Counters = Counters::new();
static COUNTERS: PerCpu<Counters> = PerCpu::from_array([INIT; MAX_CPUS]);

/// RAII guard returned by [`preempt_disable`]; re-enables preemption on
/// drop if this was the outermost disable.
pub struct PreemptGuard(());

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        preempt_enable();
    }
}

pub fn preempt_disable() -> PreemptGuard {
    COUNTERS.this_cpu().preempt.fetch_add(1, Ordering::AcqRel);
    PreemptGuard(())
}

pub fn preempt_enable() {
    COUNTERS.this_cpu().preempt.fetch_sub(1, Ordering::AcqRel);
}

pub fn preempt_count() -> u32 {
    COUNTERS.this_cpu().preempt.load(Ordering::Acquire)
}

pub fn preemptible() -> bool {
    preempt_count() == 0 && !in_interrupt()
}

pub fn enter_hardirq() {
    COUNTERS.this_cpu().hardirq.fetch_add(1, Ordering::AcqRel);
}

pub fn exit_hardirq() {
    COUNTERS.this_cpu().hardirq.fetch_sub(1, Ordering::AcqRel);
}

pub fn enter_softirq() {
    COUNTERS.this_cpu().softirq.fetch_add(1, Ordering::AcqRel);
}

pub fn exit_softirq() {
    COUNTERS.this_cpu().softirq.fetch_sub(1, Ordering::AcqRel);
}

pub fn in_hardirq() -> bool {
    COUNTERS.this_cpu().hardirq.load(Ordering::Acquire) > 0
}

pub fn in_softirq() -> bool {
    COUNTERS.this_cpu().softirq.load(Ordering::Acquire) > 0
}

/// True whenever hardirq or softirq nesting is positive — the point at
/// which sleeping is forbidden (spec §5: "never... while `in_interrupt()`").
pub fn in_interrupt() -> bool {
    in_hardirq() || in_softirq()
}

#[cfg(test)]
mod tests {
    use super::*;
    // All test threads share CPU-0's counters (there is no real per-CPU
    // id outside the kernel), so these two tests must not interleave.
    static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn nested_preempt_disable_is_counted() {
        let _guard = TEST_LOCK.lock().unwrap();
        let a = preempt_disable();
        assert!(!preemptible());
        let b = preempt_disable();
        assert_eq!(preempt_count(), 2);
        drop(b);
        assert_eq!(preempt_count(), 1);
        drop(a);
        assert_eq!(preempt_count(), 0);
    }

    #[test]
    fn in_interrupt_reflects_either_nesting_counter() {
        let _guard = TEST_LOCK.lock().unwrap();
        assert!(!in_interrupt());
        enter_hardirq();
        assert!(in_interrupt());
        exit_hardirq();
        assert!(!in_interrupt());
        enter_softirq();
        assert!(in_interrupt());
        exit_softirq();
        assert!(!in_interrupt());
    }
}
