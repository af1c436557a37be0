//! Deadline class: EDF + Constant Bandwidth Server (spec §4.2,
//! "Deadline (EDF + CBS)").
//!
//! Per-CPU tree keyed on absolute deadline, modeled the same way as
//! `fair::CfsRq` — an ordered `BTreeMap` over `(deadline, tid)` standing
//! in for the source's RB-tree, with `first_key_value` as the cached
//! leftmost.

use alloc::collections::BTreeMap;

use crate::sched::task::TaskId;

#[derive(Debug, Clone, Copy, Default)]
pub struct DlEntity {
    /// Replenishment period.
    pub period: u64,
    /// Remaining runtime budget in the current period.
    pub runtime: u64,
    /// Absolute deadline of the current period.
    pub deadline: u64,
    /// The budget granted at each replenishment (spec's CBS "budget").
    pub budget: u64,
    pub on_rq: bool,
}

impl DlEntity {
    pub fn new(period: u64, budget: u64) -> Self {
        DlEntity { period, runtime: budget, deadline: 0, budget, on_rq: false }
    }

    /// "On enqueue-wakeup, if the deadline has passed, replenish":
    /// `deadline = clock_task + period`, `runtime = budget`.
    pub fn replenish_if_expired(&mut self, clock_task: u64) {
        if self.deadline == 0 || self.deadline < clock_task {
            self.deadline = clock_task + self.period;
            self.runtime = self.budget;
        }
    }

    pub fn force_replenish(&mut self, clock_task: u64) {
        self.deadline = clock_task + self.period;
        self.runtime = self.budget;
    }

    /// Debit elapsed runtime from the budget; returns whether the
    /// budget is now exhausted and a replenish/reschedule is due.
    pub fn debit(&mut self, elapsed_ns: u64) -> bool {
        self.runtime = self.runtime.saturating_sub(elapsed_ns);
        self.runtime == 0
    }
}

pub struct DlRq {
    tree: BTreeMap<(u64, u64), TaskId>,
}

impl DlRq {
    pub const fn new() -> Self {
        DlRq { tree: BTreeMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Spec §8 invariant: leftmost equals the entity with the earliest
    /// deadline.
    pub fn leftmost(&self) -> Option<TaskId> {
        self.tree.first_key_value().map(|(_, &tid)| tid)
    }

    pub fn enqueue(&mut self, tid: TaskId, deadline: u64) {
        self.tree.insert((deadline, tid.0), tid);
    }

    pub fn dequeue(&mut self, tid: TaskId, deadline: u64) {
        self.tree.remove(&(deadline, tid.0));
    }
}

impl Default for DlRq {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a newly-admitted or woken deadline task with `other_deadline`
/// must preempt the currently-running deadline task with `curr_deadline`
/// (spec §4.2: "Preemption among DL tasks is by earliest deadline").
pub fn should_preempt(curr_deadline: u64, other_deadline: u64) -> bool {
    other_deadline < curr_deadline
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replenish_only_fires_once_deadline_has_passed() {
        let mut e = DlEntity::new(100, 20);
        e.deadline = 50;
        e.replenish_if_expired(40);
        // deadline (50) has not yet passed at clock_task=40.
        assert_eq!(e.deadline, 50);
        e.replenish_if_expired(51);
        assert_eq!(e.deadline, 51 + 100);
        assert_eq!(e.runtime, 20);
    }

    #[test]
    fn debit_reports_exhaustion_at_zero() {
        let mut e = DlEntity::new(100, 20);
        e.force_replenish(0);
        assert!(!e.debit(10));
        assert!(e.debit(10));
        assert_eq!(e.runtime, 0);
    }

    #[test]
    fn leftmost_tracks_earliest_deadline() {
        let mut rq = DlRq::new();
        rq.enqueue(TaskId(1), 100);
        rq.enqueue(TaskId(2), 35);
        rq.enqueue(TaskId(3), 200);
        assert_eq!(rq.leftmost(), Some(TaskId(2)));
    }

    #[test]
    fn edf_preemption_scenario_from_spec() {
        // Scenario 3: D1 deadline 100ms, D2 admitted at t=5ms with
        // deadline 35ms. D2's earlier deadline must preempt D1.
        assert!(should_preempt(100_000_000, 35_000_000));
        assert!(!should_preempt(35_000_000, 100_000_000));
    }
}
