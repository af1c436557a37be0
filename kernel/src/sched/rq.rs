//! Per-CPU run queue (spec §3 "Run queue (rq)", §4.2).
//!
//! Holds the four class sub-queues plus the fields every class tick
//! needs: the currently running task, and `clock_task`, a monotonic
//! nanosecond clock updated at the "well-defined checkpoints" the spec
//! names (tick, enqueue, dequeue).

use crate::sched::class::deadline::DlRq;
use crate::sched::class::fair::CfsRq;
use crate::sched::class::idle::IdleRq;
use crate::sched::class::rt::RtRq;
use crate::sched::class::SchedClassKind;
use crate::sched::task::{ClassPayload, TaskId};
use crate::sync::percpu::{PerCpu, MAX_CPUS};
use crate::sync::spinlock::SpinLock;

pub struct Rq {
    pub curr: Option<TaskId>,
    pub clock_task: u64,
    pub cfs: CfsRq,
    pub dl: DlRq,
    pub rt: RtRq,
    pub idle: IdleRq,
    pub nr_running: u32,
}

impl Rq {
    const fn new() -> Self {
        Rq {
            curr: None,
            clock_task: 0,
            cfs: CfsRq::new(),
            dl: DlRq::new(),
            rt: RtRq::new(),
            idle: IdleRq::new(),
            nr_running: 0,
        }
    }

    /// Advance `clock_task` to `now`; the spec requires this happen at
    /// tick/enqueue/dequeue, never let it run backwards.
    pub fn advance_clock(&mut self, now: u64) {
        if now > self.clock_task {
            self.clock_task = now;
        }
    }
}

const RQ_INIT: SpinLock<Rq> = SpinLock::new(Rq::new());
static RUNQUEUES: PerCpu<SpinLock<Rq>> = PerCpu::from_array([RQ_INIT; MAX_CPUS]);

pub fn this_cpu_rq() -> &'static SpinLock<Rq> {
    RUNQUEUES.this_cpu()
}

pub fn cpu_rq(cpu: usize) -> &'static SpinLock<Rq> {
    RUNQUEUES.cpu(cpu)
}

/// `enqueue_task(rq, p, flags)`: route to the sub-queue matching the
/// task's class, reading its per-class payload to get the sort key.
pub fn enqueue_task(rq: &mut Rq, tid: TaskId) {
    let Some((class, payload)) = crate::sched::task::with(tid, |t| (t.class, t.payload)) else {
        return;
    };
    match (class, payload) {
        (SchedClassKind::Fair, ClassPayload::Fair(e)) => {
            rq.cfs.enqueue(tid, e.vruntime.max(rq.cfs.min_vruntime), e.weight)
        }
        (SchedClassKind::Deadline, ClassPayload::Deadline(e)) => rq.dl.enqueue(tid, e.deadline),
        (SchedClassKind::Realtime, ClassPayload::Realtime(e)) => rq.rt.enqueue(tid, e.priority),
        (SchedClassKind::Idle, _) => rq.idle.set(tid),
        _ => {}
    }
    rq.nr_running += 1;
}

pub fn dequeue_task(rq: &mut Rq, tid: TaskId) {
    let Some((class, payload)) = crate::sched::task::with(tid, |t| (t.class, t.payload)) else {
        return;
    };
    match (class, payload) {
        (SchedClassKind::Fair, ClassPayload::Fair(e)) => rq.cfs.dequeue(tid, e.vruntime, e.weight),
        (SchedClassKind::Deadline, ClassPayload::Deadline(e)) => rq.dl.dequeue(tid, e.deadline),
        (SchedClassKind::Realtime, ClassPayload::Realtime(e)) => rq.rt.dequeue(tid, e.priority),
        (SchedClassKind::Idle, _) => {}
        _ => {}
    }
    rq.nr_running = rq.nr_running.saturating_sub(1);
}

/// `pick_next_task`: walk `CLASS_ORDER` and take the first class with a
/// runnable task (spec §4.2, "Class dispatch"). The running task itself
/// is never in `rq.cfs`/`rq.dl` (spec §8 invariant: "`rq.curr` is not
/// enqueued in the CFS tree"), so this only ever looks at queued,
/// non-running tasks.
pub fn pick_next_task(rq: &Rq) -> Option<TaskId> {
    for class in crate::sched::class::CLASS_ORDER {
        let picked = match class {
            SchedClassKind::Deadline => rq.dl.leftmost(),
            SchedClassKind::Realtime => rq.rt.peek_next(),
            SchedClassKind::Fair => rq.cfs.leftmost(),
            SchedClassKind::Idle => rq.idle.pick(),
        };
        if picked.is_some() {
            return picked;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::task::{self, ClassPayload};
    use std::sync::Mutex as StdMutex;

    // Per-CPU state is process-global; serialize tests that touch it.
    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn deadline_preempts_fair_and_idle() {
        let _g = TEST_LOCK.lock().unwrap();
        let mut rq = Rq::new();

        let idle = task::create("idle", SchedClassKind::Idle);
        enqueue_task(&mut rq, idle);

        let fair = task::create("fair", SchedClassKind::Fair);
        enqueue_task(&mut rq, fair);

        let dl = task::create("dl", SchedClassKind::Deadline);
        task::with_mut(dl, |t| {
            if let ClassPayload::Deadline(ref mut e) = t.payload {
                e.deadline = 1_000;
            }
        });
        enqueue_task(&mut rq, dl);

        assert_eq!(pick_next_task(&rq), Some(dl));
    }

    #[test]
    fn fair_wins_over_idle_when_no_higher_class_runnable() {
        let _g = TEST_LOCK.lock().unwrap();
        let mut rq = Rq::new();
        let idle = task::create("idle2", SchedClassKind::Idle);
        enqueue_task(&mut rq, idle);
        let fair = task::create("fair2", SchedClassKind::Fair);
        enqueue_task(&mut rq, fair);
        assert_eq!(pick_next_task(&rq), Some(fair));
    }

    #[test]
    fn idle_runs_when_nothing_else_is_queued() {
        let _g = TEST_LOCK.lock().unwrap();
        let mut rq = Rq::new();
        let idle = task::create("idle3", SchedClassKind::Idle);
        enqueue_task(&mut rq, idle);
        assert_eq!(pick_next_task(&rq), Some(idle));
    }
}
