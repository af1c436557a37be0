//! Scheduler façade (spec component C2, §4.2).
//!
//! `class`/`rq`/`task` hold the data structures — the four per-class
//! sub-queues, the per-CPU run queue, and the task arena. This module
//! is the seam the rest of the kernel actually calls through: which
//! task is current on each CPU, `need_resched`, block/wake, the tick
//! handler the timer IRQ drives, and wake-up CPU placement.
//!
//! What it deliberately does not do: perform a real register/stack
//! context switch. That is the System-V x86-64 trampoline named in
//! `SPEC_FULL.md`'s design notes ("Kernel-ABI signatures") — an
//! assembly stub outside this crate's scope that saves/restores
//! callee-saved registers and the stack pointer. `schedule()` here does
//! everything calling-convention-neutral: the class-dispatch decision,
//! `rq.curr` bookkeeping, and accounting: a trampoline would call this,
//! then do the actual swap.

pub mod class;
pub mod rq;
pub mod task;

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::sched::class::SchedClassKind;
use crate::sched::task::{ClassPayload, RunState, TaskId};
use crate::sync::percpu::{this_cpu_id, PerCpu, MAX_CPUS};
use crate::sync::preempt;
use crate::sync::waitqueue::BlockKind;
use crate::vmm::address_space::AddressSpaceId;

const NONE_SENTINEL: u64 = u64::MAX;

const NO_TASK_SLOT: AtomicU64 = AtomicU64::new(NONE_SENTINEL);
static CURRENT_TASK: PerCpu<AtomicU64> = PerCpu::from_array([NO_TASK_SLOT; MAX_CPUS]);

const NO_MM_SLOT: AtomicU64 = AtomicU64::new(NONE_SENTINEL);
static CURRENT_MM: PerCpu<AtomicU64> = PerCpu::from_array([NO_MM_SLOT; MAX_CPUS]);

const NOT_NEEDED: AtomicBool = AtomicBool::new(false);
static NEED_RESCHED: PerCpu<AtomicBool> = PerCpu::from_array([NOT_NEEDED; MAX_CPUS]);

/// Install `tid` as the task running on this CPU, e.g. that CPU's idle
/// task at boot, or the result of `schedule()`'s class-dispatch pick.
pub fn set_current_task(tid: TaskId) {
    CURRENT_TASK.this_cpu().store(tid.0, Ordering::Release);
}

/// The task running on this CPU. Panics in debug builds if called
/// before `set_current_task` — every CPU must have an idle task
/// installed before it can take an interrupt or call into a wait queue.
pub fn current_task_id() -> TaskId {
    let raw = CURRENT_TASK.this_cpu().load(Ordering::Acquire);
    debug_assert!(raw != NONE_SENTINEL, "no current task installed on this cpu");
    TaskId(raw)
}

pub fn current_task_id_opt() -> Option<TaskId> {
    match CURRENT_TASK.this_cpu().load(Ordering::Acquire) {
        NONE_SENTINEL => None,
        raw => Some(TaskId(raw)),
    }
}

/// The address space the current task is running against, if any
/// (kernel threads have none). Consulted by the page fault handler.
pub fn current_address_space() -> Option<AddressSpaceId> {
    match CURRENT_MM.this_cpu().load(Ordering::Acquire) {
        NONE_SENTINEL => None,
        raw => Some(AddressSpaceId(raw as u32)),
    }
}

pub fn set_current_address_space(mm: Option<AddressSpaceId>) {
    let raw = mm.map(|m| m.0 as u64).unwrap_or(NONE_SENTINEL);
    CURRENT_MM.this_cpu().store(raw, Ordering::Release);
}

/// Host-side test hook: `vmm::fault`'s unit tests run without ever
/// going through `schedule()`, so they set the faulting address space
/// directly rather than standing up a whole task.
#[cfg(test)]
pub fn test_set_current_address_space(mm: Option<AddressSpaceId>) {
    set_current_address_space(mm);
}

/// Whether a reschedule is due at the next preemption point (spec
/// §4.2, "Preemption points").
pub fn need_resched() -> bool {
    NEED_RESCHED.this_cpu().load(Ordering::Acquire)
}

pub fn set_need_resched() {
    NEED_RESCHED.this_cpu().store(true, Ordering::Release);
}

fn clear_need_resched() {
    NEED_RESCHED.this_cpu().store(false, Ordering::Release);
}

/// Whether the current task has a pending signal (spec §5
/// "Cancellation": "cancellation is carried via task state
/// transitions"); consulted by `wait_event_interruptible`.
pub fn signal_pending() -> bool {
    current_task_id_opt()
        .and_then(|tid| task::with(tid, |t| t.signal_pending))
        .unwrap_or(false)
}

pub fn send_signal(tid: TaskId) {
    task::with_mut(tid, |t| t.signal_pending = true);
    wake_up(tid);
}

/// Park the current task in `kind`'s run state and reschedule. Called
/// by `WaitQueue::park` after the caller has already pushed this task's
/// id onto the queue's waiter list — by the time `schedule()` picks a
/// new task, this one is off every runqueue, matching spec §5's
/// "suspend only with ... state released".
pub fn block_current(kind: BlockKind) {
    let tid = current_task_id();
    let state = match kind {
        BlockKind::Interruptible => RunState::Interruptible,
        BlockKind::Uninterruptible => RunState::Uninterruptible,
    };
    let cpu = this_cpu_id();
    task::with_mut(tid, |t| t.state = state);
    rq::dequeue_task(&mut rq::cpu_rq(cpu).lock(), tid);
    schedule();
}

/// Move a parked or newly-created task back to `Running` and enqueue it
/// on its target CPU (spec §4.2 "State transitions": INTERRUPTIBLE/
/// UNINTERRUPTIBLE -> RUNNING on wake). A wake targeting a CPU other
/// than the caller's is, per spec §5, "delivered via IPI"; the IPI send
/// itself is the external APIC collaborator's job, so this only flags
/// the target CPU's `need_resched` the way the IPI handler would once
/// it runs there.
pub fn wake_up(tid: TaskId) {
    let already_running = task::with(tid, |t| t.state == RunState::Running).unwrap_or(true);
    if already_running {
        return;
    }
    task::with_mut(tid, |t| t.state = RunState::Running);
    let target_cpu = select_wakeup_cpu(tid);
    task::with_mut(tid, |t| t.current_cpu = target_cpu);

    rq::enqueue_task(&mut rq::cpu_rq(target_cpu).lock(), tid);

    if target_cpu == this_cpu_id() {
        set_need_resched();
    } else {
        NEED_RESCHED.cpu(target_cpu).store(true, Ordering::Release);
    }
}

/// `select_task_rq_fair` (spec §4.2, "Wake-up CPU selection (CFS)"),
/// generalized to every class since only fair-class tasks get real
/// load-aware placement in the source and the other classes are happy
/// with "stay where affinity allows".
fn select_wakeup_cpu(tid: TaskId) -> usize {
    let (affinity, prev_cpu) =
        task::with(tid, |t| (t.affinity, t.current_cpu)).unwrap_or((task::CpuMask::ALL, 0));
    if let Some(pinned) = affinity.is_pinned_to_one() {
        return pinned;
    }
    let waker_cpu = this_cpu_id();
    if affinity.contains(waker_cpu) && rq_is_idle(waker_cpu) {
        return waker_cpu;
    }
    if affinity.contains(prev_cpu) && rq_is_idle(prev_cpu) {
        return prev_cpu;
    }
    let mut least_loaded = prev_cpu;
    let mut least_load = u32::MAX;
    for cpu in 0..crate::sync::percpu::online_cpus().min(MAX_CPUS) {
        if !affinity.contains(cpu) {
            continue;
        }
        let load = rq::cpu_rq(cpu).lock().nr_running;
        if rq_is_idle(cpu) {
            return cpu;
        }
        if load < least_load {
            least_load = load;
            least_loaded = cpu;
        }
    }
    if affinity.contains(least_loaded) {
        least_loaded
    } else {
        prev_cpu
    }
}

fn rq_is_idle(cpu: usize) -> bool {
    rq::cpu_rq(cpu).lock().nr_running == 0
}

/// `pick_next_task` + the bookkeeping the trampoline needs around it.
/// No-op (does not actually run anything different) if `preemptible()`
/// is false or the picked task is already current, matching spec §5's
/// "Suspension" ban on rescheduling inside a preempt-disabled region.
pub fn schedule() {
    if !preempt::preemptible() {
        return;
    }
    let cpu = this_cpu_id();
    clear_need_resched();

    let prev = current_task_id_opt();
    let mut rq_guard = rq::cpu_rq(cpu).lock();

    if let Some(prev_tid) = prev {
        let still_runnable =
            task::with(prev_tid, |t| t.state == RunState::Running).unwrap_or(false);
        if still_runnable {
            rq::enqueue_task(&mut rq_guard, prev_tid);
        }
    }

    let next = rq::pick_next_task(&rq_guard).or(prev);
    if let Some(next_tid) = next {
        rq::dequeue_task(&mut rq_guard, next_tid);
        rq_guard.curr = Some(next_tid);
    }
    drop(rq_guard);

    if let Some(next_tid) = next {
        if prev != Some(next_tid) {
            task::with_mut(next_tid, |t| {
                t.state = RunState::Running;
                t.nr_switches += 1;
            });
            set_current_task(next_tid);
        }
    }
}

/// `task_tick`: advance `rq.clock_task`, debit the running task's
/// class-specific budget, and raise `need_resched` if its slice (CFS)
/// or runtime budget (deadline) has run out. Called once per timer
/// interrupt via [`crate::arch::x86_64::time::timer::on_timer_irq`].
pub fn tick() {
    preempt::enter_hardirq();
    let cpu = this_cpu_id();
    let now = crate::arch::x86_64::time::now_ns();

    let mut rq_guard = rq::cpu_rq(cpu).lock();
    let prev_clock = rq_guard.clock_task;
    rq_guard.advance_clock(now);
    let elapsed = rq_guard.clock_task.saturating_sub(prev_clock);
    let total_weight = rq_guard.cfs.total_weight;
    drop(rq_guard);

    if let Some(tid) = current_task_id_opt() {
        let class = task::with(tid, |t| t.class);
        match class {
            Some(SchedClassKind::Fair) => tick_fair(tid, elapsed, total_weight),
            Some(SchedClassKind::Deadline) => tick_deadline(tid, elapsed, now),
            _ => {}
        }
        task::with_mut(tid, |t| t.sum_exec_runtime += elapsed);
    }

    preempt::exit_hardirq();
}

fn tick_fair(tid: TaskId, elapsed: u64, total_weight: u64) {
    let exceeded = task::with_mut(tid, |t| {
        if let ClassPayload::Fair(ref mut e) = t.payload {
            e.vruntime += class::fair::vruntime_delta(elapsed, e.weight.max(1));
            e.sum_exec_runtime += elapsed;
            let target = class::fair::target_slice_ns(e.weight.max(1), total_weight.max(1));
            if e.sum_exec_runtime.saturating_sub(e.prev_sum_exec_runtime) >= target {
                e.prev_sum_exec_runtime = e.sum_exec_runtime;
                return true;
            }
        }
        false
    })
    .unwrap_or(false);
    if exceeded {
        set_need_resched();
    }
}

fn tick_deadline(tid: TaskId, elapsed: u64, now: u64) {
    let exhausted = task::with_mut(tid, |t| {
        if let ClassPayload::Deadline(ref mut e) = t.payload {
            let exhausted = e.debit(elapsed);
            if exhausted {
                e.force_replenish(now);
            }
            exhausted
        } else {
            false
        }
    })
    .unwrap_or(false);
    if exhausted {
        set_need_resched();
    }
}

/// Run at the tail of every IRQ handler (spec §4.2 "Preemption points":
/// "Return from IRQ"). Drains pending softirqs inline and, if a
/// reschedule is due and this CPU is neither inside another interrupt
/// nor preemption-disabled, calls `schedule()` before returning to the
/// interrupted context.
pub fn irq_exit() {
    if !preempt::in_interrupt() {
        crate::sync::softirq::run_pending();
    }
    if need_resched() && preempt::preemptible() {
        schedule();
    }
}

/// `cond_resched`: the explicit preemption point for long-running
/// kernel loops (spec §4.2 "Preemption points").
pub fn cond_resched() {
    if need_resched() {
        schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::task::CpuMask;
    use std::sync::Mutex as StdMutex;

    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn wake_up_marks_task_running_and_enqueues() {
        let _g = TEST_LOCK.lock().unwrap();
        let idle = task::create("idle", SchedClassKind::Idle);
        set_current_task(idle);
        rq::enqueue_task(&mut rq::cpu_rq(0).lock(), idle);

        let t = task::create("sleeper", SchedClassKind::Fair);
        task::with_mut(t, |task| task.state = RunState::Interruptible);
        wake_up(t);
        assert_eq!(task::with(t, |task| task.state), Some(RunState::Running));
        assert!(need_resched());

        // Leave the global per-CPU rq as this test found it: `t` was
        // never picked by `schedule()`, so nothing else dequeued it.
        rq::dequeue_task(&mut rq::cpu_rq(0).lock(), t);
    }

    #[test]
    fn schedule_picks_highest_priority_class() {
        let _g = TEST_LOCK.lock().unwrap();
        let idle = task::create("idle2", SchedClassKind::Idle);
        set_current_task(idle);
        rq::enqueue_task(&mut rq::cpu_rq(0).lock(), idle);

        let fair = task::create("fair", SchedClassKind::Fair);
        task::with_mut(fair, |t| {
            t.state = RunState::Interruptible;
            t.affinity = CpuMask::single(0);
        });
        wake_up(fair);
        schedule();
        assert_eq!(current_task_id(), fair);
    }

    #[test]
    fn pinned_wakeup_ignores_idle_cpu_search() {
        let _g = TEST_LOCK.lock().unwrap();
        let t = task::create("pinned", SchedClassKind::Fair);
        task::with_mut(t, |task| {
            task.state = RunState::Interruptible;
            task.affinity = CpuMask::single(3);
        });
        assert_eq!(select_wakeup_cpu(t), 3);
    }
}
