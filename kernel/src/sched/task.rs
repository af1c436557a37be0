//! `Task`: the schedulable entity of spec §3 — identity, run state,
//! scheduling-class payload, affinity, and accounting. Stored in a
//! single global arena (same pattern as `vmm::vma`/`vmm::folio`) rather
//! than an intrusive linked structure, since the per-class runqueues
//! only ever need a stable [`TaskId`] to key their trees/lists by.

use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::sched::class::{DlEntity, FairEntity, RtEntity, SchedClassKind};
use crate::vmm::address_space::AddressSpaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Run state per spec §3; transitions per spec §4.2 "State transitions".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Interruptible,
    Uninterruptible,
    Stopped,
    Dead,
}

/// CPU affinity as a bitmask over logical CPU ids (spec's "CPU affinity
/// mask"); bit `i` set means the task may run on CPU `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuMask(pub u64);

impl CpuMask {
    pub const ALL: CpuMask = CpuMask(u64::MAX);

    pub fn single(cpu: usize) -> Self {
        CpuMask(1u64 << cpu)
    }

    pub fn contains(&self, cpu: usize) -> bool {
        cpu < 64 && (self.0 & (1u64 << cpu)) != 0
    }

    pub fn is_pinned_to_one(&self) -> Option<usize> {
        if self.0.count_ones() == 1 {
            Some(self.0.trailing_zeros() as usize)
        } else {
            None
        }
    }
}

/// Per-class payload (spec §3 "Sched entity"): exactly one variant is
/// live depending on `Task::class`.
#[derive(Debug, Clone, Copy)]
pub enum ClassPayload {
    Fair(FairEntity),
    Deadline(DlEntity),
    Realtime(RtEntity),
    Idle,
}

pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub state: RunState,
    pub class: SchedClassKind,
    pub payload: ClassPayload,
    pub affinity: CpuMask,
    pub current_cpu: usize,
    pub mm: Option<AddressSpaceId>,
    /// Accounting (spec §3: "accounting counters").
    pub sum_exec_runtime: u64,
    pub nr_switches: u64,
    pub nr_voluntary_switches: u64,
    /// Debug-build-only canary for the stack this task would run on;
    /// checked on exit (spec §5: "a BUG assertion in debug builds").
    pub stack_canary: u64,
    refcount: u32,
    /// Pending-signal flag consulted by `wait_event_interruptible`
    /// (spec §5 "Cancellation and timeouts": "cancellation is carried
    /// via task state transitions").
    pub signal_pending: bool,
}

impl Task {
    fn new(id: TaskId, name: String, class: SchedClassKind, payload: ClassPayload) -> Self {
        Task {
            id,
            name,
            state: RunState::Interruptible,
            class,
            payload,
            affinity: CpuMask::ALL,
            current_cpu: 0,
            mm: None,
            sum_exec_runtime: 0,
            nr_switches: 0,
            nr_voluntary_switches: 0,
            stack_canary: 0xDEAD_C0DE_0BAD_C0DE ^ id.0,
            refcount: 1,
            signal_pending: false,
        }
    }
}

struct Arena {
    tasks: Vec<Option<Task>>,
    free_slots: Vec<u32>,
}

impl Arena {
    const fn new() -> Self {
        Arena { tasks: Vec::new(), free_slots: Vec::new() }
    }

    fn insert(&mut self, build: impl FnOnce(TaskId) -> Task) -> TaskId {
        if let Some(slot) = self.free_slots.pop() {
            let id = TaskId(slot as u64);
            self.tasks[slot as usize] = Some(build(id));
            id
        } else {
            let id = TaskId(self.tasks.len() as u64);
            self.tasks.push(Some(build(id)));
            id
        }
    }
}

static ARENA: crate::sync::spinlock::SpinLock<Arena> =
    crate::sync::spinlock::SpinLock::new(Arena::new());
static NEXT_PID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh task in the `Interruptible` state with the default
/// per-class payload for `class`, not yet enqueued on any runqueue.
pub fn create(name: &str, class: SchedClassKind) -> TaskId {
    let _pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
    let payload = match class {
        SchedClassKind::Deadline => ClassPayload::Deadline(DlEntity::default()),
        SchedClassKind::Realtime => ClassPayload::Realtime(RtEntity::default()),
        SchedClassKind::Fair => ClassPayload::Fair(FairEntity::default()),
        SchedClassKind::Idle => ClassPayload::Idle,
    };
    ARENA
        .lock()
        .insert(|id| Task::new(id, String::from(name), class, payload))
}

pub fn with<R>(id: TaskId, f: impl FnOnce(&Task) -> R) -> Option<R> {
    let arena = ARENA.lock();
    arena.tasks.get(id.0 as usize)?.as_ref().map(f)
}

pub fn with_mut<R>(id: TaskId, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
    let mut arena = ARENA.lock();
    arena.tasks.get_mut(id.0 as usize)?.as_mut().map(f)
}

/// Drop the last reference; called once a task has run its final
/// scheduling round (spec §3 Task lifetime) and nothing else observes
/// it (e.g. no wait_queue entry still references it).
pub fn retain(id: TaskId) {
    with_mut(id, |_| ());
    let _ = id;
}

pub fn release(id: TaskId) -> bool {
    let zero = with_mut(id, |t| {
        t.refcount = t.refcount.saturating_sub(1);
        t.refcount == 0
    });
    if zero == Some(true) {
        let mut arena = ARENA.lock();
        if let Some(slot) = arena.tasks.get_mut(id.0 as usize) {
            if slot.take().is_some() {
                arena.free_slots.push(id.0 as u32);
            }
        }
        true
    } else {
        false
    }
}

static CANARY_VIOLATIONS: AtomicU32 = AtomicU32::new(0);

/// Debug-build stack-canary check on task exit, matching the teacher's
/// `sched/task.rs` canary convention folded in per `SPEC_FULL.md`'s
/// supplemental-feature list.
pub fn check_canary_on_exit(id: TaskId) {
    if cfg!(debug_assertions) {
        let intact = with(id, |t| t.stack_canary == (0xDEAD_C0DE_0BAD_C0DE ^ t.id.0));
        if intact == Some(false) {
            CANARY_VIOLATIONS.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub fn canary_violations() -> u32 {
    CANARY_VIOLATIONS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_default_payload_for_class() {
        let id = create("cfs-task", SchedClassKind::Fair);
        let is_fair = with(id, |t| matches!(t.payload, ClassPayload::Fair(_)));
        assert_eq!(is_fair, Some(true));
    }

    #[test]
    fn release_frees_the_slot_for_reuse() {
        let id = create("short-lived", SchedClassKind::Idle);
        assert!(release(id));
        let id2 = create("reused", SchedClassKind::Idle);
        assert_eq!(id, id2);
    }

    #[test]
    fn cpu_mask_pinned_detection() {
        assert_eq!(CpuMask::single(3).is_pinned_to_one(), Some(3));
        assert_eq!(CpuMask::ALL.is_pinned_to_one(), None);
        assert!(CpuMask::single(3).contains(3));
        assert!(!CpuMask::single(3).contains(2));
    }
}
