//! Idle class: the bottom of `CLASS_ORDER`. Always has exactly one
//! runnable task per CPU (that CPU's idle task), so `pick_next_task`
//! never has to fail the walk down the class list.

use crate::sched::task::TaskId;

#[derive(Default)]
pub struct IdleRq {
    idle_task: Option<TaskId>,
}

impl IdleRq {
    pub const fn new() -> Self {
        IdleRq { idle_task: None }
    }

    pub fn set(&mut self, tid: TaskId) {
        self.idle_task = Some(tid);
    }

    pub fn pick(&self) -> Option<TaskId> {
        self.idle_task
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_task_is_always_available_once_set() {
        let mut rq = IdleRq::new();
        assert_eq!(rq.pick(), None);
        rq.set(TaskId(0));
        assert_eq!(rq.pick(), Some(TaskId(0)));
    }
}
