//! Running tasks and accounting their cost.

use super::{CallbackId, Payload, Scheduler, Task, TaskArg, TaskFn, TaskKind};
use crate::time::TimeVal;
use tracing::trace;

impl Scheduler {
    /// Run a fetched task and account its wall time against its callback.
    ///
    /// The callback receives the scheduler, so it may register or cancel
    /// tasks, including re-arming itself. The task is dropped afterwards.
    pub fn call_task(&mut self, mut task: Task) {
        let id = *task.profile.get_or_insert_with(|| CallbackId::of(task.func));
        // Create the record up front; the borrow ends before the callback runs.
        self.registry.borrow_mut().get_or_insert(id, &task.name);

        task.started = self.clock.monotonic();
        self.clock.realtime();

        let func = task.func;
        func(self, &task);

        let finished = self.clock.monotonic();
        self.clock.realtime();
        let elapsed = u64::try_from(finished.elapsed_micros(task.started)).unwrap_or(0);

        trace!(name = %task.name, origin = ?task.origin, elapsed_us = elapsed, "task finished");
        self.registry
            .borrow_mut()
            .record(id, &task.name, task.origin, elapsed);
    }

    /// Build a task and run it right away, bypassing every queue.
    ///
    /// The task runs as an Event with `value` but is profiled under the
    /// Execute category.
    pub fn execute(&mut self, func: TaskFn, arg: TaskArg, value: i32, name: &str) {
        let mut task = self.make_task(TaskKind::Event, func, arg, name, Payload::Value(value));
        task.origin = TaskKind::Execute;
        self.call_task(task);
    }

    /// Whether `task` has run past its cooperative time slot.
    ///
    /// Long-running callbacks poll this and, when it returns true, re-arm
    /// themselves (usually with `add_event`) and return.
    pub fn should_yield(&mut self, task: &Task) -> bool {
        let now = self.clock.monotonic();
        let slot = TimeVal::from_duration(self.config.yield_slot());
        now.minus(task.started) > slot
    }
}
