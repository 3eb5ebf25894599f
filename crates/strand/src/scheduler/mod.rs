//! Cooperative task scheduler
//!
//! One [`Scheduler`] multiplexes fd readiness, timers, deferred events and
//! background work on a single thread. Callers register tasks, then loop:
//!
//! ```rust,ignore
//! loop {
//!     let task = sched.fetch_next()?;
//!     sched.call_task(task);
//! }
//! ```
//!
//! Dispatch priority, highest first: already-Ready tasks, Events, due
//! foreground Timers, readable fds, writable fds, due Background work.

mod dispatch;
mod exec;
mod pool;
mod queue;
mod readiness;
mod task;

pub use readiness::{PollReadiness, ReadyFds, Readiness};
pub use task::{
    strip_name, CallbackId, KindSet, Payload, Task, TaskArg, TaskFn, TaskHandle, TaskKind,
};

use crate::config::SchedulerConfig;
use crate::error::{Interest, SchedError, SchedResult};
use crate::profiler::{ProfilingRegistry, SharedRegistry};
use crate::time::{ClockKind, TimeSource, TimeVal};
use queue::TaskQueues;
use std::os::fd::RawFd;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Single-threaded task scheduler.
///
/// Holds `Rc` state, so it never leaves the thread that created it.
pub struct Scheduler {
    config: SchedulerConfig,
    queues: TaskQueues,
    clock: TimeSource,
    readiness: Box<dyn Readiness>,
    registry: SharedRegistry,
}

impl Scheduler {
    /// Scheduler with a private profiling registry and the `poll(2)` backend.
    ///
    /// Fails with `SchedError::Config` if `config` does not validate.
    pub fn new(config: SchedulerConfig) -> SchedResult<Self> {
        Self::with_registry(config, ProfilingRegistry::shared())
    }

    /// Scheduler that aggregates into an existing registry.
    pub fn with_registry(config: SchedulerConfig, registry: SharedRegistry) -> SchedResult<Self> {
        let clock = TimeSource::new(config.monotonic);
        Self::with_parts(config, clock, Box::new(PollReadiness::new()), registry)
    }

    /// Scheduler assembled from explicit parts.
    pub fn with_parts(
        config: SchedulerConfig,
        clock: TimeSource,
        readiness: Box<dyn Readiness>,
        registry: SharedRegistry,
    ) -> SchedResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, clock, readiness, registry))
    }

    fn assemble(
        config: SchedulerConfig,
        clock: TimeSource,
        readiness: Box<dyn Readiness>,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            queues: TaskQueues::new(config.max_tasks),
            config,
            clock,
            readiness,
            registry,
        }
    }

    /// Tear down: release every queued and pooled task, and the profiling
    /// registry unless another scheduler still shares it.
    pub fn destroy(self) {
        drop(self);
    }

    fn teardown(&mut self) {
        debug!(
            live = self.queues.pool.alloc(),
            pooled = self.queues.pool.free_count(),
            "scheduler teardown"
        );
        self.queues.clear();
        if Rc::strong_count(&self.registry) == 1 {
            self.registry.borrow_mut().reset();
        }
    }

    fn make_task(
        &self,
        kind: TaskKind,
        func: TaskFn,
        arg: TaskArg,
        name: &str,
        payload: Payload,
    ) -> Task {
        Task::new(kind, func, arg, strip_name(name, self.config.name_limit), payload)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    fn add_fd(
        &mut self,
        interest: Interest,
        fd: RawFd,
        func: TaskFn,
        arg: TaskArg,
        name: &str,
    ) -> SchedResult<TaskHandle> {
        // Checked before the task is built so a rejected call allocates nothing.
        if self.queues.has_interest(fd, interest) {
            warn!(fd, %interest, name, "There is already {} fd [{}]", interest, fd);
            return Err(SchedError::DuplicateRegistration { fd, interest });
        }
        let kind = match interest {
            Interest::Read => TaskKind::Read,
            Interest::Write => TaskKind::Write,
        };
        let task = self.make_task(kind, func, arg, name, Payload::Fd(fd));
        let handle = self.queues.insert_fd(task, fd, interest)?;
        trace!(fd, %interest, name, "fd task registered");
        Ok(handle)
    }

    /// Run `func` once `fd` becomes readable.
    ///
    /// At most one read task per descriptor; a second registration fails
    /// with `DuplicateRegistration` and leaves the first in place.
    pub fn add_read(
        &mut self,
        fd: RawFd,
        func: TaskFn,
        arg: TaskArg,
        name: &str,
    ) -> SchedResult<TaskHandle> {
        self.add_fd(Interest::Read, fd, func, arg, name)
    }

    /// Run `func` once `fd` becomes writable.
    pub fn add_write(
        &mut self,
        fd: RawFd,
        func: TaskFn,
        arg: TaskArg,
        name: &str,
    ) -> SchedResult<TaskHandle> {
        self.add_fd(Interest::Write, fd, func, arg, name)
    }

    fn add_timed(
        &mut self,
        kind: TaskKind,
        func: TaskFn,
        arg: TaskArg,
        delay: TimeVal,
        name: &str,
    ) -> SchedResult<TaskHandle> {
        let wake = self.clock.monotonic().plus(delay);
        let task = self.make_task(kind, func, arg, name, Payload::WakeAt(wake));
        let handle = self.queues.insert_sorted(task, wake)?;
        trace!(
            ?kind,
            name,
            wake_sec = wake.sec,
            wake_usec = wake.usec,
            "timed task registered"
        );
        Ok(handle)
    }

    /// Run `func` after `secs` seconds.
    pub fn add_timer(
        &mut self,
        func: TaskFn,
        arg: TaskArg,
        secs: i64,
        name: &str,
    ) -> SchedResult<TaskHandle> {
        self.add_timed(TaskKind::Timer, func, arg, TimeVal::from_secs(secs), name)
    }

    /// Run `func` after `millis` milliseconds.
    pub fn add_timer_msec(
        &mut self,
        func: TaskFn,
        arg: TaskArg,
        millis: i64,
        name: &str,
    ) -> SchedResult<TaskHandle> {
        self.add_timed(TaskKind::Timer, func, arg, TimeVal::from_millis(millis), name)
    }

    /// Run `func` as background work after `millis` milliseconds. Zero means
    /// eligible immediately. Background work yields to every other category.
    pub fn add_background(
        &mut self,
        func: TaskFn,
        arg: TaskArg,
        millis: i64,
        name: &str,
    ) -> SchedResult<TaskHandle> {
        self.add_timed(TaskKind::Background, func, arg, TimeVal::from_millis(millis), name)
    }

    /// Run `func` on the next dispatch, ahead of any I/O or timer work.
    pub fn add_event(
        &mut self,
        func: TaskFn,
        arg: TaskArg,
        value: i32,
        name: &str,
    ) -> SchedResult<TaskHandle> {
        let task = self.make_task(TaskKind::Event, func, arg, name, Payload::Value(value));
        let handle = self.queues.insert_fifo(task)?;
        trace!(value, name, "event registered");
        Ok(handle)
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Remove a queued task and recycle it. Returns false if the handle is
    /// stale (already fetched or cancelled).
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let cancelled = self.queues.cancel(handle);
        debug!(index = handle.index, cancelled, "cancel");
        cancelled
    }

    /// Cancel every pending Event whose argument is `arg` (same allocation,
    /// or both empty).
    /// Returns the number removed.
    pub fn cancel_by_arg(&mut self, arg: &TaskArg) -> usize {
        let removed = self.queues.cancel_events_by_arg(arg);
        debug!(removed, "cancel events by argument");
        removed
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// A queued task, if the handle is still current.
    pub fn task(&self, handle: TaskHandle) -> Option<&Task> {
        self.queues.get(handle)
    }

    /// Current category of a queued task.
    pub fn kind_of(&self, handle: TaskHandle) -> Option<TaskKind> {
        self.task(handle).map(Task::kind)
    }

    /// Number of tasks in a category queue. `Unused` counts pooled objects.
    pub fn queue_len(&self, kind: TaskKind) -> usize {
        self.queues.len(kind)
    }

    /// Whether a read task is outstanding for `fd`.
    pub fn has_read_interest(&self, fd: RawFd) -> bool {
        self.queues.has_interest(fd, Interest::Read)
    }

    /// Whether a write task is outstanding for `fd`.
    pub fn has_write_interest(&self, fd: RawFd) -> bool {
        self.queues.has_interest(fd, Interest::Write)
    }

    /// Task objects in existence, queued or pooled.
    pub fn live_tasks(&self) -> usize {
        self.queues.pool.alloc()
    }

    /// Whole seconds until a queued Timer/Background task is due; 0 if it is
    /// due already or the handle does not name a timed task.
    pub fn timer_remain_seconds(&mut self, handle: TaskHandle) -> u64 {
        let Some(wake) = self.task(handle).and_then(Task::wake_at) else {
            return 0;
        };
        let now = self.clock.monotonic();
        u64::try_from(wake.sec - now.sec).unwrap_or(0)
    }

    /// Sample a clock.
    pub fn now(&mut self, kind: ClockKind) -> TimeVal {
        self.clock.now(kind)
    }

    /// The scheduler's time source.
    pub fn clock(&self) -> &TimeSource {
        &self.clock
    }

    /// Mutable access to the time source.
    pub fn clock_mut(&mut self) -> &mut TimeSource {
        &mut self.clock
    }

    /// Profiling registry handle.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Active configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        let config = SchedulerConfig::default();
        let clock = TimeSource::new(config.monotonic);
        let readiness = Box::new(PollReadiness::new());
        Self::assemble(config, clock, readiness, ProfilingRegistry::shared())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}
