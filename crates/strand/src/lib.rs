//! Strand: cooperative single-threaded task scheduler
//!
//! This crate provides the event loop core for a single-threaded daemon:
//! - **Scheduler**: fd readiness, timers, events and background work, dispatched
//!   by strict priority (`scheduler` module)
//! - **Profiler**: per-callback call counts and wall-time statistics
//!   (`profiler` module)
//! - **Time**: wall-clock, monotonic and stabilized time views (`time` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use strand::{Scheduler, SchedulerConfig, Task, TaskArg};
//!
//! fn hello(sched: &mut Scheduler, task: &Task) -> i32 {
//!     sched.add_timer(hello, task.arg().clone(), 10, "hello").ok();
//!     0
//! }
//!
//! let mut sched = Scheduler::new(SchedulerConfig::default())?;
//! sched.add_timer(hello, TaskArg::none(), 10, "hello")?;
//! loop {
//!     let task = sched.fetch_next()?;
//!     sched.call_task(task);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Modules
// ============================================================================

/// Configuration loaded from TOML
pub mod config;

/// Error types
pub mod error;

/// Per-callback statistics and report rendering
pub mod profiler;

/// Task queues, dispatcher and execution wrapper
pub mod scheduler;

/// Time sampling
pub mod time;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::SchedulerConfig;
pub use error::{Interest, SchedError, SchedResult};
pub use profiler::{ProfileRecord, ProfilingRegistry, SharedRegistry};
pub use scheduler::{
    CallbackId, KindSet, Payload, PollReadiness, ReadyFds, Readiness, Scheduler, Task, TaskArg,
    TaskFn, TaskHandle, TaskKind,
};
pub use time::{ClockKind, MonotonicMode, TimeSource, TimeVal, WallClock};
