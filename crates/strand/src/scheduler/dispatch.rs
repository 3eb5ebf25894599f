//! Dispatcher: pick the next task to run.

use super::{Scheduler, Task, TaskKind};
use crate::error::{Interest, SchedError, SchedResult};
use crate::time::TimeVal;
use std::io;
use std::time::Duration;
use tracing::{error, trace};

impl Scheduler {
    /// Block until a task is runnable and hand it out.
    ///
    /// The returned task is detached: its slot has already been recycled and
    /// its handle is stale. Pass it to [`call_task`](Scheduler::call_task).
    ///
    /// Fails only when the readiness wait reports an error other than
    /// `Interrupted`; that error is fatal to the loop.
    pub fn fetch_next(&mut self) -> SchedResult<Task> {
        loop {
            if let Some(task) = self.queues.pop_ready() {
                trace!(name = task.name(), origin = ?task.origin(), "dispatch");
                return Ok(task);
            }

            let events = self.queues.promote_all(TaskKind::Event);
            if events > 0 {
                trace!(events, "events promoted");
            }

            let (read_fds, write_fds) = self.queues.snapshot_interest();
            let ready = loop {
                let timeout = self.wait_timeout();
                match self.readiness.wait(&read_fds, &write_fds, timeout) {
                    Ok(ready) => break ready,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                        trace!("readiness wait interrupted, retrying");
                    }
                    Err(e) => {
                        error!(error = %e, "readiness wait failed");
                        return Err(SchedError::Wait(e));
                    }
                }
            };

            let now = self.clock.monotonic();
            self.queues.promote_due(TaskKind::Timer, now);

            if !ready.is_empty() {
                self.queues
                    .promote_fds(TaskKind::Read, Interest::Read, &ready.readable);
                self.queues
                    .promote_fds(TaskKind::Write, Interest::Write, &ready.writable);
            }

            self.queues.promote_due(TaskKind::Background, now);
        }
    }

    /// Wait bound for the next readiness call: zero when work is already
    /// Ready, the distance to the earliest timed entry otherwise, or
    /// unbounded when nothing is timed.
    fn wait_timeout(&mut self) -> Option<Duration> {
        if self.queues.len(TaskKind::Ready) > 0 {
            return Some(Duration::ZERO);
        }
        let earliest = [
            self.queues.head_wake(TaskKind::Timer),
            self.queues.head_wake(TaskKind::Background),
        ]
        .into_iter()
        .flatten()
        .min()?;
        let now = self.clock.monotonic();
        Some(remaining(earliest, now))
    }
}

fn remaining(wake: TimeVal, now: TimeVal) -> Duration {
    if wake <= now {
        Duration::ZERO
    } else {
        wake.minus(now).to_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::scripted;
    use crate::scheduler::TaskArg;

    fn on_timer(_: &mut Scheduler, _: &Task) -> i32 {
        31
    }

    fn on_read(_: &mut Scheduler, _: &Task) -> i32 {
        32
    }

    fn on_event(_: &mut Scheduler, _: &Task) -> i32 {
        33
    }

    fn on_background(_: &mut Scheduler, _: &Task) -> i32 {
        34
    }

    #[test]
    fn test_remaining_clamps() {
        let now = TimeVal::new(10, 0);
        assert_eq!(remaining(TimeVal::new(9, 0), now), Duration::ZERO);
        assert_eq!(
            remaining(TimeVal::new(11, 500_000), now),
            Duration::from_millis(1_500)
        );
    }

    #[test]
    fn test_events_before_io_and_timers() {
        let (mut sched, _, script) = scripted();
        sched.add_read(5, on_read, TaskArg::none(), "on_read").unwrap();
        sched.add_timer_msec(on_timer, TaskArg::none(), 0, "on_timer").unwrap();
        sched.add_event(on_event, TaskArg::none(), 1, "first").unwrap();
        sched.add_event(on_event, TaskArg::none(), 2, "second").unwrap();
        script.readable(&[5]);

        // Events are promoted ahead of the wait, so they head Ready.
        let order: Vec<String> = (0..4)
            .map(|_| sched.fetch_next().unwrap().name().to_string())
            .collect();
        assert_eq!(order, ["first", "second", "on_timer", "on_read"]);
        assert!(!sched.has_read_interest(5));
    }

    #[test]
    fn test_wait_timeout_tracks_earliest_timer() {
        let (mut sched, _, script) = scripted();
        sched.add_timer(on_timer, TaskArg::none(), 5, "late").unwrap();
        sched.add_background(on_background, TaskArg::none(), 2_000, "bg").unwrap();

        // The scripted clock never moves, so the wait returns empty and the
        // dispatcher loops; stop it with a fatal error.
        script.push(Ok(Default::default()));
        script.push(Err(io::Error::from_raw_os_error(libc::EBADF)));
        let err = sched.fetch_next().unwrap_err();
        assert!(err.is_fatal());

        let timeouts = script.timeouts.borrow();
        assert_eq!(timeouts[0], Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_no_timed_work_waits_forever() {
        let (mut sched, _, script) = scripted();
        sched.add_read(9, on_read, TaskArg::none(), "on_read").unwrap();
        script.push(Err(io::Error::from_raw_os_error(libc::EBADF)));

        assert!(sched.fetch_next().is_err());
        assert_eq!(script.timeouts.borrow()[0], None);
    }

    #[test]
    fn test_interrupted_wait_is_retried() {
        let (mut sched, clock, script) = scripted();
        sched.add_timer(on_timer, TaskArg::none(), 1, "tick").unwrap();
        script.push(Err(io::Error::from(io::ErrorKind::Interrupted)));
        script.push(Err(io::Error::from(io::ErrorKind::Interrupted)));
        clock.set(TimeVal::from_secs(1_001));

        let task = sched.fetch_next().unwrap();
        assert_eq!(task.name(), "tick");
        // Two interrupted waits plus the one that succeeded
        assert_eq!(script.timeouts.borrow().len(), 3);
    }

    #[test]
    fn test_background_waits_for_foreground() {
        let (mut sched, _, script) = scripted();
        sched.add_background(on_background, TaskArg::none(), 0, "bg").unwrap();
        sched.add_read(4, on_read, TaskArg::none(), "on_read").unwrap();
        script.readable(&[4]);

        let first = sched.fetch_next().unwrap();
        let second = sched.fetch_next().unwrap();
        assert_eq!(first.name(), "on_read");
        assert_eq!(second.name(), "bg");
        assert_eq!(second.origin(), TaskKind::Background);
    }

    #[test]
    fn test_fetched_handle_is_stale() {
        let (mut sched, _, _) = scripted();
        let h = sched.add_event(on_event, TaskArg::none(), 0, "e").unwrap();
        let task = sched.fetch_next().unwrap();

        assert_eq!(task.handle(), h);
        assert!(sched.task(h).is_none());
        assert!(!sched.cancel(h));
        assert_eq!(sched.queue_len(TaskKind::Unused), 1);
    }
}
