//! Scheduler errors

use std::io;
use std::os::fd::RawFd;

/// Which readiness direction an fd registration is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    /// Readable.
    Read,
    /// Writable.
    Write,
}

impl std::fmt::Display for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interest::Read => f.write_str("read"),
            Interest::Write => f.write_str("write"),
        }
    }
}

/// Errors surfaced by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    /// The descriptor already has an outstanding task for this direction.
    /// The existing registration is untouched.
    #[error("There is already {interest} fd [{fd}]")]
    DuplicateRegistration {
        /// Descriptor that was registered twice.
        fd: RawFd,
        /// Direction of the rejected registration.
        interest: Interest,
    },

    /// The readiness wait failed for a reason other than interruption.
    /// The scheduler cannot continue.
    #[error("readiness wait failed: {0}")]
    Wait(#[from] io::Error),

    /// No task object could be obtained.
    #[error("task pool exhausted ({live} live tasks)")]
    PoolExhausted {
        /// Live allocations at the time of failure.
        live: usize,
    },

    /// Configuration could not be parsed or is invalid.
    #[error("invalid scheduler configuration: {0}")]
    Config(String),
}

impl SchedError {
    /// Whether the scheduling loop must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedError::Wait(_) | SchedError::PoolExhausted { .. })
    }
}

/// Scheduler result
pub type SchedResult<T> = Result<T, SchedError>;
