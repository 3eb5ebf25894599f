//! Readiness wait primitive.
//!
//! The dispatcher blocks in exactly one place: [`Readiness::wait`]. The
//! default backend is `poll(2)`; tests swap in scripted backends.

use rustc_hash::{FxHashMap, FxHashSet};
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Descriptors reported ready by one wait.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadyFds {
    /// Ready for reading (includes hang-up and error).
    pub readable: FxHashSet<RawFd>,
    /// Ready for writing.
    pub writable: FxHashSet<RawFd>,
}

impl ReadyFds {
    /// Whether nothing became ready.
    pub fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writable.is_empty()
    }
}

/// Blocks until a watched descriptor is ready or the timeout elapses.
pub trait Readiness {
    /// Wait on `read` for readability and `write` for writability.
    ///
    /// `timeout == None` waits indefinitely. An `ErrorKind::Interrupted`
    /// error is retried by the caller; any other error is fatal.
    fn wait(
        &mut self,
        read: &[RawFd],
        write: &[RawFd],
        timeout: Option<Duration>,
    ) -> io::Result<ReadyFds>;
}

/// `poll(2)` backend.
#[derive(Default)]
pub struct PollReadiness {
    fds: Vec<libc::pollfd>,
    /// Position of each descriptor in `fds`.
    index: FxHashMap<RawFd, usize>,
}

impl PollReadiness {
    /// New backend with an empty descriptor buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn build(&mut self, read: &[RawFd], write: &[RawFd]) {
        self.fds.clear();
        self.index.clear();
        let interests = read
            .iter()
            .map(|&fd| (fd, libc::POLLIN))
            .chain(write.iter().map(|&fd| (fd, libc::POLLOUT)));
        for (fd, events) in interests {
            match self.index.get(&fd) {
                Some(&pos) => self.fds[pos].events |= events,
                None => {
                    self.index.insert(fd, self.fds.len());
                    self.fds.push(libc::pollfd {
                        fd,
                        events,
                        revents: 0,
                    });
                }
            }
        }
    }
}

/// Milliseconds for `poll`, rounded up so a timer is never polled early.
fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_micros().div_ceil(1000);
            libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
        }
    }
}

impl Readiness for PollReadiness {
    fn wait(
        &mut self,
        read: &[RawFd],
        write: &[RawFd],
        timeout: Option<Duration>,
    ) -> io::Result<ReadyFds> {
        self.build(read, write);

        // SAFETY: `fds` is a live, correctly sized buffer of pollfd structs.
        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut ready = ReadyFds::default();
        if n == 0 {
            return Ok(ready);
        }
        for p in &self.fds {
            if p.revents == 0 {
                continue;
            }
            if p.revents & libc::POLLNVAL != 0 {
                // A watched descriptor was closed behind the scheduler's back.
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            let failed = p.revents & (libc::POLLERR | libc::POLLHUP) != 0;
            if p.events & libc::POLLIN != 0 && (p.revents & libc::POLLIN != 0 || failed) {
                ready.readable.insert(p.fd);
            }
            if p.events & libc::POLLOUT != 0 && (p.revents & libc::POLLOUT != 0 || failed) {
                ready.writable.insert(p.fd);
            }
        }
        Ok(ready)
    }
}
