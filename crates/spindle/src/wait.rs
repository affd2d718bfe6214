//! Pluggable readiness-wait primitive.
//!
//! The reactor suspends in exactly one place: the [`WaitStrategy`] supplied
//! at server construction. Production servers use [`PollWait`], backed by
//! `poll(2)`; tests inject scripted strategies to simulate readiness without
//! real descriptors.

use std::collections::BTreeMap;
use std::io;
use std::os::fd::{BorrowedFd, RawFd};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use thiserror::Error;

/// Descriptor sets requested from the wait primitive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WaitSets {
    /// Descriptors watched for readability.
    pub reads: Vec<RawFd>,
    /// Descriptors watched for writability.
    pub writes: Vec<RawFd>,
    /// Descriptors watched for exceptional conditions.
    pub errors: Vec<RawFd>,
}

/// Descriptors the wait primitive reported ready, per condition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadySets {
    /// Descriptors ready to read.
    pub reads: Vec<RawFd>,
    /// Descriptors ready to write.
    pub writes: Vec<RawFd>,
    /// Descriptors in an exceptional condition.
    pub errors: Vec<RawFd>,
}

impl ReadySets {
    /// Whether nothing was reported ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty() && self.errors.is_empty()
    }
}

/// Failures reported by a wait strategy.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The wait was interrupted by signal delivery (the EINTR condition).
    /// Recovered transparently inside the reactor loop; never surfaced.
    #[error("readiness wait interrupted by signal")]
    Interrupted,
    /// Any other wait failure; propagates out of the loop.
    #[error("readiness wait failed: {source}")]
    Os {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Blocking readiness-wait over three descriptor sets.
///
/// This is the reactor's sole suspension point and must be interruptible by
/// signal delivery so a termination signal arriving mid-wait can be observed
/// on the next iteration.
pub trait WaitStrategy {
    /// Blocks until at least one requested descriptor is ready or the wait
    /// is interrupted.
    fn wait(&mut self, sets: &WaitSets) -> Result<ReadySets, WaitError>;
}

/// Production wait strategy backed by `poll(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollWait;

impl PollWait {
    /// Creates the default strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for PollWait {
    fn wait(&mut self, sets: &WaitSets) -> Result<ReadySets, WaitError> {
        // Merge per-descriptor interest so a descriptor present in several
        // request sets occupies a single pollfd slot.
        let mut interest: BTreeMap<RawFd, PollFlags> = BTreeMap::new();
        for &fd in &sets.reads {
            *interest.entry(fd).or_insert(PollFlags::empty()) |= PollFlags::POLLIN;
        }
        for &fd in &sets.writes {
            *interest.entry(fd).or_insert(PollFlags::empty()) |= PollFlags::POLLOUT;
        }
        for &fd in &sets.errors {
            *interest.entry(fd).or_insert(PollFlags::empty()) |= PollFlags::POLLPRI;
        }

        let mut poll_fds: Vec<PollFd<'_>> = interest
            .iter()
            .map(|(&fd, &flags)| {
                // SAFETY: the registry tracks descriptor identity, not
                // ownership; the embedder keeps watched descriptors open for
                // as long as they stay registered.
                let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                PollFd::new(borrowed, flags)
            })
            .collect();

        match poll(&mut poll_fds, PollTimeout::NONE) {
            Err(Errno::EINTR) => return Err(WaitError::Interrupted),
            Err(errno) => {
                return Err(WaitError::Os {
                    source: io::Error::from_raw_os_error(errno as i32),
                });
            }
            Ok(_) => {}
        }

        let mut ready = ReadySets::default();
        for ((&fd, &requested), poll_fd) in interest.iter().zip(&poll_fds) {
            let Some(revents) = poll_fd.revents() else {
                continue;
            };
            // Hangup and error conditions surface on the read side so a read
            // callback can observe EOF, mirroring select(2) semantics; the
            // error set additionally reports POLLERR for descriptors watched
            // for exceptional conditions.
            if requested.contains(PollFlags::POLLIN)
                && revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
            {
                ready.reads.push(fd);
            }
            if requested.contains(PollFlags::POLLOUT)
                && revents.intersects(PollFlags::POLLOUT | PollFlags::POLLERR)
            {
                ready.writes.push(fd);
            }
            if requested.contains(PollFlags::POLLPRI)
                && revents.intersects(PollFlags::POLLPRI | PollFlags::POLLERR | PollFlags::POLLHUP)
            {
                ready.errors.push(fd);
            }
        }
        Ok(ready)
    }
}
