//! Descriptor readiness bookkeeping for the reactor loop.
//!
//! The registry tracks which file descriptors a module is interested in and
//! which callback fires for each readiness condition. It tracks descriptor
//! *identity* only: ownership stays with whatever opened the descriptor, and
//! the registry never validates openness.
//!
//! The handle is cheaply cloneable so watch callbacks can capture it and
//! change registrations while they fire. Mutations only ever affect the next
//! iteration's snapshot; the reactor captures the callbacks it is about to
//! invoke before invoking any of them.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::os::fd::RawFd;
use std::rc::Rc;

use thiserror::Error;

use crate::wait::WaitSets;

/// Callback handle fired when a watched descriptor reports ready.
///
/// The shared wrapper lets a firing callback unregister itself (or anything
/// else) without invalidating the snapshot the reactor is iterating.
pub type WatchCallback = Rc<RefCell<dyn FnMut()>>;

/// Wraps a closure into a [`WatchCallback`] handle.
pub fn watch_callback(callback: impl FnMut() + 'static) -> WatchCallback {
    Rc::new(RefCell::new(callback))
}

/// Readiness conditions a descriptor can be watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessKind {
    /// Descriptor has data to read.
    Readable,
    /// Descriptor accepts writes.
    Writable,
    /// Descriptor is in an exceptional condition.
    Errorable,
}

impl fmt::Display for ReadinessKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Readable => "readable",
            Self::Writable => "writable",
            Self::Errorable => "errorable",
        };
        formatter.write_str(label)
    }
}

/// Raised when `unwatch_fileno` names a callback slot that was never
/// registered for the descriptor.
#[derive(Debug, Error)]
#[error("no {kind} watch registered for descriptor {fd}")]
pub struct UnregisteredWatchError {
    /// Descriptor the caller tried to unwatch.
    pub fd: RawFd,
    /// Slot that had no registration.
    pub kind: ReadinessKind,
}

#[derive(Default)]
struct WatchEntry {
    read: Option<WatchCallback>,
    write: Option<WatchCallback>,
    error: Option<WatchCallback>,
}

impl WatchEntry {
    fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none() && self.error.is_none()
    }

    fn slot(&self, kind: ReadinessKind) -> &Option<WatchCallback> {
        match kind {
            ReadinessKind::Readable => &self.read,
            ReadinessKind::Writable => &self.write,
            ReadinessKind::Errorable => &self.error,
        }
    }

    fn slot_mut(&mut self, kind: ReadinessKind) -> &mut Option<WatchCallback> {
        match kind {
            ReadinessKind::Readable => &mut self.read,
            ReadinessKind::Writable => &mut self.write,
            ReadinessKind::Errorable => &mut self.error,
        }
    }
}

/// Watch/unwatch bookkeeping shared between the server and its callbacks.
#[derive(Clone, Default)]
pub struct ReadinessRegistry {
    entries: Rc<RefCell<BTreeMap<RawFd, WatchEntry>>>,
}

impl ReadinessRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers callbacks for any subset of the readiness conditions of
    /// `fd`. Repeated calls merge into the existing entry: a slot left `None`
    /// keeps whatever was registered before, while a supplied slot replaces
    /// the previous handle for that condition.
    pub fn watch_fileno(
        &self,
        fd: RawFd,
        read: Option<WatchCallback>,
        write: Option<WatchCallback>,
        error: Option<WatchCallback>,
    ) {
        let mut entries = self.entries.borrow_mut();
        let entry = entries.entry(fd).or_default();
        if read.is_some() {
            entry.read = read;
        }
        if write.is_some() {
            entry.write = write;
        }
        if error.is_some() {
            entry.error = error;
        }
    }

    /// Clears the selected callback slots of `fd`.
    ///
    /// Every requested slot must currently be registered; otherwise the call
    /// fails with [`UnregisteredWatchError`] and clears nothing. Safe to call
    /// from inside a firing callback: the removal affects the next
    /// iteration's snapshot, never the one already being dispatched.
    pub fn unwatch_fileno(
        &self,
        fd: RawFd,
        read: bool,
        write: bool,
        error: bool,
    ) -> Result<(), UnregisteredWatchError> {
        let mut entries = self.entries.borrow_mut();
        let requested = [
            (read, ReadinessKind::Readable),
            (write, ReadinessKind::Writable),
            (error, ReadinessKind::Errorable),
        ];

        for (selected, kind) in requested {
            if !selected {
                continue;
            }
            let registered = entries
                .get(&fd)
                .is_some_and(|entry| entry.slot(kind).is_some());
            if !registered {
                return Err(UnregisteredWatchError { fd, kind });
            }
        }

        if let Some(entry) = entries.get_mut(&fd) {
            for (selected, kind) in requested {
                if selected {
                    *entry.slot_mut(kind) = None;
                }
            }
            if entry.is_empty() {
                entries.remove(&fd);
            }
        }
        Ok(())
    }

    /// Current read/write/error descriptor sets, sorted and deduplicated,
    /// for assembling the readiness-wait request.
    #[must_use]
    pub fn wait_sets(&self) -> WaitSets {
        let entries = self.entries.borrow();
        let mut sets = WaitSets::default();
        for (&fd, entry) in entries.iter() {
            if entry.read.is_some() {
                sets.reads.push(fd);
            }
            if entry.write.is_some() {
                sets.writes.push(fd);
            }
            if entry.error.is_some() {
                sets.errors.push(fd);
            }
        }
        sets
    }

    /// Callback registered for `fd` under `kind`, if any. Returns a clone of
    /// the handle so the reactor's snapshot survives later mutation.
    pub(crate) fn callback_for(&self, fd: RawFd, kind: ReadinessKind) -> Option<WatchCallback> {
        self.entries.borrow().get(&fd)?.slot(kind).clone()
    }
}

impl fmt::Debug for ReadinessRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.borrow();
        formatter
            .debug_struct("ReadinessRegistry")
            .field("descriptors", &entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
