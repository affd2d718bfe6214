//! Cooperative shutdown flag driving reactor termination.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag observed by the reactor loop at the top of every iteration.
///
/// Cloning yields another handle to the same flag, so signal handlers,
/// watch callbacks, and the command dispatcher can all request termination.
/// Triggering is idempotent and the flag is never cleared; a fresh server
/// starts with a fresh flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Safe to call from a signal handler: the only
    /// action is an atomic store.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Shared atomic for registration with the signal-hook flag API.
    pub(crate) fn shared(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}
