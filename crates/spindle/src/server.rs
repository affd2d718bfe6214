//! Reactor loop and lifecycle controller.
//!
//! [`Server`] owns one run of an embedding module: it installs the
//! termination signal handlers, opens the control-channel session, runs the
//! module's setup hook, and then drives the readiness loop until shutdown is
//! requested. The loop is a single logical thread of control; within one
//! iteration the control-channel dispatch and all fired callbacks happen
//! strictly after the wait primitive returns and strictly before the next
//! wait call.
//!
//! `run` never lets an error escape: every failure path collapses to exit
//! status 1. Modules stop the loop with the shutdown command, a termination
//! signal, or [`ModuleError::Fatal`]; there is no other sanctioned way out.

use std::io;
use std::os::fd::RawFd;

use signal_hook::consts::{SIGINT, SIGTERM};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use spindle_config::Config;

use crate::dispatch::ModuleDispatcher;
use crate::module::{ModuleError, ServiceModule};
use crate::registry::{
    ReadinessKind, ReadinessRegistry, UnregisteredWatchError, WatchCallback,
};
use crate::session::{
    ControlSession, SessionError, SessionFactory, SessionSpec, SocketSessionFactory,
};
use crate::shutdown::ShutdownFlag;
use crate::wait::{PollWait, ReadySets, WaitError, WaitStrategy};

pub(crate) const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Failures surfaced by one server run.
///
/// `run` maps every variant to exit status 1; the variants exist so logs and
/// internal callers can tell the failure classes apart.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Installing the termination signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Signal {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The control-channel session failed.
    #[error("control channel session failed: {source}")]
    Session {
        /// Underlying session error.
        #[from]
        source: SessionError,
    },
    /// A module hook failed.
    #[error("module hook failed: {source}")]
    Module {
        /// Underlying module error.
        #[from]
        source: ModuleError,
    },
    /// The readiness wait failed with a non-interrupt error.
    #[error("readiness wait failed: {source}")]
    Wait {
        /// Underlying wait error.
        #[from]
        source: WaitError,
    },
}

/// Work selected for dispatch in one iteration, captured before anything
/// runs so registry mutations from inside callbacks only affect the next
/// iteration.
enum Dispatch {
    Control,
    Callback(WatchCallback),
}

/// One embedding module's server: registry, control channel, and loop.
pub struct Server<M: ServiceModule> {
    config: Config,
    module: M,
    registry: ReadinessRegistry,
    shutdown: ShutdownFlag,
    wait: Box<dyn WaitStrategy>,
    factory: Box<dyn SessionFactory>,
    session: Option<Box<dyn ControlSession>>,
}

impl<M: ServiceModule> Server<M> {
    /// Creates a server with the production collaborators: `poll(2)` waits
    /// and socket control-channel sessions.
    pub fn new(config: Config, module: M) -> Self {
        Self {
            config,
            module,
            registry: ReadinessRegistry::new(),
            shutdown: ShutdownFlag::new(),
            wait: Box::new(PollWait::new()),
            factory: Box::new(SocketSessionFactory::new()),
            session: None,
        }
    }

    /// Replaces the readiness-wait strategy; tests inject scripted waits.
    #[must_use]
    pub fn with_wait_strategy(mut self, wait: impl WaitStrategy + 'static) -> Self {
        self.wait = Box::new(wait);
        self
    }

    /// Replaces the session factory; tests inject recording sessions.
    #[must_use]
    pub fn with_session_factory(mut self, factory: impl SessionFactory + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    /// Handle to the readiness registry; clones share the same bookkeeping,
    /// so callbacks can capture one and adjust registrations mid-iteration.
    #[must_use]
    pub fn registry(&self) -> ReadinessRegistry {
        self.registry.clone()
    }

    /// Handle to the shutdown flag.
    #[must_use]
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Requests cooperative shutdown; idempotent.
    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    /// The embedded module.
    #[must_use]
    pub fn module(&self) -> &M {
        &self.module
    }

    /// Mutable access to the embedded module.
    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    /// Registers callbacks for any subset of `fd`'s readiness conditions.
    /// See [`ReadinessRegistry::watch_fileno`].
    pub fn watch_fileno(
        &self,
        fd: RawFd,
        read: Option<WatchCallback>,
        write: Option<WatchCallback>,
        error: Option<WatchCallback>,
    ) {
        self.registry.watch_fileno(fd, read, write, error);
    }

    /// Clears the selected callback slots of `fd`.
    /// See [`ReadinessRegistry::unwatch_fileno`].
    pub fn unwatch_fileno(
        &self,
        fd: RawFd,
        read: bool,
        write: bool,
        error: bool,
    ) -> Result<(), UnregisteredWatchError> {
        self.registry.unwatch_fileno(fd, read, write, error)
    }

    /// Runs the module to completion and returns its exit status: 0 for any
    /// clean termination (shutdown command or signal included), 1 for any
    /// failure during setup or the loop. Errors never escape this boundary.
    pub fn run(&mut self, module_name: &str) -> i32 {
        info!(target: SERVER_TARGET, module = module_name, "starting server");
        match self.run_guarded(module_name) {
            Ok(()) => {
                info!(target: SERVER_TARGET, module = module_name, "server stopped");
                0
            }
            Err(failure) => {
                error!(
                    target: SERVER_TARGET,
                    module = module_name,
                    error = %failure,
                    "server run failed"
                );
                1
            }
        }
    }

    fn run_guarded(&mut self, module_name: &str) -> Result<(), ServerError> {
        self.install_signal_handlers()?;
        self.open_session(module_name)?;
        self.module.setup()?;
        self.run_internal()?;
        // The teardown hook and session disposal run only on the clean path;
        // when an error unwinds past the loop the infrastructure detects the
        // dropped connection on its own.
        self.module.teardown()?;
        self.dispose_session();
        Ok(())
    }

    fn install_signal_handlers(&self) -> Result<(), ServerError> {
        for signal in [SIGTERM, SIGINT] {
            signal_hook::flag::register(signal, self.shutdown.shared())
                .map_err(|source| ServerError::Signal { source })?;
        }
        debug!(target: SERVER_TARGET, "termination signal handlers installed");
        Ok(())
    }

    pub(crate) fn open_session(&mut self, module_name: &str) -> Result<(), ServerError> {
        let spec = SessionSpec {
            module_name: module_name.to_string(),
            spec_path: self.config.spec_path(module_name),
            endpoint: self.config.control_endpoint().clone(),
        };
        debug!(
            target: SERVER_TARGET,
            module = module_name,
            endpoint = %spec.endpoint,
            "opening control channel session"
        );
        self.session = Some(self.factory.open(&spec)?);
        Ok(())
    }

    /// The reactor loop. Iterates until the shutdown flag is observed; a
    /// non-interrupt wait failure propagates unchanged, leaving the session
    /// un-disposed.
    pub(crate) fn run_internal(&mut self) -> Result<(), ServerError> {
        while !self.shutdown.is_set() {
            let mut sets = self.registry.wait_sets();
            let control_fd = self.session.as_ref().map(|session| session.fd());
            if let Some(fd) = control_fd
                && let Err(position) = sets.reads.binary_search(&fd)
            {
                sets.reads.insert(position, fd);
            }

            let ready = match self.wait.wait(&sets) {
                Ok(ready) => ready,
                // The interrupted condition counts as "nothing ready"; the
                // next iteration re-checks the shutdown flag first, which is
                // how a termination signal mid-wait stops the loop.
                Err(WaitError::Interrupted) => continue,
                Err(failure) => return Err(failure.into()),
            };
            self.dispatch_ready(control_fd, &ready)?;
        }
        debug!(target: SERVER_TARGET, "reactor loop stopped");
        Ok(())
    }

    /// Dispatches one iteration's readiness results.
    ///
    /// The callbacks to fire are captured before any of them runs, so an
    /// unwatch performed inside a firing callback never cancels work already
    /// selected for this iteration. A descriptor reported ready in more than
    /// one set dispatches in a fixed order: readable, then writable, then
    /// errorable. The control descriptor only ever routes to the session's
    /// command check.
    fn dispatch_ready(
        &mut self,
        control_fd: Option<RawFd>,
        ready: &ReadySets,
    ) -> Result<(), ServerError> {
        let phases = [
            (&ready.reads, ReadinessKind::Readable),
            (&ready.writes, ReadinessKind::Writable),
            (&ready.errors, ReadinessKind::Errorable),
        ];

        let mut due = Vec::new();
        for (descriptors, kind) in phases {
            for &fd in descriptors.iter() {
                if Some(fd) == control_fd {
                    if kind == ReadinessKind::Readable {
                        due.push(Dispatch::Control);
                    }
                    continue;
                }
                if let Some(callback) = self.registry.callback_for(fd, kind) {
                    due.push(Dispatch::Callback(callback));
                }
            }
        }

        for item in due {
            match item {
                Dispatch::Control => self.check_control_channel()?,
                Dispatch::Callback(callback) => (&mut *callback.borrow_mut())(),
            }
        }
        Ok(())
    }

    fn check_control_channel(&mut self) -> Result<(), ServerError> {
        let Self {
            session,
            shutdown,
            module,
            ..
        } = self;
        let Some(session) = session.as_mut() else {
            return Ok(());
        };
        let mut sink = ModuleDispatcher::new(shutdown, module);
        session.check_command(true, &mut sink)?;
        Ok(())
    }

    fn dispose_session(&mut self) {
        if let Some(mut session) = self.session.take()
            && let Err(failure) = session.stop()
        {
            warn!(
                target: SERVER_TARGET,
                error = %failure,
                "control channel stop failed"
            );
        }
    }
}
