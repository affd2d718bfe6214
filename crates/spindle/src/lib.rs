//! Reactor framework for long-running service modules.
//!
//! Modules of a larger service embed a [`Server`] to multiplex
//! readiness-based I/O across an arbitrary set of file descriptors, keep one
//! persistent control-channel connection for configuration updates and
//! out-of-band commands, and shut down cleanly on signal or on the shutdown
//! command.
//!
//! The core pieces:
//!
//! - [`ReadinessRegistry`] tracks which descriptors are watched for
//!   readability, writability, and error conditions, and which callback
//!   fires for each.
//! - [`WaitStrategy`] is the loop's sole suspension point, defaulting to
//!   [`PollWait`] in production and replaceable for tests.
//! - [`ControlSession`] is the module's connection to its managing
//!   infrastructure; the bundled [`SocketSession`] speaks JSONL frames over
//!   a unix or tcp stream.
//! - [`ServiceModule`] is the capability set a module may implement:
//!   configuration handling, setup/teardown hooks, and a command handler.
//! - [`Server::run`] orchestrates one full run and collapses every failure
//!   to a numeric exit status; no error ever escapes it.
//!
//! The framework is deliberately single-threaded: callbacks run one at a
//! time between waits, so modules without internal concurrency needs get
//! simple ordering and cancellation for free.

mod answer;
mod dispatch;
mod module;
mod registry;
mod server;
pub mod session;
mod shutdown;
pub mod telemetry;
mod wait;

pub use answer::Answer;
pub use dispatch::{CommandSink, SHUTDOWN_COMMAND};
pub use module::{ModuleError, ServiceModule};
pub use registry::{
    ReadinessKind, ReadinessRegistry, UnregisteredWatchError, WatchCallback, watch_callback,
};
pub use server::{Server, ServerError};
pub use session::{
    ControlSession, SessionError, SessionFactory, SessionSpec, SocketSession,
    SocketSessionFactory,
};
pub use shutdown::ShutdownFlag;
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use wait::{PollWait, ReadySets, WaitError, WaitSets, WaitStrategy};

#[cfg(test)]
mod tests;
