//! Control-channel sessions.
//!
//! A session is the module's persistent connection to its managing
//! infrastructure. The reactor only depends on the [`ControlSession`] trait:
//! a stable descriptor to watch, a non-blocking check that drains and
//! dispatches at most one pending frame, and a best-effort stop. The bundled
//! [`SocketSession`] implements the trait over a unix or tcp stream with
//! JSONL frames.

mod socket;
mod wire;

use std::io;
use std::os::fd::RawFd;

use camino::Utf8PathBuf;
use thiserror::Error;

use spindle_config::SocketEndpoint;

use crate::dispatch::CommandSink;

pub use socket::{SocketSession, SocketSessionFactory};

pub(crate) const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Identity a session is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    /// Name of the embedding module.
    pub module_name: String,
    /// Path of the module's specification file, forwarded to the
    /// infrastructure during the handshake. The session does not parse it.
    pub spec_path: Utf8PathBuf,
    /// Endpoint of the control-channel broker.
    pub endpoint: SocketEndpoint,
}

/// One run's control-channel connection.
pub trait ControlSession {
    /// Stable readable descriptor for the lifetime of the run.
    fn fd(&self) -> RawFd;

    /// Checks for one pending frame and dispatches it into `sink`. With
    /// `nonblock` set, returns immediately when no complete frame is
    /// available.
    fn check_command(
        &mut self,
        nonblock: bool,
        sink: &mut dyn CommandSink,
    ) -> Result<(), SessionError>;

    /// Releases the session, best effort.
    fn stop(&mut self) -> Result<(), SessionError>;
}

/// Opens control-channel sessions; injectable so tests can substitute
/// recording sessions for the socket implementation.
pub trait SessionFactory {
    /// Opens a session for the given identity.
    fn open(&self, spec: &SessionSpec) -> Result<Box<dyn ControlSession>, SessionError>;
}

/// Failures surfaced by control-channel sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connecting to the broker failed.
    #[error("failed to connect control channel at {endpoint}: {source}")]
    Connect {
        /// Endpoint the connection targeted.
        endpoint: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The broker closed the connection.
    #[error("control channel closed by peer")]
    Closed,
    /// An inbound frame could not be parsed.
    #[error("malformed control frame: {message}")]
    MalformedFrame {
        /// What was wrong with the frame.
        message: String,
        /// Underlying parse error, when one exists.
        #[source]
        source: Option<serde_json::Error>,
    },
    /// An inbound frame exceeded the size bound.
    #[error("control frame too large: {size} bytes exceeds {max} byte limit")]
    FrameTooLarge {
        /// Bytes buffered so far.
        size: usize,
        /// Permitted maximum.
        max: usize,
    },
    /// An outbound frame could not be serialised.
    #[error("failed to serialise control frame: {source}")]
    Serialise {
        /// Underlying serialisation error.
        #[from]
        source: serde_json::Error,
    },
    /// Any other IO failure on the channel.
    #[error("control channel IO error: {source}")]
    Io {
        /// Underlying IO error.
        #[from]
        source: io::Error,
    },
}

impl SessionError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn from_json_error(source: serde_json::Error) -> Self {
        Self::MalformedFrame {
            message: source.to_string(),
            source: Some(source),
        }
    }
}
