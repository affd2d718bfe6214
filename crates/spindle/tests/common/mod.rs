//! Shared fixtures for the integration suites.

use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use spindle::{CommandSink, ControlSession, SessionError, SessionFactory, SessionSpec};

/// Control session over a socketpair that never carries traffic. Gives the
/// reactor a quiet descriptor to watch so tests can drive the loop with
/// their own descriptors.
pub struct QuietSession {
    stream: UnixStream,
    _peer: UnixStream,
}

impl ControlSession for QuietSession {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn check_command(
        &mut self,
        _nonblock: bool,
        _sink: &mut dyn CommandSink,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Factory producing [`QuietSession`]s.
pub struct QuietSessionFactory;

impl SessionFactory for QuietSessionFactory {
    fn open(&self, _spec: &SessionSpec) -> Result<Box<dyn ControlSession>, SessionError> {
        let (stream, peer) = UnixStream::pair()?;
        Ok(Box::new(QuietSession {
            stream,
            _peer: peer,
        }))
    }
}
