//! Socket-backed control-channel session.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use tracing::debug;

use spindle_config::SocketEndpoint;

use crate::dispatch::CommandSink;

use super::wire::{self, InboundFrame, OutboundFrame};
use super::{ControlSession, SESSION_TARGET, SessionError, SessionFactory, SessionSpec};

/// Upper bound on one buffered control frame.
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Stream transports a session can connect over.
enum ControlStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl ControlStream {
    fn connect(endpoint: &SocketEndpoint) -> io::Result<Self> {
        match endpoint {
            SocketEndpoint::Unix { path } => {
                UnixStream::connect(path.as_std_path()).map(Self::Unix)
            }
            SocketEndpoint::Tcp { host, port } => {
                TcpStream::connect((host.as_str(), *port)).map(Self::Tcp)
            }
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_nonblocking(nonblocking),
            Self::Unix(stream) => stream.set_nonblocking(nonblocking),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }
}

impl Read for ControlStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ControlStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            Self::Unix(stream) => stream.flush(),
        }
    }
}

impl AsRawFd for ControlStream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(stream) => stream.as_raw_fd(),
            Self::Unix(stream) => stream.as_raw_fd(),
        }
    }
}

/// Control-channel session over a unix or tcp stream with JSONL frames.
pub struct SocketSession {
    stream: ControlStream,
    fd: RawFd,
    pending: Vec<u8>,
}

impl SocketSession {
    /// Connects to the broker and performs the registration handshake.
    pub fn open(spec: &SessionSpec) -> Result<Self, SessionError> {
        let stream =
            ControlStream::connect(&spec.endpoint).map_err(|source| SessionError::Connect {
                endpoint: spec.endpoint.to_string(),
                source,
            })?;
        let fd = stream.as_raw_fd();
        let mut session = Self {
            stream,
            fd,
            pending: Vec::new(),
        };
        session.send_frame(&OutboundFrame::Register {
            module: spec.module_name.clone(),
            spec_path: spec.spec_path.to_string(),
        })?;
        debug!(
            target: SESSION_TARGET,
            module = %spec.module_name,
            endpoint = %spec.endpoint,
            "control channel session registered"
        );
        Ok(session)
    }

    fn send_frame(&mut self, frame: &OutboundFrame) -> Result<(), SessionError> {
        let line = wire::encode(frame)?;
        self.stream.write_all(&line)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Pops one complete line off the pending buffer, if present.
    fn take_buffered_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.pending.iter().position(|b| *b == b'\n')?;
        let rest = self.pending.split_off(newline + 1);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// Reads until one complete line is buffered. In non-blocking mode an
    /// incomplete line stays buffered for the next call and `None` is
    /// returned.
    fn read_line(&mut self, nonblock: bool) -> Result<Option<Vec<u8>>, SessionError> {
        if let Some(line) = self.take_buffered_line() {
            return Ok(Some(line));
        }
        if !nonblock {
            return self.fill_until_line();
        }
        self.stream.set_nonblocking(true)?;
        let outcome = self.fill_until_line();
        let restored = self.stream.set_nonblocking(false);
        let line = outcome?;
        restored?;
        Ok(line)
    }

    fn fill_until_line(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        let mut chunk = [0_u8; 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(SessionError::Closed),
                Ok(read) => {
                    self.pending.extend_from_slice(&chunk[..read]);
                    if self.pending.len() > MAX_FRAME_BYTES {
                        return Err(SessionError::FrameTooLarge {
                            size: self.pending.len(),
                            max: MAX_FRAME_BYTES,
                        });
                    }
                    if let Some(line) = self.take_buffered_line() {
                        return Ok(Some(line));
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            }
        }
    }
}

impl ControlSession for SocketSession {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn check_command(
        &mut self,
        nonblock: bool,
        sink: &mut dyn CommandSink,
    ) -> Result<(), SessionError> {
        let Some(line) = self.read_line(nonblock)? else {
            return Ok(());
        };
        match InboundFrame::parse(&line)? {
            InboundFrame::ConfigUpdate { config } => {
                debug!(target: SESSION_TARGET, "configuration update received");
                let answer = sink.config_update(config);
                self.send_frame(&OutboundFrame::Answer { answer })
            }
            InboundFrame::Command { command, args } => {
                debug!(target: SESSION_TARGET, command = %command, "command received");
                let answer = sink.command(&command, args);
                self.send_frame(&OutboundFrame::Answer { answer })
            }
        }
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        self.send_frame(&OutboundFrame::Bye)?;
        self.stream.shutdown()?;
        Ok(())
    }
}

/// Factory for [`SocketSession`]; the production default.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketSessionFactory;

impl SocketSessionFactory {
    /// Creates the default factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SessionFactory for SocketSessionFactory {
    fn open(&self, spec: &SessionSpec) -> Result<Box<dyn ControlSession>, SessionError> {
        Ok(Box::new(SocketSession::open(spec)?))
    }
}
