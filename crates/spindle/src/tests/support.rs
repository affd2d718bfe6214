//! Recording collaborators for the server behavioural suite.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::rc::Rc;

use serde_json::Value;

use camino::Utf8PathBuf;
use spindle_config::Config;

use crate::answer::Answer;
use crate::dispatch::CommandSink;
use crate::module::{ModuleError, ServiceModule};
use crate::server::Server;
use crate::session::{ControlSession, SessionError, SessionFactory, SessionSpec};
use crate::shutdown::ShutdownFlag;
use crate::wait::{ReadySets, WaitError, WaitSets, WaitStrategy};

/// Descriptor the recording session pretends to own.
pub(crate) const CONTROL_FD: RawFd = 99;

/// Spec directory used by harness configurations.
pub(crate) const SPEC_DIR: &str = "/usr/share/spindle/specs";

/// One scripted response of the fake wait strategy.
pub(crate) enum WaitStep {
    /// Return these ready sets; optionally request shutdown first, the way
    /// a command or callback would during the iteration.
    Ready {
        ready: ReadySets,
        trigger_shutdown: bool,
    },
    /// Fail with the interrupted condition.
    Interrupted,
    /// Fail with a non-interrupt error.
    Fail,
}

impl WaitStep {
    pub(crate) fn empty_then_shutdown() -> Self {
        Self::Ready {
            ready: ReadySets::default(),
            trigger_shutdown: true,
        }
    }

    pub(crate) fn ready(ready: ReadySets) -> Self {
        Self::Ready {
            ready,
            trigger_shutdown: false,
        }
    }

    pub(crate) fn ready_then_shutdown(ready: ReadySets) -> Self {
        Self::Ready {
            ready,
            trigger_shutdown: true,
        }
    }
}

/// Wait strategy that replays a script and records every request.
pub(crate) struct ScriptedWait {
    steps: VecDeque<WaitStep>,
    requests: Rc<RefCell<Vec<WaitSets>>>,
    shutdown: ShutdownFlag,
}

impl ScriptedWait {
    pub(crate) fn new(
        steps: Vec<WaitStep>,
        requests: Rc<RefCell<Vec<WaitSets>>>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            steps: steps.into(),
            requests,
            shutdown,
        }
    }
}

impl WaitStrategy for ScriptedWait {
    fn wait(&mut self, sets: &WaitSets) -> Result<ReadySets, WaitError> {
        self.requests.borrow_mut().push(sets.clone());
        match self.steps.pop_front().expect("wait script exhausted") {
            WaitStep::Ready {
                ready,
                trigger_shutdown,
            } => {
                if trigger_shutdown {
                    self.shutdown.trigger();
                }
                Ok(ready)
            }
            WaitStep::Interrupted => Err(WaitError::Interrupted),
            WaitStep::Fail => Err(WaitError::Os {
                source: std::io::Error::from_raw_os_error(nix::errno::Errno::EBADF as i32),
            }),
        }
    }
}

/// Frames the recording session delivers into the sink, one per check.
pub(crate) enum ScriptedFrame {
    Command {
        command: String,
        args: Option<Value>,
    },
    Config(Value),
}

impl ScriptedFrame {
    pub(crate) fn command(command: &str, args: Option<Value>) -> Self {
        Self::Command {
            command: command.to_string(),
            args,
        }
    }
}

/// Shared observations of the recording session.
#[derive(Default)]
pub(crate) struct SessionState {
    /// Nonblock argument of every `check_command` call.
    pub(crate) check_calls: Vec<bool>,
    /// Number of `stop` calls.
    pub(crate) stop_calls: usize,
    /// Answers produced for dispatched frames.
    pub(crate) answers: Vec<Answer>,
}

struct RecordingSession {
    frames: VecDeque<ScriptedFrame>,
    state: Rc<RefCell<SessionState>>,
}

impl ControlSession for RecordingSession {
    fn fd(&self) -> RawFd {
        CONTROL_FD
    }

    fn check_command(
        &mut self,
        nonblock: bool,
        sink: &mut dyn CommandSink,
    ) -> Result<(), SessionError> {
        self.state.borrow_mut().check_calls.push(nonblock);
        if let Some(frame) = self.frames.pop_front() {
            let answer = match frame {
                ScriptedFrame::Command { command, args } => sink.command(&command, args),
                ScriptedFrame::Config(config) => sink.config_update(config),
            };
            self.state.borrow_mut().answers.push(answer);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        self.state.borrow_mut().stop_calls += 1;
        Ok(())
    }
}

/// Factory handing out one recording session and remembering the spec it was
/// opened with.
pub(crate) struct RecordingFactory {
    frames: RefCell<VecDeque<ScriptedFrame>>,
    specs: Rc<RefCell<Vec<SessionSpec>>>,
    state: Rc<RefCell<SessionState>>,
}

impl RecordingFactory {
    pub(crate) fn new(
        frames: Vec<ScriptedFrame>,
        specs: Rc<RefCell<Vec<SessionSpec>>>,
        state: Rc<RefCell<SessionState>>,
    ) -> Self {
        Self {
            frames: RefCell::new(frames.into()),
            specs,
            state,
        }
    }
}

impl SessionFactory for RecordingFactory {
    fn open(&self, spec: &SessionSpec) -> Result<Box<dyn ControlSession>, SessionError> {
        self.specs.borrow_mut().push(spec.clone());
        Ok(Box::new(RecordingSession {
            frames: std::mem::take(&mut *self.frames.borrow_mut()),
            state: Rc::clone(&self.state),
        }))
    }
}

/// Factory whose sessions never open.
pub(crate) struct FailingFactory;

impl SessionFactory for FailingFactory {
    fn open(&self, _spec: &SessionSpec) -> Result<Box<dyn ControlSession>, SessionError> {
        Err(SessionError::Closed)
    }
}

/// Module recording every hook invocation.
#[derive(Default)]
pub(crate) struct RecordingModule {
    pub(crate) setup_calls: usize,
    pub(crate) teardown_calls: usize,
    pub(crate) commands: Vec<(String, Option<Value>)>,
    pub(crate) configs: Vec<Value>,
    pub(crate) command_answer: Option<Answer>,
    pub(crate) setup_failure: Option<ModuleError>,
}

impl ServiceModule for RecordingModule {
    fn config_update(&mut self, config: Value) {
        self.configs.push(config);
    }

    fn setup(&mut self) -> Result<(), ModuleError> {
        self.setup_calls += 1;
        match self.setup_failure.take() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn teardown(&mut self) -> Result<(), ModuleError> {
        self.teardown_calls += 1;
        Ok(())
    }

    fn handle_command(&mut self, command: &str, args: Option<&Value>) -> Option<Answer> {
        self.commands.push((command.to_string(), args.cloned()));
        self.command_answer.clone()
    }
}

/// Fully wired test server plus handles to every recording collaborator.
pub(crate) struct Harness {
    pub(crate) server: Server<RecordingModule>,
    pub(crate) requests: Rc<RefCell<Vec<WaitSets>>>,
    pub(crate) specs: Rc<RefCell<Vec<SessionSpec>>>,
    pub(crate) session: Rc<RefCell<SessionState>>,
}

impl Harness {
    pub(crate) fn new(steps: Vec<WaitStep>, frames: Vec<ScriptedFrame>) -> Self {
        Self::with_module(steps, frames, RecordingModule::default())
    }

    pub(crate) fn with_module(
        steps: Vec<WaitStep>,
        frames: Vec<ScriptedFrame>,
        module: RecordingModule,
    ) -> Self {
        let requests = Rc::new(RefCell::new(Vec::new()));
        let specs = Rc::new(RefCell::new(Vec::new()));
        let session = Rc::new(RefCell::new(SessionState::default()));

        let config = Config {
            spec_dir: Utf8PathBuf::from(SPEC_DIR),
            ..Config::default()
        };
        let server = Server::new(config, module);
        let wait = ScriptedWait::new(steps, Rc::clone(&requests), server.shutdown_flag());
        let factory =
            RecordingFactory::new(frames, Rc::clone(&specs), Rc::clone(&session));
        let server = server.with_wait_strategy(wait).with_session_factory(factory);

        Self {
            server,
            requests,
            specs,
            session,
        }
    }
}
