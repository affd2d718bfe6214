//! Command dispatch for frames arriving on the control channel.

use serde_json::Value;
use tracing::debug;

use crate::answer::Answer;
use crate::module::ServiceModule;
use crate::shutdown::ShutdownFlag;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// The one command the framework handles itself.
pub const SHUTDOWN_COMMAND: &str = "shutdown";

/// Receives frames drained from a control-channel session.
///
/// The session calls back into this sink for every frame it reads; the
/// returned [`Answer`] is written back to the infrastructure verbatim.
pub trait CommandSink {
    /// Handles a configuration update; the returned answer acknowledges it.
    fn config_update(&mut self, config: Value) -> Answer;

    /// Handles one command with optional arguments.
    fn command(&mut self, command: &str, args: Option<Value>) -> Answer;
}

/// Sink routing frames to the built-in commands and the embedding module.
pub(crate) struct ModuleDispatcher<'a, M: ServiceModule> {
    shutdown: &'a ShutdownFlag,
    module: &'a mut M,
}

impl<'a, M: ServiceModule> ModuleDispatcher<'a, M> {
    pub(crate) fn new(shutdown: &'a ShutdownFlag, module: &'a mut M) -> Self {
        Self { shutdown, module }
    }
}

impl<M: ServiceModule> CommandSink for ModuleDispatcher<'_, M> {
    fn config_update(&mut self, config: Value) -> Answer {
        debug!(target: DISPATCH_TARGET, "applying configuration update");
        self.module.config_update(config);
        Answer::success()
    }

    fn command(&mut self, command: &str, args: Option<Value>) -> Answer {
        if command == SHUTDOWN_COMMAND {
            debug!(target: DISPATCH_TARGET, "shutdown command received");
            self.shutdown.trigger();
            return Answer::success();
        }

        match self.module.handle_command(command, args.as_ref()) {
            Some(answer) => answer,
            None => {
                debug!(target: DISPATCH_TARGET, command, "command has no module handler");
                Answer::failure(1, format!("unknown command: {command}"))
            }
        }
    }
}
