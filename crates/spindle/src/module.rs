//! Capability surface implemented by embedding modules.

use std::error::Error;

use serde_json::Value;
use thiserror::Error as ThisError;

use crate::answer::Answer;

/// Hooks an embedding module may provide to the server lifecycle.
///
/// Every method has a default implementation, so a module only overrides the
/// capabilities it actually has. The server tolerates the absence of any of
/// them.
pub trait ServiceModule {
    /// Receives configuration pushed over the control channel.
    fn config_update(&mut self, _config: Value) {}

    /// Module-specific setup, run after the control channel session opens
    /// and before the first loop iteration.
    fn setup(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Module-specific teardown, run only when the loop exits cleanly.
    fn teardown(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Handles a module-specific command. Returning `None` means the module
    /// has no handler for `command`; the dispatcher then answers with an
    /// unknown-command failure.
    fn handle_command(&mut self, _command: &str, _args: Option<&Value>) -> Option<Answer> {
        None
    }
}

/// A module with no capabilities at all.
impl ServiceModule for () {}

/// Failures raised by module hooks.
///
/// [`ModuleError::Fatal`] is the sanctioned idiom for a module to request a
/// clean failure exit from the server; the boundary in `Server::run` catches
/// every variant alike and maps it to exit status 1.
#[derive(Debug, ThisError)]
pub enum ModuleError {
    /// The module hit a condition it cannot continue from.
    #[error("fatal server condition: {message}")]
    Fatal {
        /// Description of the fatal condition.
        message: String,
    },
    /// Any other hook failure.
    #[error("{message}")]
    Failed {
        /// Description of the failure.
        message: String,
        /// Underlying cause, when one exists.
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },
}

impl ModuleError {
    /// Creates a fatal condition.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Creates a plain failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a failure wrapping an underlying cause.
    pub fn wrap(message: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
