//! Command answers exchanged over the control channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of handling one control-channel command.
///
/// Status 0 denotes success; any non-zero status denotes failure with a
/// payload describing the error. Serialised as part of an answer frame.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Answer {
    status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl Answer {
    /// Success with no payload.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status: 0,
            payload: None,
        }
    }

    /// Success carrying a payload.
    #[must_use]
    pub fn success_with(payload: impl Into<Value>) -> Self {
        Self {
            status: 0,
            payload: Some(payload.into()),
        }
    }

    /// Failure with a non-zero status and a payload describing the error.
    #[must_use]
    pub fn failure(status: i32, payload: impl Into<Value>) -> Self {
        Self {
            status,
            payload: Some(payload.into()),
        }
    }

    /// Status code; 0 is success.
    #[must_use]
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Answer payload, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Whether the answer reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}
