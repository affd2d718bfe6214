//! JSONL frame types for the control channel.
//!
//! One frame per line. Inbound frames carry configuration updates and
//! commands from the infrastructure; outbound frames carry the registration
//! handshake, answers, and the parting bye.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::answer::Answer;

use super::SessionError;

/// Frames sent by the managing infrastructure.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum InboundFrame {
    /// New configuration for the module. Acknowledged with a success answer.
    ConfigUpdate {
        config: Value,
    },
    /// Out-of-band command addressed to the module.
    Command {
        command: String,
        #[serde(default)]
        args: Option<Value>,
    },
}

/// Frames sent by the module.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum OutboundFrame {
    /// Handshake naming the module and its specification file.
    Register { module: String, spec_path: String },
    /// Answer to the most recent inbound frame.
    Answer {
        #[serde(flatten)]
        answer: Answer,
    },
    /// Graceful goodbye before the session closes.
    Bye,
}

impl InboundFrame {
    /// Parses one JSONL line into a frame. Trailing whitespace (including
    /// the newline delimiter) is trimmed before parsing.
    pub(crate) fn parse(line: &[u8]) -> Result<Self, SessionError> {
        let trimmed = trim_trailing_whitespace(line);
        if trimmed.is_empty() {
            return Err(SessionError::malformed("empty control frame"));
        }
        serde_json::from_slice(trimmed).map_err(SessionError::from_json_error)
    }
}

/// Serialises a frame into a newline-terminated JSONL line.
pub(crate) fn encode(frame: &OutboundFrame) -> Result<Vec<u8>, SessionError> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    Ok(line)
}

/// Trims trailing ASCII whitespace from a byte slice.
fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|pos| pos + 1)
        .unwrap_or(0);
    &bytes[..end]
}
