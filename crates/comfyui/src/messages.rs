//! Text frames of the ComfyUI event stream.
//!
//! Every text frame is an envelope `{"type": "<kind>", "data": {...}}`.
//! Only the kinds that drive job tracking get a typed payload; every
//! other kind (queue status, cache hits, node outputs, custom node
//! chatter) is kept as [`ServerMessage::Untracked`] with its kind name.

use serde::Deserialize;
use serde_json::Value;

pub const KIND_EXECUTING: &str = "executing";
pub const KIND_PROGRESS: &str = "progress";
pub const KIND_EXECUTION_ERROR: &str = "execution_error";

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// A node of a prompt started; `node == None` ends the prompt.
    Executing(ExecutingData),
    /// Step counter of a long-running node.
    Progress(ProgressData),
    /// A node raised while executing a prompt.
    ExecutionError(ErrorData),
    /// Any other kind, payload dropped.
    Untracked { kind: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: String,
}

/// Older servers omit `node` and `prompt_id`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgressData {
    pub value: u32,
    pub max: u32,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub exception_type: String,
    #[serde(default)]
    pub exception_message: String,
}

impl ErrorData {
    /// `ExceptionType: message`, or whichever half the server sent.
    pub fn summary(&self) -> String {
        match (self.exception_type.is_empty(), self.exception_message.is_empty()) {
            (false, false) => format!("{}: {}", self.exception_type, self.exception_message),
            (false, true) => self.exception_type.clone(),
            (true, false) => self.exception_message.clone(),
            (true, true) => "execution error".to_string(),
        }
    }
}

/// Parse one text frame.
///
/// Fails on malformed JSON, on a missing `type`, or when a tracked kind
/// carries a payload of the wrong shape.
pub fn parse_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    let Envelope { kind, data } = serde_json::from_str(text)?;
    let message = match kind.as_str() {
        KIND_EXECUTING => ServerMessage::Executing(serde_json::from_value(data)?),
        KIND_PROGRESS => ServerMessage::Progress(serde_json::from_value(data)?),
        KIND_EXECUTION_ERROR => ServerMessage::ExecutionError(serde_json::from_value(data)?),
        _ => ServerMessage::Untracked { kind },
    };
    Ok(message)
}
