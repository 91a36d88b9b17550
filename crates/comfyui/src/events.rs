//! Job-status events decoded from the ComfyUI event stream.
//!
//! [`JobEvent`] is the narrow view of the stream the orchestrator acts
//! on. Everything else the server pushes (queue status, cache hits,
//! per-node outputs, preview images, custom node chatter) collapses
//! into [`JobEvent::Other`].

use promptdeck_core::types::JobId;
use tokio_tungstenite::tungstenite::Message;

use crate::messages::{parse_message, ServerMessage};

/// An event relevant to job tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// Step-level progress inside a node. `job_id` is absent on older servers.
    Progress {
        node: Option<String>,
        job_id: Option<JobId>,
        value: u32,
        max: u32,
    },

    /// A node started executing; `node == None` marks the job as finished.
    Executing {
        node: Option<String>,
        job_id: JobId,
    },

    /// The backend reported a node failure for a job.
    ExecutionFailed {
        job_id: JobId,
        node: Option<String>,
        message: String,
    },

    /// Binary, unparseable, or otherwise uninteresting frames.
    Other,
}

impl JobEvent {
    /// The completion signal: `Executing` with no node for `job_id`.
    pub fn is_completion_of(&self, job_id: &JobId) -> bool {
        matches!(self, JobEvent::Executing { node: None, job_id: id } if id == job_id)
    }

    /// The job this event is tagged with, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            JobEvent::Progress { job_id, .. } => job_id.as_ref(),
            JobEvent::Executing { job_id, .. } | JobEvent::ExecutionFailed { job_id, .. } => {
                Some(job_id)
            }
            JobEvent::Other => None,
        }
    }
}

impl From<ServerMessage> for JobEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Progress(data) => JobEvent::Progress {
                node: data.node,
                job_id: data.prompt_id.map(JobId::from),
                value: data.value,
                max: data.max,
            },
            ServerMessage::Executing(data) => JobEvent::Executing {
                node: data.node,
                job_id: JobId::from(data.prompt_id),
            },
            ServerMessage::ExecutionError(data) => JobEvent::ExecutionFailed {
                message: data.summary(),
                job_id: JobId::from(data.prompt_id),
                node: data.node_id,
            },
            ServerMessage::Untracked { .. } => JobEvent::Other,
        }
    }
}

/// Decode one text frame. Unknown kinds and malformed JSON become
/// [`JobEvent::Other`].
pub fn decode_text(text: &str) -> JobEvent {
    match parse_message(text) {
        Ok(msg) => JobEvent::from(msg),
        Err(e) => {
            tracing::trace!(error = %e, raw_message = %text, "Skipping unrecognised ComfyUI message");
            JobEvent::Other
        }
    }
}

/// Decode one WebSocket frame. Returns `None` for control frames that
/// carry no event at all (ping/pong/close).
pub fn decode_frame(frame: &Message) -> Option<JobEvent> {
    match frame {
        Message::Text(text) => Some(decode_text(text)),
        // ComfyUI sends binary frames for preview images.
        Message::Binary(_) => Some(JobEvent::Other),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}
