//! Completion detection for one submitted job.
//!
//! [`CompletionTracker`] consumes the events of a shared stream and
//! decides, for a single job id, whether to keep waiting. Events tagged
//! with any other job id are ignored. Untagged progress (older servers)
//! belongs to whichever job last started a node on the stream, so it is
//! attributed to the tracked job only while that job is the one running.

use promptdeck_comfyui::events::JobEvent;
use promptdeck_core::types::JobId;

use crate::progress::ProgressUpdate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionState {
    AwaitingCompletion,
    Completed,
    Failed {
        node: Option<String>,
        message: String,
    },
}

/// What the wait loop should do after one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Not about this job, or the tracker already finished.
    Ignored,
    Progress(ProgressUpdate),
    NodeStarted(String),
    Completed,
    Failed {
        node: Option<String>,
        message: String,
    },
}

/// Completion state machine for one job on a shared event stream.
///
/// Starts in [`CompletionState::AwaitingCompletion`] and moves once to
/// `Completed` (an `executing` event with no node for this job) or
/// `Failed` (an execution error for this job). Every event after that is
/// [`Transition::Ignored`].
#[derive(Debug)]
pub struct CompletionTracker {
    job_id: JobId,
    state: CompletionState,
    /// Whether the most recent node start on the stream was this job's.
    running: bool,
}

impl CompletionTracker {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: CompletionState::AwaitingCompletion,
            running: false,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn state(&self) -> &CompletionState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state != CompletionState::AwaitingCompletion
    }

    /// Advance on one event and report what it means for this job.
    pub fn on_event(&mut self, event: &JobEvent) -> Transition {
        if self.is_finished() {
            return Transition::Ignored;
        }

        match event {
            JobEvent::Progress {
                node,
                job_id,
                value,
                max,
            } => {
                let ours = match job_id {
                    Some(id) => *id == self.job_id,
                    None => self.running,
                };
                if !ours {
                    return Transition::Ignored;
                }
                Transition::Progress(ProgressUpdate {
                    job_id: self.job_id.clone(),
                    node: node.clone(),
                    value: *value,
                    max: *max,
                })
            }
            JobEvent::Executing { node, job_id } if *job_id != self.job_id => {
                if node.is_some() {
                    self.running = false;
                }
                Transition::Ignored
            }
            JobEvent::Executing { node, .. } => match node {
                Some(node) => {
                    self.running = true;
                    Transition::NodeStarted(node.clone())
                }
                None => {
                    self.state = CompletionState::Completed;
                    Transition::Completed
                }
            },
            JobEvent::ExecutionFailed {
                job_id,
                node,
                message,
            } if *job_id == self.job_id => {
                self.state = CompletionState::Failed {
                    node: node.clone(),
                    message: message.clone(),
                };
                Transition::Failed {
                    node: node.clone(),
                    message: message.clone(),
                }
            }
            _ => Transition::Ignored,
        }
    }
}
