use std::fmt;
use std::time::Duration;

use promptdeck_core::error::CoreError;
use promptdeck_core::types::JobId;

/// Where in a generation call an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Building the job payload, before anything reaches the backend.
    Prepare,
    /// Opening the event subscription or queueing the job.
    Submit,
    /// Waiting for the completion signal.
    Await,
    /// Reading the history record or downloading artifacts.
    Fetch,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Submit => "submit",
            Stage::Await => "await",
            Stage::Fetch => "fetch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which fetch failed after completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    History,
    Artifact,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStage::History => f.write_str("history"),
            FetchStage::Artifact => f.write_str("artifact"),
        }
    }
}

/// Failure of a single generation call.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Template or parameter problem. Nothing was sent to the backend.
    #[error("Invalid job configuration: {0}")]
    Configuration(#[from] CoreError),

    /// The subscription could not be opened or the backend refused the job.
    #[error("Job submission failed: {message}")]
    Submission { message: String },

    /// The event stream closed or broke before the completion signal.
    #[error("Event stream interrupted while waiting for job {job_id}: {reason}")]
    StreamInterrupted { job_id: JobId, reason: String },

    /// The caller's deadline elapsed. `job_id` is `None` if the deadline
    /// hit before the backend acknowledged the submission.
    #[error("Generation timed out after {after:?}")]
    Timeout {
        job_id: Option<JobId>,
        after: Duration,
    },

    /// History or artifact retrieval failed; no partial result is kept.
    #[error("Failed to fetch {stage} for job {job_id}: {message}")]
    ArtifactFetch {
        job_id: JobId,
        stage: FetchStage,
        message: String,
    },

    /// The caller cancelled the call.
    #[error("Generation cancelled")]
    Cancelled { job_id: Option<JobId> },

    /// The backend reported that a node failed while executing the job.
    #[error("Job {job_id} failed on node {}: {message}", node.as_deref().unwrap_or("<unknown>"))]
    ExecutionFailed {
        job_id: JobId,
        node: Option<String>,
        message: String,
    },
}

impl OrchestrationError {
    pub fn stage(&self) -> Stage {
        match self {
            OrchestrationError::Configuration(_) => Stage::Prepare,
            OrchestrationError::Submission { .. } => Stage::Submit,
            OrchestrationError::StreamInterrupted { .. }
            | OrchestrationError::ExecutionFailed { .. } => Stage::Await,
            OrchestrationError::Timeout { job_id, .. }
            | OrchestrationError::Cancelled { job_id } => {
                if job_id.is_some() {
                    Stage::Await
                } else {
                    Stage::Submit
                }
            }
            OrchestrationError::ArtifactFetch { .. } => Stage::Fetch,
        }
    }

    /// The backend job id, when the error happened after submission.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            OrchestrationError::Configuration(_) | OrchestrationError::Submission { .. } => None,
            OrchestrationError::StreamInterrupted { job_id, .. }
            | OrchestrationError::ArtifactFetch { job_id, .. }
            | OrchestrationError::ExecutionFailed { job_id, .. } => Some(job_id),
            OrchestrationError::Timeout { job_id, .. }
            | OrchestrationError::Cancelled { job_id } => job_id.as_ref(),
        }
    }
}
