//! The transport seam the orchestrator is written against.
//!
//! [`Transport`] bundles the duplex event channel and the unary calls
//! a job needs. [`ComfyUITransport`] is the production implementation
//! over [`ComfyUIApi`] and [`SessionHub`]; tests substitute their own.

use async_trait::async_trait;
use promptdeck_core::artifact::{Artifact, ArtifactRef};
use promptdeck_core::config::BackendConfig;
use promptdeck_core::template::JobTemplate;
use promptdeck_core::types::JobId;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::events::JobEvent;
use crate::history::JobHistory;
use crate::session::SessionHub;

/// A fully parameterized job ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub template: JobTemplate,
    /// Routes the job's events to sockets opened with the same id.
    pub client_session_id: String,
}

/// Errors surfaced by any [`Transport`] operation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error(transparent)]
    Channel(#[from] ComfyUIClientError),
}

impl TransportError {
    /// Whether the backend reported that it has no record of the job.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::Api(ComfyUIApiError::NotFound(_)))
    }
}

/// A scoped subscription to backend-pushed job events.
#[async_trait]
pub trait EventChannel: Send {
    /// Wait for the next event. `Ok(None)` means the stream has ended.
    async fn next_event(&mut self) -> Result<Option<JobEvent>, TransportError>;

    /// Release the subscription. Calling it more than once is harmless.
    async fn close(&mut self);
}

/// Everything the orchestrator needs from the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open an event subscription scoped to `session_id`. The
    /// subscription is live once this returns.
    async fn subscribe(&self, session_id: &str) -> Result<Box<dyn EventChannel>, TransportError>;

    /// Queue a job and return the backend's id for it.
    async fn submit(&self, request: &JobRequest) -> Result<JobId, TransportError>;

    /// Fetch the artifact listing of a finished job.
    async fn history(&self, job_id: &JobId) -> Result<JobHistory, TransportError>;

    /// Download one artifact.
    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Artifact, TransportError>;
}

/// [`Transport`] backed by a real ComfyUI server.
pub struct ComfyUITransport {
    api: ComfyUIApi,
    hub: SessionHub,
}

impl ComfyUITransport {
    pub fn new(api: ComfyUIApi, client: ComfyUIClient) -> Self {
        Self {
            api,
            hub: SessionHub::new(client),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(
            ComfyUIApi::new(config.api_url()),
            ComfyUIClient::new(config.ws_url()),
        )
    }

    pub fn hub(&self) -> &SessionHub {
        &self.hub
    }

    /// Close all event sockets.
    pub async fn shutdown(&self) {
        self.hub.shutdown().await;
    }
}

#[async_trait]
impl Transport for ComfyUITransport {
    async fn subscribe(&self, session_id: &str) -> Result<Box<dyn EventChannel>, TransportError> {
        let subscription = self.hub.subscribe(session_id).await?;
        Ok(Box::new(subscription))
    }

    async fn submit(&self, request: &JobRequest) -> Result<JobId, TransportError> {
        let response = self
            .api
            .submit_workflow(request.template.as_map(), &request.client_session_id)
            .await?;

        tracing::info!(
            job_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow submitted to ComfyUI",
        );

        Ok(JobId::from(response.prompt_id))
    }

    async fn history(&self, job_id: &JobId) -> Result<JobHistory, TransportError> {
        Ok(self.api.get_history(job_id).await?)
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Artifact, TransportError> {
        Ok(self.api.view(artifact).await?)
    }
}
