//! HTTP side of a ComfyUI server: queue a prompt, read its history,
//! download its outputs.

use promptdeck_core::artifact::{Artifact, ArtifactRef};
use promptdeck_core::types::JobId;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::history::JobHistory;

/// HTTP client for one ComfyUI server.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    http: reqwest::Client,
    base: String,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Id the server assigned to the queued prompt.
    pub prompt_id: String,
    /// Queue position at the time of submission.
    #[serde(default)]
    pub number: i32,
}

#[derive(Serialize)]
struct PromptRequest<'a> {
    prompt: &'a Map<String, Value>,
    client_id: &'a str,
}

/// Errors from the REST endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Network, DNS or TLS failure, or an unreadable body.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx answer. `body` is kept verbatim; for `/prompt` it holds the
    /// server's node validation report.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// `/history` answered without a record for the job.
    #[error("No history recorded for job {0}")]
    NotFound(JobId),

    /// A 2xx body that did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ComfyUIApi {
    /// `base` is the server root, e.g. `http://host:8188`.
    pub fn new(base: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base)
    }

    /// Reuse an existing [`reqwest::Client`] and its pool.
    pub fn with_client(http: reqwest::Client, base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { http, base }
    }

    /// Base URL without a trailing slash.
    pub fn api_url(&self) -> &str {
        &self.base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    /// Queue `workflow` under `client_id`. Events for the prompt are then
    /// pushed to the socket opened with the same id.
    pub async fn submit_workflow(
        &self,
        workflow: &Map<String, Value>,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let request = self.http.post(self.endpoint("prompt")).json(&PromptRequest {
            prompt: workflow,
            client_id,
        });
        fetch_json(request).await
    }

    /// History record of one prompt. The server answers `{}` for ids it
    /// does not know, which becomes [`ComfyUIApiError::NotFound`].
    pub async fn get_history(&self, job_id: &JobId) -> Result<JobHistory, ComfyUIApiError> {
        let request = self.http.get(self.endpoint(&format!("history/{job_id}")));
        let body: Value = fetch_json(request).await?;
        JobHistory::from_response(job_id, &body)
    }

    /// Raw bytes of one output file via `GET /view`.
    pub async fn view(&self, artifact: &ArtifactRef) -> Result<Artifact, ComfyUIApiError> {
        let request = self.http.get(self.endpoint("view")).query(&[
            ("filename", &artifact.filename),
            ("subfolder", &artifact.subfolder),
            ("type", &artifact.kind),
        ]);
        let response = send_checked(request).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = response.bytes().await?;

        Ok(Artifact::new(
            artifact.filename.clone(),
            content_type.as_deref(),
            bytes.to_vec(),
        ))
    }
}

async fn send_checked(request: RequestBuilder) -> Result<Response, ComfyUIApiError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match response.text().await {
        Ok(text) => text,
        Err(e) => format!("<body unreadable: {e}>"),
    };
    Err(ComfyUIApiError::ApiError {
        status: status.as_u16(),
        body,
    })
}

async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ComfyUIApiError> {
    let response = send_checked(request).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ComfyUIApiError::Decode(e.to_string()))
}
