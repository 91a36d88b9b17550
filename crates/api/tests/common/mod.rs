#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use indexmap::IndexMap;
use promptdeck_comfyui::api::ComfyUIApiError;
use promptdeck_comfyui::events::JobEvent;
use promptdeck_comfyui::history::JobHistory;
use promptdeck_comfyui::transport::{EventChannel, JobRequest, Transport, TransportError};
use promptdeck_core::artifact::{Artifact, ArtifactRef};
use promptdeck_core::config::BackendConfig;
use promptdeck_core::template::{JobTemplate, TemplateStore};
use promptdeck_core::types::JobId;
use promptdeck_pipeline::Orchestrator;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use promptdeck_api::app::build_app;
use promptdeck_api::config::ServerConfig;
use promptdeck_api::state::AppState;

pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 7, 7, 7];

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// How the fake backend answers a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Complete immediately with two artifacts on node 9.
    Complete,
    /// Complete, but report no outputs.
    CompleteEmpty,
    /// Refuse the submission with HTTP 400.
    Reject,
    /// Accept and then report a node failure.
    FailNode,
    /// Accept and then close the event stream.
    HangUp,
    /// Accept and never finish.
    Stall,
}

/// In-memory backend; every subscription sees every emitted event.
pub struct FakeTransport {
    behavior: Behavior,
    channels: Mutex<Vec<mpsc::UnboundedSender<Option<JobEvent>>>>,
    pub submitted: Mutex<Vec<JobRequest>>,
}

impl FakeTransport {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            channels: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    fn emit(&self, event: Option<JobEvent>) {
        self.channels
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn subscribe(&self, _session_id: &str) -> Result<Box<dyn EventChannel>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.lock().unwrap().push(tx);
        Ok(Box::new(FakeChannel { rx }))
    }

    async fn submit(&self, request: &JobRequest) -> Result<JobId, TransportError> {
        if self.behavior == Behavior::Reject {
            return Err(ComfyUIApiError::ApiError {
                status: 400,
                body: r#"{"error": "prompt_outputs_failed_validation"}"#.to_string(),
            }
            .into());
        }

        let job_id = {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(request.clone());
            JobId::from(format!("job-{}", submitted.len()))
        };

        match self.behavior {
            Behavior::Complete | Behavior::CompleteEmpty => {
                self.emit(Some(JobEvent::Progress {
                    node: Some("3".into()),
                    job_id: Some(job_id.clone()),
                    value: 1,
                    max: 1,
                }));
                self.emit(Some(JobEvent::Executing {
                    node: None,
                    job_id: job_id.clone(),
                }));
            }
            Behavior::FailNode => self.emit(Some(JobEvent::ExecutionFailed {
                job_id: job_id.clone(),
                node: Some("3".into()),
                message: "CUDA out of memory".into(),
            })),
            Behavior::HangUp => self.emit(None),
            Behavior::Reject | Behavior::Stall => {}
        }

        Ok(job_id)
    }

    async fn history(&self, job_id: &JobId) -> Result<JobHistory, TransportError> {
        let mut outputs = two_outputs();
        if self.behavior == Behavior::CompleteEmpty {
            outputs.clear();
        }
        Ok(JobHistory {
            job_id: job_id.clone(),
            outputs,
            status: Some("success".into()),
        })
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Artifact, TransportError> {
        let mut bytes = PNG_BYTES.to_vec();
        bytes.extend_from_slice(artifact.filename.as_bytes());
        Ok(Artifact::new(artifact.filename.clone(), Some("image/png"), bytes))
    }
}

fn two_outputs() -> IndexMap<String, Vec<ArtifactRef>> {
    let refs = ["first.png", "second.png"]
        .into_iter()
        .map(|f| ArtifactRef {
            filename: f.to_string(),
            subfolder: String::new(),
            kind: "output".to_string(),
        })
        .collect();
    IndexMap::from([("9".to_string(), refs)])
}

struct FakeChannel {
    rx: mpsc::UnboundedReceiver<Option<JobEvent>>,
}

#[async_trait]
impl EventChannel for FakeChannel {
    async fn next_event(&mut self) -> Result<Option<JobEvent>, TransportError> {
        Ok(self.rx.recv().await.flatten())
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

pub fn template() -> JobTemplate {
    JobTemplate::from_value(json!({
        "3": {"class_type": "KSampler", "inputs": {"seed": 1, "steps": 20, "cfg": 8}},
        "5": {"class_type": "EmptyLatentImage", "inputs": {"width": 512, "height": 512, "batch_size": 1}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "ComfyUI"}}
    }))
    .unwrap()
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:8000".to_string()],
        request_timeout_secs: 30,
        backend: BackendConfig {
            server_address: "comfy.test:8188".to_string(),
            generation_timeout: Some(Duration::from_millis(200)),
            ..BackendConfig::default()
        },
    }
}

/// Build the application exactly as `main.rs` does, over the given backend.
pub fn build_test_app(transport: Arc<FakeTransport>) -> Router {
    let config = test_config();
    let orchestrator = Orchestrator::new(transport, TemplateStore::from_template(template()))
        .with_default_timeout(config.backend.generation_timeout);

    build_app(AppState {
        config: Arc::new(config),
        orchestrator: Arc::new(orchestrator),
    })
    .unwrap()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    app.oneshot(
        Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
