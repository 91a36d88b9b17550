#![allow(dead_code)]

//! Scriptable in-memory [`Transport`] for orchestrator tests.
//!
//! Every open subscription receives every frame the fake emits, like
//! subscriptions sharing one ComfyUI socket. What a submission emits is
//! decided by the `on_submit` script, which is handed the job id the
//! fake assigned (`job-1`, `job-2`, ...).

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;
use promptdeck_comfyui::api::ComfyUIApiError;
use promptdeck_comfyui::client::ComfyUIClientError;
use promptdeck_comfyui::events::JobEvent;
use promptdeck_comfyui::history::JobHistory;
use promptdeck_comfyui::transport::{EventChannel, JobRequest, Transport, TransportError};
use promptdeck_core::artifact::{Artifact, ArtifactRef};
use promptdeck_core::params::GenerationParams;
use promptdeck_core::template::{JobTemplate, TemplateStore};
use promptdeck_core::types::JobId;
use promptdeck_pipeline::Orchestrator;
use serde_json::json;
use tokio::sync::mpsc;

pub const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// One item delivered to subscriptions.
#[derive(Debug, Clone)]
pub enum Frame {
    Event(JobEvent),
    /// The channel reports a receive error.
    Error(String),
    /// The channel reports end of stream.
    HangUp,
}

type SubmitScript = Box<dyn Fn(&JobId) -> Vec<Frame> + Send + Sync>;
type HistoryScript = Box<dyn Fn(&JobId) -> Vec<(&'static str, Vec<&'static str>)> + Send + Sync>;

pub struct FakeTransport {
    state: Mutex<FakeState>,
    on_submit: SubmitScript,
    outputs: HistoryScript,
    pub subscribe_calls: AtomicUsize,
    pub close_calls: Arc<AtomicUsize>,
    pub events_delivered: Arc<AtomicUsize>,
}

#[derive(Default)]
struct FakeState {
    channels: Vec<mpsc::UnboundedSender<Frame>>,
    submitted: Vec<(JobId, JobRequest)>,
    reject_submit: Option<String>,
    fail_subscribe: bool,
    stall_submit: bool,
    fail_history: bool,
    failing_artifacts: HashSet<String>,
    artifact_requests: Vec<String>,
}

impl FakeTransport {
    /// A backend that completes every job immediately with one progress
    /// event and a single `9 -> [out.png]` output.
    pub fn new() -> Self {
        Self::scripted(|job| vec![progress(job, 10, 20), executing(Some("9"), job), completion(job)])
    }

    pub fn scripted(script: impl Fn(&JobId) -> Vec<Frame> + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            on_submit: Box::new(script),
            outputs: Box::new(|_: &JobId| vec![("9", vec!["out.png"])]),
            subscribe_calls: AtomicUsize::new(0),
            close_calls: Arc::new(AtomicUsize::new(0)),
            events_delivered: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_outputs(
        mut self,
        outputs: impl Fn(&JobId) -> Vec<(&'static str, Vec<&'static str>)> + Send + Sync + 'static,
    ) -> Self {
        self.outputs = Box::new(outputs);
        self
    }

    pub fn reject_submit(&self, body: &str) {
        self.state.lock().unwrap().reject_submit = Some(body.to_string());
    }

    pub fn fail_subscribe(&self) {
        self.state.lock().unwrap().fail_subscribe = true;
    }

    /// Submissions never return, as if the backend stopped answering.
    pub fn stall_submit(&self) {
        self.state.lock().unwrap().stall_submit = true;
    }

    /// History lookups report the job as unknown to the backend.
    pub fn fail_history(&self) {
        self.state.lock().unwrap().fail_history = true;
    }

    pub fn fail_artifact(&self, filename: &str) {
        self.state.lock().unwrap().failing_artifacts.insert(filename.to_string());
    }

    /// Push a frame to every open subscription.
    pub fn emit(&self, frame: Frame) {
        self.state
            .lock()
            .unwrap()
            .channels
            .retain(|tx| tx.send(frame.clone()).is_ok());
    }

    pub fn submitted(&self) -> Vec<(JobId, JobRequest)> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn artifact_requests(&self) -> Vec<String> {
        self.state.lock().unwrap().artifact_requests.clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn subscribe(&self, session_id: &str) -> Result<Box<dyn EventChannel>, TransportError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.fail_subscribe {
            return Err(ComfyUIClientError::Connection(format!("refused for {session_id}")).into());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.channels.push(tx);
        Ok(Box::new(FakeChannel {
            rx,
            close_calls: Arc::clone(&self.close_calls),
            events_delivered: Arc::clone(&self.events_delivered),
        }))
    }

    async fn submit(&self, request: &JobRequest) -> Result<JobId, TransportError> {
        tokio::task::yield_now().await;
        let stall = self.state.lock().unwrap().stall_submit;
        if stall {
            std::future::pending::<()>().await;
        }
        let job_id = {
            let mut state = self.state.lock().unwrap();
            if let Some(body) = state.reject_submit.take() {
                return Err(ComfyUIApiError::ApiError { status: 400, body }.into());
            }
            let job_id = JobId::from(format!("job-{}", state.submitted.len() + 1));
            state.submitted.push((job_id.clone(), request.clone()));
            job_id
        };
        for frame in (self.on_submit)(&job_id) {
            self.emit(frame);
        }
        Ok(job_id)
    }

    async fn history(&self, job_id: &JobId) -> Result<JobHistory, TransportError> {
        if self.state.lock().unwrap().fail_history {
            return Err(ComfyUIApiError::NotFound(job_id.clone()).into());
        }
        let outputs: IndexMap<String, Vec<ArtifactRef>> = (self.outputs)(job_id)
            .into_iter()
            .map(|(producer, files)| {
                let refs = files
                    .into_iter()
                    .map(|f| ArtifactRef {
                        filename: f.to_string(),
                        subfolder: String::new(),
                        kind: "output".to_string(),
                    })
                    .collect();
                (producer.to_string(), refs)
            })
            .collect();
        Ok(JobHistory {
            job_id: job_id.clone(),
            outputs,
            status: Some("success".to_string()),
        })
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Artifact, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.artifact_requests.push(artifact.filename.clone());
        if state.failing_artifacts.contains(&artifact.filename) {
            return Err(ComfyUIApiError::ApiError {
                status: 404,
                body: "not found".to_string(),
            }
            .into());
        }
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(artifact.filename.as_bytes());
        Ok(Artifact::new(artifact.filename.clone(), None, bytes))
    }
}

struct FakeChannel {
    rx: mpsc::UnboundedReceiver<Frame>,
    close_calls: Arc<AtomicUsize>,
    events_delivered: Arc<AtomicUsize>,
}

#[async_trait]
impl EventChannel for FakeChannel {
    async fn next_event(&mut self) -> Result<Option<JobEvent>, TransportError> {
        match self.rx.recv().await {
            Some(Frame::Event(event)) => {
                self.events_delivered.fetch_add(1, Ordering::SeqCst);
                Ok(Some(event))
            }
            Some(Frame::Error(reason)) => Err(ComfyUIClientError::Protocol(reason).into()),
            Some(Frame::HangUp) | None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.rx.close();
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn progress(job: &JobId, value: u32, max: u32) -> Frame {
    Frame::Event(JobEvent::Progress {
        node: Some("3".to_string()),
        job_id: Some(job.clone()),
        value,
        max,
    })
}

pub fn executing(node: Option<&str>, job: &JobId) -> Frame {
    Frame::Event(JobEvent::Executing {
        node: node.map(str::to_string),
        job_id: job.clone(),
    })
}

pub fn completion(job: &JobId) -> Frame {
    executing(None, job)
}

/// The stock text-to-image graph, trimmed to the nodes that matter here.
pub fn template() -> JobTemplate {
    JobTemplate::from_value(json!({
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "seed": 8566257,
                "steps": 20,
                "cfg": 8,
                "sampler_name": "euler",
                "model": ["4", 0],
                "positive": ["6", 0],
                "negative": ["7", 0],
                "latent_image": ["5", 0]
            }
        },
        "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "v1-5.safetensors"}},
        "5": {"class_type": "EmptyLatentImage", "inputs": {"batch_size": 1, "height": 512, "width": 512}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"clip": ["4", 1], "text": "masterpiece"}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"clip": ["4", 1], "text": "bad hands"}},
        "8": {"class_type": "VAEDecode", "inputs": {"samples": ["3", 0], "vae": ["4", 2]}},
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "ComfyUI", "images": ["8", 0]}}
    }))
    .unwrap()
}

pub fn orchestrator(transport: Arc<FakeTransport>) -> Orchestrator {
    Orchestrator::new(transport, TemplateStore::from_template(template()))
}

pub fn params(positive: &str) -> GenerationParams {
    GenerationParams::new(positive, "blurry")
}
