//! The generation pipeline: subscribe, submit, await completion, fetch.
//!
//! One [`Orchestrator`] serves the whole process. It owns the session id
//! sent to the backend with every submission and every subscription, so
//! concurrent calls share one event socket and tell their events apart
//! by job id.

use std::sync::Arc;
use std::time::Duration;

use promptdeck_comfyui::events::JobEvent;
use promptdeck_comfyui::transport::{EventChannel, JobRequest, Transport, TransportError};
use promptdeck_core::artifact::{Artifact, ArtifactSet};
use promptdeck_core::config::MAX_GENERATION_TIMEOUT;
use promptdeck_core::params::{GenerationParams, TemplateBindings};
use promptdeck_core::seed::random_seed;
use promptdeck_core::template::{JobTemplate, TemplateStore};
use promptdeck_core::types::JobId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::artifacts::collect_artifacts;
use crate::completion::{CompletionTracker, Transition};
use crate::error::{FetchStage, OrchestrationError};
use crate::progress::ProgressObserver;

/// Per-call knobs for [`Orchestrator::generate_with`].
#[derive(Clone, Default)]
pub struct GenerateOptions {
    /// Receives this call's progress while it waits.
    pub observer: Option<Arc<dyn ProgressObserver>>,
    /// Cancelling the token ends the call with `Cancelled`.
    pub cancel: Option<CancellationToken>,
    /// Overrides the orchestrator's default deadline for this call.
    pub timeout: Option<Duration>,
}

impl GenerateOptions {
    /// Report progress of this call to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Abort the call when `cancel` fires. The subscription is still
    /// closed; the job is not removed from the backend queue.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Give up after `timeout`, counted from before the subscription.
    /// Downloads after completion are not covered.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a successful generation.
#[derive(Debug)]
pub struct GenerationOutput {
    /// Backend prompt id, for logs and diagnostics.
    pub job_id: JobId,
    /// The sampler seed written into the submitted payload.
    pub seed: u64,
    /// Every output, grouped by producer node in backend order.
    pub artifacts: ArtifactSet,
}

impl GenerationOutput {
    /// The first artifact of the first producer, with its producer id.
    pub fn first_artifact(&self) -> Option<(&str, &Artifact)> {
        self.artifacts
            .iter()
            .find_map(|(producer, list)| list.first().map(|a| (producer.as_str(), a)))
    }

    /// Total number of artifacts over all producers.
    pub fn artifact_count(&self) -> usize {
        self.artifacts.values().map(Vec::len).sum()
    }
}

/// Runs generations against one backend.
///
/// Holds the transport, the template source, the field bindings and the
/// session id shared by every call. Calls are independent: each gets its
/// own template copy, seed and subscription, so one orchestrator can serve
/// any number of concurrent requests behind an `Arc`.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    templates: TemplateStore,
    bindings: TemplateBindings,
    session_id: String,
    default_timeout: Option<Duration>,
}

impl Orchestrator {
    /// Create an orchestrator with a fresh session id, the default
    /// template bindings, and no deadline.
    pub fn new(transport: Arc<dyn Transport>, templates: TemplateStore) -> Self {
        Self {
            transport,
            templates,
            bindings: TemplateBindings::default(),
            session_id: uuid::Uuid::new_v4().to_string(),
            default_timeout: None,
        }
    }

    /// Write parameters into other template fields than the stock graph's.
    pub fn with_bindings(mut self, bindings: TemplateBindings) -> Self {
        self.bindings = bindings;
        self
    }

    /// Deadline for calls that do not set their own. `None` waits forever.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Replace the generated session id, e.g. to share one with other clients.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// The `client_id` sent on every submission and subscription.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The backend this orchestrator talks to.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Build the job payload for `params` with a freshly drawn seed.
    ///
    /// Nothing is sent; failures are `Configuration` errors.
    pub async fn prepare(
        &self,
        params: &GenerationParams,
    ) -> Result<(JobTemplate, u64), OrchestrationError> {
        let mut template = self.templates.fetch_template().await?;
        self.bindings.apply_params(&mut template, params)?;
        let seed = random_seed();
        self.bindings.apply_seed(&mut template, seed)?;
        Ok((template, seed))
    }

    /// Run one generation with default options.
    pub async fn generate(
        &self,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, OrchestrationError> {
        self.generate_with(params, GenerateOptions::default()).await
    }

    /// Run one generation.
    ///
    /// The subscription is opened before the job is submitted and closed
    /// exactly once before artifacts are fetched, whatever the outcome of
    /// the wait.
    pub async fn generate_with(
        &self,
        params: &GenerationParams,
        options: GenerateOptions,
    ) -> Result<GenerationOutput, OrchestrationError> {
        let (template, seed) = self.prepare(params).await?;
        let request = JobRequest {
            template,
            client_session_id: self.session_id.clone(),
        };

        let cancel = options.cancel.unwrap_or_default();
        let timeout = options.timeout.or(self.default_timeout);
        let wait = Wait {
            cancel: &cancel,
            deadline: timeout.and_then(deadline_after),
            observer: options.observer.as_deref(),
        };

        let mut channel = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled { job_id: None }),
            _ = wait.deadline_elapsed() => return Err(wait.timeout(None)),
            result = self.transport.subscribe(&self.session_id) => {
                result.map_err(|e| OrchestrationError::Submission {
                    message: format!("could not subscribe to job events: {e}"),
                })?
            }
        };

        let outcome = self.submit_and_wait(channel.as_mut(), &request, &wait).await;
        channel.close().await;
        let job_id = outcome?;

        let history = self.transport.history(&job_id).await.map_err(|e| {
            fetch_error(&job_id, FetchStage::History, &e)
        })?;
        let artifacts = collect_artifacts(self.transport.as_ref(), &history)
            .await
            .map_err(|e| fetch_error(&job_id, FetchStage::Artifact, &e))?;

        let output = GenerationOutput {
            job_id,
            seed,
            artifacts,
        };
        tracing::info!(
            job_id = %output.job_id,
            seed = output.seed,
            artifacts = output.artifact_count(),
            "Generation finished",
        );
        Ok(output)
    }

    async fn submit_and_wait(
        &self,
        channel: &mut dyn EventChannel,
        request: &JobRequest,
        wait: &Wait<'_>,
    ) -> Result<JobId, OrchestrationError> {
        let job_id = tokio::select! {
            biased;
            _ = wait.cancel.cancelled() => return Err(OrchestrationError::Cancelled { job_id: None }),
            _ = wait.deadline_elapsed() => return Err(wait.timeout(None)),
            result = self.transport.submit(request) => {
                result.map_err(|e| OrchestrationError::Submission { message: e.to_string() })?
            }
        };
        tracing::info!(job_id = %job_id, session_id = %self.session_id, "Job submitted, awaiting completion");

        let mut tracker = CompletionTracker::new(job_id);
        loop {
            let next = tokio::select! {
                biased;
                _ = wait.cancel.cancelled() => {
                    tracing::info!(job_id = %tracker.job_id(), "Generation cancelled while waiting");
                    return Err(OrchestrationError::Cancelled { job_id: Some(tracker.job_id().clone()) });
                }
                _ = wait.deadline_elapsed() => {
                    tracing::warn!(job_id = %tracker.job_id(), "Generation deadline elapsed");
                    return Err(wait.timeout(Some(tracker.job_id().clone())));
                }
                next = channel.next_event() => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    return Err(interrupted(&tracker, "event stream closed before completion"));
                }
                Err(e) => return Err(interrupted(&tracker, &e.to_string())),
            };

            match tracker.on_event(&event) {
                Transition::Ignored => trace_ignored(&event),
                Transition::Progress(update) => {
                    tracing::debug!(
                        job_id = %update.job_id,
                        node = ?update.node,
                        value = update.value,
                        max = update.max,
                        "Job progress",
                    );
                    if let Some(observer) = wait.observer {
                        observer.on_progress(&update);
                    }
                }
                Transition::NodeStarted(node) => {
                    tracing::debug!(job_id = %tracker.job_id(), node = %node, "Node executing");
                    if let Some(observer) = wait.observer {
                        observer.on_node(tracker.job_id(), &node);
                    }
                }
                Transition::Completed => {
                    tracing::info!(job_id = %tracker.job_id(), "Job completed");
                    return Ok(tracker.job_id().clone());
                }
                Transition::Failed { node, message } => {
                    tracing::error!(job_id = %tracker.job_id(), node = ?node, error = %message, "Job failed on the backend");
                    return Err(OrchestrationError::ExecutionFailed {
                        job_id: tracker.job_id().clone(),
                        node,
                        message,
                    });
                }
            }
        }
    }
}

/// Cancellation and deadline shared by every suspension point of a call.
struct Wait<'a> {
    cancel: &'a CancellationToken,
    deadline: Option<(Instant, Duration)>,
    observer: Option<&'a dyn ProgressObserver>,
}

impl Wait<'_> {
    /// Resolves when the deadline passes; never resolves without one.
    async fn deadline_elapsed(&self) {
        match self.deadline {
            Some((at, _)) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    fn timeout(&self, job_id: Option<JobId>) -> OrchestrationError {
        OrchestrationError::Timeout {
            job_id,
            after: self.deadline.map(|(_, after)| after).unwrap_or_default(),
        }
    }
}

/// Absolute deadline for a wait of `after`, starting now.
///
/// Waits longer than [`MAX_GENERATION_TIMEOUT`], or past the end of the
/// clock's range, run without a deadline.
fn deadline_after(after: Duration) -> Option<(Instant, Duration)> {
    let at = (after <= MAX_GENERATION_TIMEOUT)
        .then(|| Instant::now().checked_add(after))
        .flatten();
    if at.is_none() {
        tracing::warn!(?after, "Deadline out of range, waiting without one");
    }
    at.map(|at| (at, after))
}

fn interrupted(tracker: &CompletionTracker, reason: &str) -> OrchestrationError {
    tracing::warn!(job_id = %tracker.job_id(), reason, "Event stream interrupted");
    OrchestrationError::StreamInterrupted {
        job_id: tracker.job_id().clone(),
        reason: reason.to_string(),
    }
}

fn fetch_error(job_id: &JobId, stage: FetchStage, error: &TransportError) -> OrchestrationError {
    tracing::error!(job_id = %job_id, %stage, error = %error, "Artifact retrieval failed");
    OrchestrationError::ArtifactFetch {
        job_id: job_id.clone(),
        stage,
        message: error.to_string(),
    }
}

fn trace_ignored(event: &JobEvent) {
    if let Some(job_id) = event.job_id() {
        tracing::trace!(event_job_id = %job_id, "Ignoring event for another job");
    }
}
