//! Job history records returned by `GET /history/{prompt_id}`.
//!
//! The server answers with `{"<prompt_id>": {"outputs": {...}, "status": {...}}}`
//! and with `{}` when it has no record of the id. Outputs are keyed by
//! producer node id; only producers reporting an `images` list carry
//! artifacts.

use indexmap::IndexMap;
use promptdeck_core::artifact::ArtifactRef;
use promptdeck_core::types::JobId;
use serde::Deserialize;

use crate::api::ComfyUIApiError;

/// Artifact listing of one finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHistory {
    pub job_id: JobId,
    /// Producer node id -> artifacts, in server-reported order.
    pub outputs: IndexMap<String, Vec<ArtifactRef>>,
    /// Server-side status string (`success`, `error`), when reported.
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: IndexMap<String, NodeOutput>,
    #[serde(default)]
    status: Option<HistoryStatus>,
}

#[derive(Debug, Deserialize)]
struct NodeOutput {
    #[serde(default)]
    images: Option<Vec<ArtifactRef>>,
}

#[derive(Debug, Deserialize)]
struct HistoryStatus {
    #[serde(default)]
    status_str: Option<String>,
}

impl JobHistory {
    /// Extract the record for `job_id` from a history response body.
    pub fn from_response(job_id: &JobId, body: &serde_json::Value) -> Result<Self, ComfyUIApiError> {
        let entry = body
            .get(job_id.as_str())
            .ok_or_else(|| ComfyUIApiError::NotFound(job_id.clone()))?;

        let entry: HistoryEntry = serde_json::from_value(entry.clone()).map_err(|e| {
            ComfyUIApiError::Decode(format!("history record for {job_id}: {e}"))
        })?;

        let outputs = entry
            .outputs
            .into_iter()
            .filter_map(|(node, output)| output.images.map(|images| (node, images)))
            .collect();

        Ok(Self {
            job_id: job_id.clone(),
            outputs,
            status: entry.status.and_then(|s| s.status_str),
        })
    }

    /// Total number of artifacts across all producers.
    pub fn artifact_count(&self) -> usize {
        self.outputs.values().map(Vec::len).sum()
    }
}
