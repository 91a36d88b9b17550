//! Artifact retrieval for a finished job.

use promptdeck_comfyui::history::JobHistory;
use promptdeck_comfyui::transport::{Transport, TransportError};
use promptdeck_core::artifact::ArtifactSet;

/// Download every artifact listed in `history`, one at a time.
///
/// Producer order and per-producer order follow the history record.
/// The first failure aborts the whole fetch.
pub async fn collect_artifacts(
    transport: &dyn Transport,
    history: &JobHistory,
) -> Result<ArtifactSet, TransportError> {
    let mut set = ArtifactSet::with_capacity(history.outputs.len());

    for (producer, refs) in &history.outputs {
        let mut artifacts = Vec::with_capacity(refs.len());
        for reference in refs {
            let artifact = transport.fetch_artifact(reference).await?;
            tracing::debug!(
                job_id = %history.job_id,
                producer = %producer,
                filename = %artifact.filename,
                bytes = artifact.len(),
                "Fetched artifact",
            );
            artifacts.push(artifact);
        }
        set.insert(producer.clone(), artifacts);
    }

    Ok(set)
}
