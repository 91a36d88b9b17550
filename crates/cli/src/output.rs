//! Writing generation results to disk.

use std::path::{Path, PathBuf};

use anyhow::Context;
use promptdeck_pipeline::GenerationOutput;

/// Default output directory, relative to the working directory.
pub const DEFAULT_OUTPUT_DIR: &str = "outputs";

/// File name for the `index`-th artifact of `producer`.
///
/// The first artifact of a producer is `{producer}-{seed}.png`; later ones
/// get a `-{index}` suffix so they do not overwrite it.
pub fn artifact_file_name(producer: &str, seed: u64, index: usize) -> String {
    if index == 0 {
        format!("{producer}-{seed}.png")
    } else {
        format!("{producer}-{seed}-{index}.png")
    }
}

/// Write every artifact of `output` into `dir` as PNG, creating `dir` if
/// needed. Returns the written paths in artifact order.
pub async fn save_artifacts(dir: &Path, output: &GenerationOutput) -> anyhow::Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let mut written = Vec::with_capacity(output.artifact_count());
    for (producer, artifacts) in &output.artifacts {
        for (index, artifact) in artifacts.iter().enumerate() {
            let png = artifact
                .to_png()
                .with_context(|| format!("Failed to convert {} to PNG", artifact.filename))?;
            let path = dir.join(artifact_file_name(producer, output.seed, index));
            tokio::fs::write(&path, png)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::debug!(path = %path.display(), source = %artifact.filename, "Saved artifact");
            written.push(path);
        }
    }
    Ok(written)
}
