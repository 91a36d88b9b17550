//! Handler for `POST /api/v1/generate_images`.
//!
//! Runs one generation and answers with the first artifact as PNG. The
//! seed used for the job travels in the `x-seed` response header.

use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use promptdeck_core::artifact::PNG_CONTENT_TYPE;
use promptdeck_core::params::{GenerationParams, DEFAULT_HEIGHT, DEFAULT_STEPS, DEFAULT_WIDTH};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const SEED_HEADER: HeaderName = HeaderName::from_static("x-seed");
pub const JOB_ID_HEADER: HeaderName = HeaderName::from_static("x-job-id");

/// Request body for image generation.
#[derive(Debug, Deserialize)]
pub struct GenerateImagesRequest {
    pub positive_prompt: String,
    pub negative_prompt: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_steps() -> u32 {
    DEFAULT_STEPS
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

impl From<GenerateImagesRequest> for GenerationParams {
    fn from(req: GenerateImagesRequest) -> Self {
        GenerationParams::new(req.positive_prompt, req.negative_prompt)
            .with_steps(req.steps)
            .with_resolution(req.width, req.height)
    }
}

/// POST /api/v1/generate_images
pub async fn generate_images(
    State(state): State<AppState>,
    Json(input): Json<GenerateImagesRequest>,
) -> AppResult<Response> {
    let params = GenerationParams::from(input);
    params.validate()?;

    tracing::info!(
        steps = params.steps,
        width = params.width,
        height = params.height,
        "Generation requested",
    );

    let output = state.orchestrator.generate(&params).await?;

    let (producer, artifact) = output.first_artifact().ok_or(AppError::NoArtifacts)?;
    let png = artifact
        .to_png()
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    tracing::info!(
        job_id = %output.job_id,
        producer,
        filename = %artifact.filename,
        total = output.artifact_count(),
        "Returning first artifact",
    );

    let job_id = HeaderValue::from_str(output.job_id.as_str())
        .map_err(|e| AppError::InternalError(format!("job id is not a valid header: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(PNG_CONTENT_TYPE)),
            (SEED_HEADER, HeaderValue::from(output.seed)),
            (JOB_ID_HEADER, job_id),
        ],
        png,
    )
        .into_response())
}
