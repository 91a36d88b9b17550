use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use promptdeck_core::error::CoreError;
use promptdeck_pipeline::OrchestrationError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for request validation and [`OrchestrationError`]
/// for pipeline failures. Implements [`IntoResponse`] to produce
/// consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `promptdeck_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A generation call failed.
    #[error(transparent)]
    Generation(#[from] OrchestrationError),

    /// The job finished but produced nothing to return.
    #[error("Generation produced no artifacts")]
    NoArtifacts,

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", core.to_string()),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Io { .. } | CoreError::Parse { .. } | CoreError::Internal(_) => {
                    tracing::error!(error = %core, "Internal core error");
                    internal()
                }
            },

            // --- Pipeline errors ---
            AppError::Generation(err) => classify_generation_error(err),

            AppError::NoArtifacts => (
                StatusCode::BAD_GATEWAY,
                "NO_ARTIFACTS",
                self.to_string(),
            ),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

/// Classify a pipeline failure into an HTTP status, error code, and message.
///
/// - Template problems are the server's fault and map to 500.
/// - Backend refusals, broken streams, node failures and fetch errors map to 502.
/// - An elapsed generation deadline maps to 504.
fn classify_generation_error(err: &OrchestrationError) -> (StatusCode, &'static str, String) {
    match err {
        OrchestrationError::Configuration(inner) => {
            tracing::error!(error = %inner, "Job template misconfigured");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIGURATION_ERROR",
                err.to_string(),
            )
        }
        OrchestrationError::Submission { .. } => {
            (StatusCode::BAD_GATEWAY, "SUBMISSION_FAILED", err.to_string())
        }
        OrchestrationError::StreamInterrupted { .. } => {
            (StatusCode::BAD_GATEWAY, "STREAM_INTERRUPTED", err.to_string())
        }
        OrchestrationError::ExecutionFailed { .. } => {
            (StatusCode::BAD_GATEWAY, "EXECUTION_FAILED", err.to_string())
        }
        OrchestrationError::ArtifactFetch { .. } => {
            (StatusCode::BAD_GATEWAY, "ARTIFACT_FETCH_FAILED", err.to_string())
        }
        OrchestrationError::Timeout { .. } => {
            (StatusCode::GATEWAY_TIMEOUT, "GENERATION_TIMEOUT", err.to_string())
        }
        OrchestrationError::Cancelled { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED", err.to_string())
        }
    }
}
