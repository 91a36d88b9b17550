/// Domain-level errors shared by every promptdeck crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Not found: {entity} '{key}'")]
    NotFound { entity: &'static str, key: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}
