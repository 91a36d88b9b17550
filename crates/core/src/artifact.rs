//! Output artifacts reported and produced by a completed job.
//!
//! The backend lists outputs as [`ArtifactRef`] descriptors in its
//! history record; each descriptor is fetched individually into an
//! [`Artifact`]. Results are grouped by producer node in an
//! [`ArtifactSet`] whose iteration order is the order reported by the
//! backend.

use std::io::Cursor;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Content type used when neither the response nor the payload tells us more.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Descriptor of one output file as listed in a job history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Backend folder type (`output`, `temp`, `input`).
    #[serde(rename = "type")]
    pub kind: String,
}

/// Raw bytes of one fetched output plus its content type.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Artifact {
    /// Build an artifact, resolving the content type from the transport
    /// header when present, then from the payload, then from the filename.
    pub fn new(filename: impl Into<String>, header: Option<&str>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = match header {
            Some(ct) if !ct.is_empty() && ct != FALLBACK_CONTENT_TYPE => ct.to_string(),
            _ => infer_content_type(&filename, &bytes).to_string(),
        };
        Self {
            filename,
            content_type,
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// PNG encoding of the artifact. PNG payloads are returned as-is;
    /// other image formats are decoded and re-encoded.
    pub fn to_png(&self) -> Result<Vec<u8>, CoreError> {
        if self.content_type == PNG_CONTENT_TYPE {
            return Ok(self.bytes.clone());
        }

        let decoded = image::load_from_memory(&self.bytes).map_err(|e| {
            CoreError::Validation(format!("{} is not a decodable image: {e}", self.filename))
        })?;
        let mut out = Cursor::new(Vec::new());
        decoded
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| CoreError::Internal(format!("PNG encoding of {} failed: {e}", self.filename)))?;
        Ok(out.into_inner())
    }
}

/// Artifacts grouped by producer node id, in backend-reported order.
pub type ArtifactSet = IndexMap<String, Vec<Artifact>>;

/// Guess a MIME type from the payload's magic bytes, falling back to the
/// filename extension.
pub fn infer_content_type(filename: &str, bytes: &[u8]) -> &'static str {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type();
    }

    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => FALLBACK_CONTENT_TYPE,
    }
}
