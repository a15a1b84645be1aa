//! Content-type allow-list and fast-path decision.

use crate::imaging::SourceType;
use crate::request::TransformRequest;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("unsupported image format: {0}")]
    Unsupported(String),
}

/// What to do with an admitted upstream body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Copy the bytes through untouched with the upstream content type.
    PassThrough,
    /// Decode and run the pipeline.
    Transform(SourceType),
}

/// Check the upstream `Content-Type` and pick the path.
///
/// Runs before any body byte is read for decoding. A missing header is
/// treated as unsupported.
pub fn admit(
    content_type: Option<&str>,
    request: &TransformRequest,
) -> Result<Admission, GateError> {
    let content_type = content_type.unwrap_or_default();
    let source = SourceType::from_content_type(content_type).ok_or_else(|| {
        let shown = if content_type.is_empty() {
            "missing content type"
        } else {
            content_type
        };
        GateError::Unsupported(shown.to_string())
    })?;

    if !request.has_transforms() || source.is_vector() {
        Ok(Admission::PassThrough)
    } else {
        Ok(Admission::Transform(source))
    }
}
