//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the capability set the gateway needs from a
//! codec library: decode, describe, one method per transform, and encode.
//! Ordering and policy (which steps run, in what order, with which scale
//! factors and quality values) live in [`pipeline`](super::pipeline) and
//! [`export`](super::export); the backend only does what it is told.
//!
//! Decoded images are an associated type owned by value. Every transform
//! consumes the image and hands back the next one, so a failing step drops
//! the image on the spot and nothing outlives the request.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend).

use super::params::{OutputFormat, Quality, Scale, Sharpening, SourceType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Result of a describe operation.
///
/// `height` is the full stacked height of every frame; `page_height` is the
/// height of one frame. They are equal for single-frame images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub page_height: u32,
    pub pages: u32,
    pub has_alpha: bool,
    pub source: SourceType,
}

/// Trait for image processing backends.
///
/// Implementations must be shareable across request tasks; the decoded
/// [`Image`](ImageBackend::Image) itself is owned by exactly one request.
pub trait ImageBackend: Send + Sync {
    /// Opaque decoded image (all frames, for animated sources).
    type Image: Send;

    /// Decode a single-frame image.
    fn decode(&self, bytes: &[u8], source: SourceType) -> Result<Self::Image, BackendError>;

    /// Decode every frame of an animated image.
    fn decode_animated(&self, bytes: &[u8]) -> Result<Self::Image, BackendError>;

    /// Dimensions and layout of a decoded image.
    fn describe(&self, image: &Self::Image) -> ImageInfo;

    /// Add an alpha band that is opaque everywhere.
    fn add_alpha(&self, image: Self::Image) -> Result<Self::Image, BackendError>;

    /// Rotate clockwise about the center, filling uncovered pixels with
    /// fully transparent black.
    fn rotate(&self, image: Self::Image, degrees: u32) -> Result<Self::Image, BackendError>;

    /// Gaussian blur.
    fn blur(&self, image: Self::Image, sigma: f64) -> Result<Self::Image, BackendError>;

    /// Resize by independent horizontal and vertical factors. The vertical
    /// factor applies to each frame's page height.
    fn resize(&self, image: Self::Image, scale: Scale) -> Result<Self::Image, BackendError>;

    /// Unsharp mask.
    fn sharpen(
        &self,
        image: Self::Image,
        sharpening: Sharpening,
    ) -> Result<Self::Image, BackendError>;

    /// Drop embedded EXIF/ICC/XMP payloads.
    fn strip_metadata(&self, image: Self::Image) -> Result<Self::Image, BackendError>;

    /// Encode to the given format. `None` quality means the encoder default.
    fn encode(
        &self,
        image: Self::Image,
        format: OutputFormat,
        quality: Option<Quality>,
    ) -> Result<Vec<u8>, BackendError>;
}
