//! Parameter types for image operations.
//!
//! These types describe *what* to do, not *how* to do it. They are the
//! interface between the [`pipeline`](super::pipeline) and
//! [`export`](super::export) modules (which decide what happens to an image)
//! and the [`backend`](super::backend) (which does the actual pixel work).
//! This separation allows swapping backends (e.g. for testing with a mock)
//! without changing any ordering or policy logic.
//!
//! ## Types
//!
//! - [`Quality`] — Lossy encoding quality (1–100).
//! - [`Sharpening`] — Unsharp-mask parameters (sigma, flat threshold, jaggy multiplier).
//! - [`Scale`] — Horizontal and vertical resize factors.
//! - [`SourceType`] — Upstream image type, as declared by its `Content-Type`.
//! - [`OutputFormat`] — Encoder target, including "unspecified" (inherit from source).
//! - [`PixelLimits`] — Ceilings on decoded and resized image size.

use thiserror::Error;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 100;

    /// Accept a value only if it is already in range.
    pub fn checked(value: u32) -> Option<Self> {
        (Self::MIN..=Self::MAX)
            .contains(&value)
            .then_some(Self(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        (Self::MIN..=Self::MAX).contains(&self.0)
    }
}

/// Sharpening parameters for unsharp mask.
///
/// - `sigma`: Standard deviation of the Gaussian used for the mask
/// - `x1`: Flat/jaggy threshold; differences below it are left alone
/// - `m2`: Mask multiplier, always [`Sharpening::MULTIPLIER`] (full strength)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sharpening {
    pub sigma: f32,
    pub x1: f32,
    pub m2: f32,
}

impl Sharpening {
    pub const RADIUS_FACTOR: f32 = 0.6;
    pub const MULTIPLIER: f32 = 1.0;

    /// Unsharp mask driven by a caller-supplied amount, with the fixed
    /// threshold/multiplier pair used for every request.
    pub fn unsharp(amount: f64) -> Self {
        Self {
            sigma: amount as f32,
            x1: Self::RADIUS_FACTOR,
            m2: Self::MULTIPLIER,
        }
    }
}

/// Resize factors. A uniform resize has `horizontal == vertical`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub horizontal: f64,
    pub vertical: f64,
}

impl Scale {
    pub fn uniform(factor: f64) -> Self {
        Self {
            horizontal: factor,
            vertical: factor,
        }
    }
}

/// Upper bounds on image size, checked before pixels are allocated.
///
/// A few hundred bytes of GIF or PNG can declare a canvas of billions of
/// pixels, so the byte ceiling on the upstream body does not bound memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLimits {
    /// Largest width or page height, in pixels.
    pub max_dimension: u32,
    /// Largest pixel count, summed over every frame.
    pub max_pixels: u64,
}

impl PixelLimits {
    pub const DEFAULT_MAX_DIMENSION: u32 = 20_000;
    pub const DEFAULT_MAX_PIXELS: u64 = 100_000_000;

    /// Check a `width` × `page_height` image with `pages` frames.
    pub fn check(&self, width: u64, page_height: u64, pages: u64) -> Result<(), LimitError> {
        let max = u64::from(self.max_dimension);
        if width > max || page_height > max {
            return Err(LimitError::Dimension {
                width,
                height: page_height,
                max: self.max_dimension,
            });
        }
        let pixels = width.saturating_mul(page_height).saturating_mul(pages);
        if pixels > self.max_pixels {
            return Err(LimitError::Pixels {
                pixels,
                max: self.max_pixels,
            });
        }
        Ok(())
    }
}

impl Default for PixelLimits {
    fn default() -> Self {
        Self {
            max_dimension: Self::DEFAULT_MAX_DIMENSION,
            max_pixels: Self::DEFAULT_MAX_PIXELS,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimitError {
    #[error("{width}x{height} exceeds the {max} pixel side limit")]
    Dimension { width: u64, height: u64, max: u32 },
    #[error("{pixels} pixels exceeds the {max} pixel budget")]
    Pixels { pixels: u64, max: u64 },
}

/// Image type of the upstream body, taken from its `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Jpeg,
    Png,
    Gif,
    Webp,
    Heif,
    Tiff,
    Avif,
    Jp2k,
    Svg,
}

impl SourceType {
    /// Parse a MIME essence (`type/subtype`, already lowercased and stripped
    /// of parameters).
    pub fn from_mime(essence: &str) -> Option<Self> {
        let source = match essence {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Self::Jpeg,
            "image/png" => Self::Png,
            "image/gif" => Self::Gif,
            "image/webp" => Self::Webp,
            "image/heic" | "image/heif" => Self::Heif,
            "image/tiff" | "image/tif" => Self::Tiff,
            "image/avif" => Self::Avif,
            "image/jp2" | "image/j2k" | "image/jpx" => Self::Jp2k,
            "image/svg+xml" => Self::Svg,
            _ => return None,
        };
        Some(source)
    }

    /// Parse a full `Content-Type` header value. Parameters such as
    /// `; charset=` are ignored and matching is case-insensitive.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        Self::from_mime(&essence.to_ascii_lowercase())
    }

    /// Vector content is never rasterized.
    pub fn is_vector(self) -> bool {
        matches!(self, Self::Svg)
    }

    /// Sources that must be decoded as a full frame sequence.
    pub fn is_animated(self) -> bool {
        matches!(self, Self::Gif)
    }

    /// The encoder that reproduces this source's own format.
    pub fn native_format(self) -> Option<OutputFormat> {
        let format = match self {
            Self::Jpeg => OutputFormat::Jpeg,
            Self::Png => OutputFormat::Png,
            Self::Gif => OutputFormat::Gif,
            Self::Webp => OutputFormat::Webp,
            Self::Heif => OutputFormat::Heif,
            Self::Tiff => OutputFormat::Tiff,
            Self::Avif => OutputFormat::Avif,
            Self::Jp2k => OutputFormat::Jp2k,
            Self::Svg => return None,
        };
        Some(format)
    }
}

/// Output format requested by the caller (or resolved by negotiation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    /// Inherit the source image's native format.
    #[default]
    Unspecified,
    Jpeg,
    Png,
    Webp,
    Heif,
    Tiff,
    Avif,
    Jp2k,
    Gif,
}

impl OutputFormat {
    /// Parse a `format` query literal. Case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        let format = match name.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Self::Jpeg,
            "png" => Self::Png,
            "webp" => Self::Webp,
            "heif" | "heic" => Self::Heif,
            "tiff" | "tif" => Self::Tiff,
            "avif" => Self::Avif,
            "jp2k" | "j2k" | "jp2" => Self::Jp2k,
            "gif" => Self::Gif,
            _ => return None,
        };
        Some(format)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Heif => "image/heif",
            Self::Tiff => "image/tiff",
            Self::Avif => "image/avif",
            Self::Jp2k => "image/jp2",
            Self::Gif => "image/gif",
            Self::Unspecified => "application/octet-stream",
        }
    }

    /// Whether the encoder for this format takes a quality parameter.
    /// PNG and TIFF ignore quality entirely.
    pub fn accepts_quality(self) -> bool {
        matches!(
            self,
            Self::Jpeg | Self::Webp | Self::Heif | Self::Avif | Self::Jp2k | Self::Gif
        )
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unspecified => "unspecified",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Heif => "heif",
            Self::Tiff => "tiff",
            Self::Avif => "avif",
            Self::Jp2k => "jp2k",
            Self::Gif => "gif",
        };
        f.write_str(name)
    }
}
