//! Output format resolution and the single encode call.
//!
//! Precedence, highest first:
//!
//! 1. WebP content negotiation (`webp=force`, or `webp=auto` with an
//!    `Accept` header that advertises `image/webp`)
//! 2. The explicit `format` parameter
//! 3. The source image's native format
//!
//! Quality is forwarded only to encoders that take one, and only when it is
//! in range; otherwise the encoder's own default applies.

use super::backend::{BackendError, ImageBackend};
use super::params::{OutputFormat, Quality, SourceType};

/// WebP content-negotiation mode (`webp` query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WebpMode {
    #[default]
    Off,
    Force,
    Auto,
}

impl WebpMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "auto" => Some(Self::Auto),
            "force" => Some(Self::Force),
            _ => None,
        }
    }
}

/// Final encoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportResult {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

impl ExportResult {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Whether the client gets WebP regardless of any explicit format.
pub fn negotiates_webp(mode: WebpMode, accept: Option<&str>) -> bool {
    match mode {
        WebpMode::Off => false,
        WebpMode::Force => true,
        WebpMode::Auto => accept.is_some_and(|a| a.contains("image/webp")),
    }
}

/// Pick the encoder target. Never returns [`OutputFormat::Unspecified`].
pub fn resolve_format(
    mode: WebpMode,
    accept: Option<&str>,
    requested: OutputFormat,
    source: SourceType,
) -> OutputFormat {
    let format = if negotiates_webp(mode, accept) {
        OutputFormat::Webp
    } else {
        requested
    };
    match format {
        // Vector sources never reach the encoder; PNG keeps the fallback lossless.
        OutputFormat::Unspecified => source.native_format().unwrap_or(OutputFormat::Png),
        other => other,
    }
}

/// Quality to hand the encoder for `format`, or `None` for its default.
pub fn effective_quality(format: OutputFormat, quality: Option<Quality>) -> Option<Quality> {
    if !format.accepts_quality() {
        return None;
    }
    quality.filter(|q| q.is_valid())
}

/// Encode `image` exactly once.
pub fn export<B: ImageBackend>(
    backend: &B,
    image: B::Image,
    format: OutputFormat,
    quality: Option<Quality>,
) -> Result<ExportResult, BackendError> {
    let format = match format {
        OutputFormat::Unspecified => {
            let source = backend.describe(&image).source;
            source.native_format().unwrap_or(OutputFormat::Png)
        }
        other => other,
    };
    let bytes = backend.encode(image, format, effective_quality(format, quality))?;
    Ok(ExportResult { bytes, format })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp, info};

    const CHROME_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
    const OLD_ACCEPT: &str = "image/png,image/*;q=0.8";

    #[test]
    fn force_always_yields_webp() {
        for accept in [None, Some(OLD_ACCEPT), Some(CHROME_ACCEPT)] {
            let f = resolve_format(WebpMode::Force, accept, OutputFormat::Png, SourceType::Jpeg);
            assert_eq!(f, OutputFormat::Webp);
        }
    }

    #[test]
    fn auto_requires_accept_header() {
        let f = resolve_format(
            WebpMode::Auto,
            Some(CHROME_ACCEPT),
            OutputFormat::Unspecified,
            SourceType::Jpeg,
        );
        assert_eq!(f, OutputFormat::Webp);

        let f = resolve_format(
            WebpMode::Auto,
            Some(OLD_ACCEPT),
            OutputFormat::Unspecified,
            SourceType::Jpeg,
        );
        assert_eq!(f, OutputFormat::Jpeg);

        let f = resolve_format(WebpMode::Auto, None, OutputFormat::Png, SourceType::Jpeg);
        assert_eq!(f, OutputFormat::Png);
    }

    #[test]
    fn negotiation_overrides_explicit_format() {
        let f = resolve_format(
            WebpMode::Auto,
            Some(CHROME_ACCEPT),
            OutputFormat::Avif,
            SourceType::Png,
        );
        assert_eq!(f, OutputFormat::Webp);
    }

    #[test]
    fn explicit_format_overrides_source() {
        let f = resolve_format(WebpMode::Off, Some(CHROME_ACCEPT), OutputFormat::Png, SourceType::Gif);
        assert_eq!(f, OutputFormat::Png);
    }

    #[test]
    fn unspecified_inherits_source_format() {
        for (source, expected) in [
            (SourceType::Jpeg, OutputFormat::Jpeg),
            (SourceType::Gif, OutputFormat::Gif),
            (SourceType::Tiff, OutputFormat::Tiff),
            (SourceType::Avif, OutputFormat::Avif),
        ] {
            let f = resolve_format(WebpMode::Off, None, OutputFormat::Unspecified, source);
            assert_eq!(f, expected);
        }
    }

    #[test]
    fn quality_matrix() {
        let q = Some(Quality(60));
        assert_eq!(effective_quality(OutputFormat::Jpeg, q), q);
        assert_eq!(effective_quality(OutputFormat::Gif, q), q);
        assert_eq!(effective_quality(OutputFormat::Png, q), None);
        assert_eq!(effective_quality(OutputFormat::Tiff, q), None);
        // out of range falls back to the encoder default
        assert_eq!(effective_quality(OutputFormat::Jpeg, Some(Quality(0))), None);
        assert_eq!(effective_quality(OutputFormat::Webp, Some(Quality(101))), None);
        assert_eq!(effective_quality(OutputFormat::Avif, None), None);
    }

    #[test]
    fn export_encodes_once_with_clamped_quality() {
        let backend = MockBackend::new(info(10, 10, SourceType::Jpeg));
        let image = backend.decode(b"", SourceType::Jpeg).unwrap();

        let result = export(&backend, image, OutputFormat::Png, Some(Quality(80))).unwrap();
        assert_eq!(result.mime_type(), "image/png");
        assert_eq!(
            backend.get_operations(),
            vec![
                RecordedOp::Decode(SourceType::Jpeg),
                RecordedOp::Encode {
                    format: OutputFormat::Png,
                    quality: None
                }
            ]
        );
    }

    #[test]
    fn export_unspecified_uses_native_format() {
        let backend = MockBackend::new(info(10, 10, SourceType::Webp));
        let image = backend.decode(b"", SourceType::Webp).unwrap();

        let result = export(&backend, image, OutputFormat::Unspecified, Some(Quality(70))).unwrap();
        assert_eq!(result.format, OutputFormat::Webp);
        assert!(matches!(
            backend.get_operations().last(),
            Some(RecordedOp::Encode {
                format: OutputFormat::Webp,
                quality: Some(70)
            })
        ));
    }

    #[test]
    fn export_dispatches_heif_and_jp2k_with_quality() {
        for (format, mime) in [
            (OutputFormat::Heif, "image/heif"),
            (OutputFormat::Jp2k, "image/jp2"),
        ] {
            let backend = MockBackend::new(info(10, 10, SourceType::Jpeg));
            let image = backend.decode(b"", SourceType::Jpeg).unwrap();

            let result = export(&backend, image, format, Some(Quality(40))).unwrap();
            assert_eq!(result.mime_type(), mime);
            assert_eq!(
                backend.get_operations().last(),
                Some(&RecordedOp::Encode {
                    format,
                    quality: Some(40)
                })
            );
        }
    }

    #[test]
    fn webp_mode_names() {
        assert_eq!(WebpMode::from_name("auto"), Some(WebpMode::Auto));
        assert_eq!(WebpMode::from_name("force"), Some(WebpMode::Force));
        assert_eq!(WebpMode::from_name("yes"), None);
    }
}
