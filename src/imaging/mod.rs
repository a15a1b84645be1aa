//! Image processing, statically linked, no system codec libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image` readers, `avif-parse` + `rav1d` for AVIF |
//! | **Rotate** | `imageproc` (canvas preserved, transparent fill) |
//! | **Blur / Sharpen** | `image` Gaussian blur and unsharp mask |
//! | **Resize** | Lanczos3, per frame for animated GIF |
//! | **Encode** | `image` encoders, rav1e for AVIF, bundled libwebp for WebP |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for resize planning and pixel limits (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Pipeline**: The fixed transform order over a backend
//! - **Export**: Output format negotiation and the final encode

pub mod backend;
mod calculations;
pub mod export;
mod params;
pub mod pipeline;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend, ImageInfo};
pub use calculations::{plan_resize, resized_dimensions};
pub use export::{ExportResult, WebpMode, export, resolve_format};
pub use params::{LimitError, OutputFormat, PixelLimits, Quality, Scale, Sharpening, SourceType};
pub use pipeline::{PipelineError, Transforms};
pub use rust_backend::RustBackend;
