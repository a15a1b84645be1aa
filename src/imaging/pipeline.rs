//! The transform pipeline.
//!
//! Decodes the source, then applies a fixed, ordered list of steps:
//!
//! ```text
//! rotate → blur → resize → sharpen → strip metadata
//! ```
//!
//! Each step is skipped when its parameter is at the disabled value. The
//! order is data ([`plan`] returns a `Vec<Step>`), and every step consumes
//! the decoded image and returns the next one, so a failure anywhere drops
//! the image immediately.

use super::backend::{BackendError, ImageBackend};
use super::calculations::plan_resize;
use super::params::{Sharpening, SourceType};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] BackendError),
    #[error("{step} failed: {source}")]
    Transform {
        step: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("encode failed: {0}")]
    Encode(#[source] BackendError),
}

/// The transform-affecting subset of a request.
///
/// Zero means disabled for `rotate`, `blur` and `sharpen`, and
/// unconstrained for `width`/`height`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transforms {
    pub width: u32,
    pub height: u32,
    pub rotate: u32,
    pub blur: f64,
    pub sharpen: f64,
    pub upscale: bool,
    pub strip: bool,
}

/// One pipeline step with its resolved parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Rotate(u32),
    Blur(f64),
    Resize {
        width: u32,
        height: u32,
        upscale: bool,
    },
    Sharpen(Sharpening),
    StripMetadata,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Rotate(_) => "rotate",
            Step::Blur(_) => "blur",
            Step::Resize { .. } => "resize",
            Step::Sharpen(_) => "sharpen",
            Step::StripMetadata => "strip metadata",
        }
    }
}

/// Plan the steps to run, in order, without executing them.
pub fn plan(transforms: &Transforms) -> Vec<Step> {
    let mut steps = Vec::with_capacity(5);
    if transforms.rotate != 0 {
        steps.push(Step::Rotate(transforms.rotate));
    }
    if transforms.blur > 0.0 {
        steps.push(Step::Blur(transforms.blur));
    }
    if transforms.width != 0 || transforms.height != 0 {
        steps.push(Step::Resize {
            width: transforms.width,
            height: transforms.height,
            upscale: transforms.upscale,
        });
    }
    if transforms.sharpen > 0.0 {
        steps.push(Step::Sharpen(Sharpening::unsharp(transforms.sharpen)));
    }
    if transforms.strip {
        steps.push(Step::StripMetadata);
    }
    steps
}

/// Decode `bytes` and run every planned step.
///
/// GIF sources are decoded as a full frame sequence so animation survives.
pub fn run<B: ImageBackend>(
    backend: &B,
    bytes: &[u8],
    source: SourceType,
    transforms: &Transforms,
) -> Result<B::Image, PipelineError> {
    let image = if source.is_animated() {
        backend.decode_animated(bytes)
    } else {
        backend.decode(bytes, source)
    }
    .map_err(PipelineError::Decode)?;

    plan(transforms)
        .into_iter()
        .try_fold(image, |image, step| {
            debug!(step = step.name(), "applying transform");
            apply(backend, image, step).map_err(|source| PipelineError::Transform {
                step: step.name(),
                source,
            })
        })
}

/// Execute one step.
pub fn apply<B: ImageBackend>(
    backend: &B,
    image: B::Image,
    step: Step,
) -> Result<B::Image, BackendError> {
    match step {
        Step::Rotate(degrees) => {
            // Corners uncovered by the rotation must come out transparent,
            // which needs an alpha band to exist first.
            let image = if backend.describe(&image).has_alpha {
                image
            } else {
                backend.add_alpha(image)?
            };
            backend.rotate(image, degrees)
        }
        Step::Blur(sigma) => backend.blur(image, sigma),
        Step::Resize {
            width,
            height,
            upscale,
        } => {
            let info = backend.describe(&image);
            match plan_resize(&info, width, height, upscale) {
                Some(scale) => backend.resize(image, scale),
                None => {
                    debug!(
                        width = info.width,
                        page_height = info.page_height,
                        "resize skipped, would enlarge"
                    );
                    Ok(image)
                }
            }
        }
        Step::Sharpen(sharpening) => backend.sharpen(image, sharpening),
        Step::StripMetadata => backend.strip_metadata(image),
    }
}
