//! Pure calculation functions for resize planning.
//!
//! All functions here are pure and testable without any I/O or images.
//!
//! The vertical axis is always measured against the **page height** (the
//! height of one frame). For single-frame images that is just the height;
//! for animated images it keeps every frame scaling by the same factor
//! instead of squashing the stacked strip.

use super::backend::ImageInfo;
use super::params::{LimitError, PixelLimits, Scale};

/// Decide whether and how to resize.
///
/// # Arguments
/// * `info` - Current image layout
/// * `width` - Target width, 0 = unconstrained
/// * `height` - Target height, 0 = unconstrained
/// * `upscale` - Allow factors above 1
///
/// # Returns
/// * `None` when the image passes through unresized
/// * `Some(scale)` with the factors to hand to the backend
///
/// # Examples
/// ```
/// # use imgate::imaging::{ImageInfo, SourceType, plan_resize};
/// let info = ImageInfo {
///     width: 1000, height: 800, page_height: 800, pages: 1,
///     has_alpha: false, source: SourceType::Jpeg,
/// };
/// // Width-only: uniform 0.2
/// let scale = plan_resize(&info, 200, 0, false).unwrap();
/// assert_eq!((scale.horizontal, scale.vertical), (0.2, 0.2));
///
/// // Would enlarge without `up=true` → untouched
/// assert!(plan_resize(&info, 2000, 0, false).is_none());
/// ```
pub fn plan_resize(info: &ImageInfo, width: u32, height: u32, upscale: bool) -> Option<Scale> {
    if info.width == 0 || info.page_height == 0 {
        return None;
    }

    match (width, height) {
        (0, 0) => None,
        (0, h) => {
            let factor = h as f64 / info.page_height as f64;
            (upscale || factor <= 1.0).then(|| Scale::uniform(factor))
        }
        (w, 0) => {
            let factor = w as f64 / info.width as f64;
            (upscale || factor <= 1.0).then(|| Scale::uniform(factor))
        }
        (w, h) => {
            let horizontal = w as f64 / info.width as f64;
            let vertical = h as f64 / info.page_height as f64;
            // Both axes must shrink (or pass) unless upscaling is allowed;
            // one enlarging axis leaves the image untouched.
            (upscale || (horizontal <= 1.0 && vertical <= 1.0)).then_some(Scale {
                horizontal,
                vertical,
            })
        }
    }
}

/// Apply a factor to one dimension, rounding to the nearest pixel and never
/// going below one pixel. Computed in `u64` so enlargements cannot wrap.
pub fn scaled_dimension(size: u32, factor: f64) -> u64 {
    (size as f64 * factor).round().max(1.0) as u64
}

/// Frame size after applying `scale`, refused when it breaks `limits`.
///
/// Only the requested axis is bounded by the query, so with `up=true` the
/// other axis can grow without limit; this runs before any allocation.
pub fn resized_dimensions(
    info: &ImageInfo,
    scale: Scale,
    limits: &PixelLimits,
) -> Result<(u32, u32), LimitError> {
    let width = scaled_dimension(info.width, scale.horizontal);
    let height = scaled_dimension(info.page_height, scale.vertical);
    limits.check(width, height, u64::from(info.pages))?;
    // Both sides are at most `max_dimension`, a u32.
    Ok((width as u32, height as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::SourceType;

    fn still(width: u32, height: u32) -> ImageInfo {
        ImageInfo {
            width,
            height,
            page_height: height,
            pages: 1,
            has_alpha: false,
            source: SourceType::Jpeg,
        }
    }

    fn animated(width: u32, page_height: u32, pages: u32) -> ImageInfo {
        ImageInfo {
            width,
            height: page_height * pages,
            page_height,
            pages,
            has_alpha: true,
            source: SourceType::Gif,
        }
    }

    // =========================================================================
    // plan_resize tests
    // =========================================================================

    #[test]
    fn unconstrained_is_noop() {
        assert_eq!(plan_resize(&still(1000, 800), 0, 0, false), None);
        assert_eq!(plan_resize(&still(1000, 800), 0, 0, true), None);
    }

    #[test]
    fn width_only_shrinks_uniformly() {
        let scale = plan_resize(&still(1000, 800), 200, 0, false).unwrap();
        assert_eq!(scale, Scale::uniform(0.2));
        assert_eq!(scaled_dimension(800, scale.vertical), 160);
    }

    #[test]
    fn height_only_shrinks_uniformly() {
        let scale = plan_resize(&still(1000, 800), 0, 400, false).unwrap();
        assert_eq!(scale, Scale::uniform(0.5));
    }

    #[test]
    fn single_axis_never_enlarges_by_default() {
        assert_eq!(plan_resize(&still(100, 50), 200, 0, false), None);
        assert_eq!(plan_resize(&still(100, 50), 0, 100, false), None);
    }

    #[test]
    fn single_axis_enlarges_with_upscale() {
        let scale = plan_resize(&still(100, 50), 200, 0, true).unwrap();
        assert_eq!(scale, Scale::uniform(2.0));
        assert_eq!(scaled_dimension(100, scale.horizontal), 200);
    }

    #[test]
    fn exact_size_counts_as_shrink() {
        // factor == 1 passes the "<= 1" check and is applied
        assert_eq!(
            plan_resize(&still(100, 50), 100, 0, false),
            Some(Scale::uniform(1.0))
        );
    }

    #[test]
    fn both_axes_scale_independently() {
        let scale = plan_resize(&still(1000, 800), 500, 200, false).unwrap();
        assert_eq!(scale.horizontal, 0.5);
        assert_eq!(scale.vertical, 0.25);
    }

    #[test]
    fn both_axes_skip_when_one_would_enlarge() {
        // horizontal 0.5, vertical 1.25
        assert_eq!(plan_resize(&still(1000, 800), 500, 1000, false), None);
    }

    #[test]
    fn both_axes_enlarge_with_upscale() {
        let scale = plan_resize(&still(1000, 800), 500, 1000, true).unwrap();
        assert_eq!(scale.horizontal, 0.5);
        assert_eq!(scale.vertical, 1.25);
    }

    #[test]
    fn animated_height_uses_page_height() {
        // 3 frames of 100px: asking for 50px tall halves each frame
        let scale = plan_resize(&animated(200, 100, 3), 0, 50, false).unwrap();
        assert_eq!(scale, Scale::uniform(0.5));
    }

    #[test]
    fn animated_page_height_blocks_enlargement() {
        // 250 > page height 100 → would enlarge even though stacked height is 300
        assert_eq!(plan_resize(&animated(200, 100, 3), 0, 250, false), None);
    }

    // =========================================================================
    // scaled_dimension tests
    // =========================================================================

    #[test]
    fn scaled_dimension_rounds() {
        assert_eq!(scaled_dimension(1920, 800.0 / 1080.0), 1422);
        assert_eq!(scaled_dimension(3, 0.5), 2);
    }

    #[test]
    fn scaled_dimension_minimum_one_pixel() {
        assert_eq!(scaled_dimension(10, 0.01), 1);
    }

    #[test]
    fn scaled_dimension_does_not_wrap() {
        // 300000 * 20000 overflows u32
        assert_eq!(scaled_dimension(300_000, 20_000.0), 6_000_000_000);
    }

    // =========================================================================
    // resized_dimensions tests
    // =========================================================================

    #[test]
    fn resized_dimensions_within_limits() {
        let info = still(1000, 800);
        let scale = plan_resize(&info, 200, 0, false).unwrap();
        assert_eq!(
            resized_dimensions(&info, scale, &PixelLimits::default()),
            Ok((200, 160))
        );
    }

    #[test]
    fn upscaled_free_axis_is_refused() {
        // h=20000&up=true on a 4000x1 strip asks for 80000000x20000
        let info = still(4000, 1);
        let scale = plan_resize(&info, 0, 20_000, true).unwrap();
        let err = resized_dimensions(&info, scale, &PixelLimits::default()).unwrap_err();
        assert_eq!(
            err,
            LimitError::Dimension {
                width: 80_000_000,
                height: 20_000,
                max: 20_000
            }
        );
    }

    #[test]
    fn resized_dimensions_count_every_frame() {
        let info = animated(1000, 1000, 10);
        let limits = PixelLimits {
            max_dimension: 20_000,
            max_pixels: 5_000_000,
        };
        assert!(resized_dimensions(&info, Scale::uniform(0.5), &limits).is_ok());
        assert!(matches!(
            resized_dimensions(&info, Scale::uniform(1.0), &limits),
            Err(LimitError::Pixels { .. })
        ));
    }
}
