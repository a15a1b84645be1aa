//! Image processing backend on the `image` crate ecosystem.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Decode (animated GIF) | `image::codecs::gif::GifDecoder::into_frames` |
//! | Decode (AVIF) | `avif-parse` (container) + `rav1d` (AV1 decode) + custom YUV→RGB |
//! | Rotate | `imageproc::geometric_transformations::rotate_about_center` |
//! | Blur | `image::DynamicImage::blur` |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Sharpen | `image::DynamicImage::unsharpen` |
//! | Encode → JPEG/PNG/TIFF/GIF | `image::codecs::*` |
//! | Encode → WebP | `webp::Encoder` (lossy, libwebp) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//!
//! HEIF and JPEG 2000 have no pure Rust codec: decoding them is a decode
//! error and encoding to them is [`BackendError::Unsupported`].
//!
//! Per-frame work on animated images runs on the rayon pool.
//!
//! Every decode and resize is checked against [`PixelLimits`] before the
//! pixel buffers are allocated.

use super::backend::{BackendError, ImageBackend, ImageInfo};
use super::calculations::resized_dimensions;
use super::params::{LimitError, OutputFormat, PixelLimits, Quality, Scale, Sharpening, SourceType};
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{
    AnimationDecoder, Delay, DynamicImage, Frame, ImageDecoder, ImageEncoder, ImageError,
    ImageFormat, ImageReader, Limits, Rgba,
};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use rayon::prelude::*;
use std::io::Cursor;
use tracing::debug;

const DEFAULT_JPEG_QUALITY: u32 = 75;
const DEFAULT_AVIF_QUALITY: u32 = 80;
const AVIF_SPEED: u8 = 6;
const DEFAULT_WEBP_QUALITY: u32 = 75;
const DEFAULT_GIF_SPEED: i32 = 10;
/// Widest decoded sample (16-bit RGBA), for the decoder allocation cap.
const MAX_BYTES_PER_PIXEL: u64 = 8;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
#[derive(Debug, Clone, Default)]
pub struct RustBackend {
    limits: PixelLimits,
}

impl RustBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: PixelLimits) -> Self {
        Self { limits }
    }
}

/// One frame. Still images have exactly one.
#[derive(Debug, Clone)]
struct Page {
    image: DynamicImage,
    delay: Delay,
}

/// A decoded image: every frame at the same canvas size, plus the embedded
/// ICC profile if the source carried one.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pages: Vec<Page>,
    source: SourceType,
    icc_profile: Option<Vec<u8>>,
}

impl RasterImage {
    fn still(image: DynamicImage, source: SourceType, icc_profile: Option<Vec<u8>>) -> Self {
        Self {
            pages: vec![Page {
                image,
                delay: Delay::from_numer_denom_ms(0, 1),
            }],
            source,
            icc_profile,
        }
    }

    fn first(&self) -> Option<&DynamicImage> {
        self.pages.first().map(|p| &p.image)
    }

    /// Apply `f` to every frame in parallel.
    fn map_pages<F>(self, f: F) -> Self
    where
        F: Fn(DynamicImage) -> DynamicImage + Send + Sync,
    {
        let pages = self
            .pages
            .into_par_iter()
            .map(|page| Page {
                image: f(page.image),
                delay: page.delay,
            })
            .collect();
        Self { pages, ..self }
    }
}

fn decode_error(e: ImageError) -> BackendError {
    BackendError::Decode(e.to_string())
}

fn oversize_source(e: LimitError) -> BackendError {
    BackendError::Decode(format!("source image too large: {e}"))
}

/// Decoder-side limits, so the `image` readers refuse before allocating.
fn decoder_limits(limits: &PixelLimits) -> Limits {
    let mut decoder_limits = Limits::default();
    decoder_limits.max_image_width = Some(limits.max_dimension);
    decoder_limits.max_image_height = Some(limits.max_dimension);
    decoder_limits.max_alloc = Some(limits.max_pixels.saturating_mul(MAX_BYTES_PER_PIXEL));
    decoder_limits
}

fn image_format(source: SourceType) -> Option<ImageFormat> {
    match source {
        SourceType::Jpeg => Some(ImageFormat::Jpeg),
        SourceType::Png => Some(ImageFormat::Png),
        SourceType::Gif => Some(ImageFormat::Gif),
        SourceType::Webp => Some(ImageFormat::WebP),
        SourceType::Tiff => Some(ImageFormat::Tiff),
        _ => None,
    }
}

type RasterImageParts = (DynamicImage, Option<Vec<u8>>);

/// Decode with the `image` crate, keeping any embedded ICC profile.
fn decode_raster(
    bytes: &[u8],
    format: ImageFormat,
    limits: &PixelLimits,
) -> Result<RasterImageParts, BackendError> {
    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(decoder_limits(limits));
    let mut decoder = reader.into_decoder().map_err(decode_error)?;
    let (width, height) = decoder.dimensions();
    limits
        .check(width.into(), height.into(), 1)
        .map_err(oversize_source)?;
    let icc_profile = decoder.icc_profile().ok().flatten();
    let image = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
    Ok((image, icc_profile))
}

/// Decode an AVIF file using avif-parse (container) + rav1d (AV1 decode).
///
/// The `image` crate's `"avif"` feature only provides the encoder (rav1e).
/// Decoding requires `"avif-native"` which depends on the C library dav1d.
/// Instead, we use `rav1d` (pure Rust port of dav1d) directly.
fn decode_avif(bytes: &[u8], limits: &PixelLimits) -> Result<DynamicImage, BackendError> {
    use rav1d::include::dav1d::data::Dav1dData;
    use rav1d::include::dav1d::dav1d::Dav1dSettings;
    use rav1d::include::dav1d::picture::Dav1dPicture;
    use std::ptr::NonNull;

    let avif = avif_parse::read_avif(&mut Cursor::new(bytes))
        .map_err(|e| BackendError::Decode(format!("Failed to parse AVIF: {e:?}")))?;
    let av1_bytes: &[u8] = &avif.primary_item;

    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    let settings_ptr = NonNull::new(settings.as_mut_ptr())
        .ok_or_else(|| BackendError::Decode("rav1d settings allocation failed".into()))?;
    unsafe { rav1d::src::lib::dav1d_default_settings(settings_ptr) };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;
    settings.frame_size_limit = u32::try_from(limits.max_pixels).unwrap_or(u32::MAX);

    let mut ctx = None;
    let rc =
        unsafe { rav1d::src::lib::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(BackendError::Decode(format!("rav1d open failed ({})", rc.0)));
    }

    let mut data = Dav1dData::default();
    let buf_ptr =
        unsafe { rav1d::src::lib::dav1d_data_create(NonNull::new(&mut data), av1_bytes.len()) };
    if buf_ptr.is_null() {
        unsafe { rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(BackendError::Decode("rav1d data_create failed".into()));
    }
    unsafe { std::ptr::copy_nonoverlapping(av1_bytes.as_ptr(), buf_ptr, av1_bytes.len()) };

    let rc = unsafe { rav1d::src::lib::dav1d_send_data(ctx, NonNull::new(&mut data)) };
    if rc.0 != 0 {
        unsafe {
            rav1d::src::lib::dav1d_data_unref(NonNull::new(&mut data));
            rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx));
        }
        return Err(BackendError::Decode(format!(
            "rav1d send_data failed ({})",
            rc.0
        )));
    }

    let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
    let rc = unsafe { rav1d::src::lib::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
    if rc.0 != 0 {
        unsafe { rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(BackendError::Decode(format!(
            "rav1d get_picture failed ({})",
            rc.0
        )));
    }

    // Convert before releasing the picture; the planes borrow its buffers.
    let converted = picture_to_rgb(&pic);
    unsafe {
        rav1d::src::lib::dav1d_picture_unref(NonNull::new(&mut pic));
        rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx));
    }
    let (w, h, rgb) = converted?;
    limits
        .check(w.into(), h.into(), 1)
        .map_err(oversize_source)?;

    image::RgbImage::from_raw(w, h, rgb)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| BackendError::Decode("Failed to create image from decoded AVIF data".into()))
}

fn picture_to_rgb(
    pic: &rav1d::include::dav1d::picture::Dav1dPicture,
) -> Result<(u32, u32, Vec<u8>), BackendError> {
    use rav1d::include::dav1d::headers::{
        DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
        DAV1D_PIXEL_LAYOUT_I444,
    };

    let missing_plane = || BackendError::Decode("AVIF picture is missing a plane".into());

    let w = pic.p.w as u32;
    let h = pic.p.h as u32;
    let bpc = pic.p.bpc as u32;
    let layout = pic.p.layout;
    let y_ptr = pic.data[0].ok_or_else(missing_plane)?.as_ptr() as *const u8;

    let planes = if layout == DAV1D_PIXEL_LAYOUT_I400 {
        YuvPlanes {
            y_ptr,
            u_ptr: y_ptr,
            v_ptr: y_ptr,
            y_stride: pic.stride[0],
            uv_stride: 0,
            width: w,
            height: h,
            bpc,
            ss_x: false,
            ss_y: false,
            monochrome: true,
        }
    } else {
        let (ss_x, ss_y) = match layout {
            DAV1D_PIXEL_LAYOUT_I420 => (true, true),
            DAV1D_PIXEL_LAYOUT_I422 => (true, false),
            DAV1D_PIXEL_LAYOUT_I444 => (false, false),
            _ => {
                return Err(BackendError::Decode(format!(
                    "Unsupported AVIF pixel layout: {layout}"
                )));
            }
        };
        YuvPlanes {
            y_ptr,
            u_ptr: pic.data[1].ok_or_else(missing_plane)?.as_ptr() as *const u8,
            v_ptr: pic.data[2].ok_or_else(missing_plane)?.as_ptr() as *const u8,
            y_stride: pic.stride[0],
            uv_stride: pic.stride[1],
            width: w,
            height: h,
            bpc,
            ss_x,
            ss_y,
            monochrome: false,
        }
    };

    Ok((w, h, planes.to_rgb()))
}

/// Decoded YUV plane data from rav1d, ready for RGB conversion.
struct YuvPlanes {
    y_ptr: *const u8,
    u_ptr: *const u8,
    v_ptr: *const u8,
    y_stride: isize,
    uv_stride: isize,
    width: u32,
    height: u32,
    bpc: u32,
    /// Chroma subsampling: horizontal, vertical (e.g. I420 = true, true)
    ss_x: bool,
    ss_y: bool,
    monochrome: bool,
}

impl YuvPlanes {
    /// Convert YUV planes to interleaved RGB8 using BT.601 coefficients.
    fn to_rgb(&self) -> Vec<u8> {
        let max_val = ((1u32 << self.bpc) - 1) as f32;
        let center = (1u32 << (self.bpc - 1)) as f32;
        let scale = 255.0 / max_val;

        let mut rgb = vec![0u8; (self.width * self.height * 3) as usize];

        for row in 0..self.height {
            for col in 0..self.width {
                let y_val = read_pixel(self.y_ptr, self.y_stride, col, row, self.bpc);

                let (r, g, b) = if self.monochrome {
                    let v = (y_val * scale).clamp(0.0, 255.0);
                    (v, v, v)
                } else {
                    let u_col = if self.ss_x { col / 2 } else { col };
                    let u_row = if self.ss_y { row / 2 } else { row };
                    let cb = read_pixel(self.u_ptr, self.uv_stride, u_col, u_row, self.bpc);
                    let cr = read_pixel(self.v_ptr, self.uv_stride, u_col, u_row, self.bpc);

                    let cb_f = cb - center;
                    let cr_f = cr - center;

                    (
                        ((y_val + 1.402 * cr_f) * scale).clamp(0.0, 255.0),
                        ((y_val - 0.344136 * cb_f - 0.714136 * cr_f) * scale).clamp(0.0, 255.0),
                        ((y_val + 1.772 * cb_f) * scale).clamp(0.0, 255.0),
                    )
                };

                let idx = ((row * self.width + col) * 3) as usize;
                rgb[idx] = r as u8;
                rgb[idx + 1] = g as u8;
                rgb[idx + 2] = b as u8;
            }
        }

        rgb
    }
}

/// Read a single pixel value from a YUV plane, handling both 8-bit and 16-bit storage.
#[inline]
fn read_pixel(ptr: *const u8, stride: isize, x: u32, y: u32, bpc: u32) -> f32 {
    if bpc <= 8 {
        (unsafe { *ptr.offset(y as isize * stride + x as isize) }) as f32
    } else {
        // 10-bit and 12-bit are stored as u16
        let byte_offset = y as isize * stride + x as isize * 2;
        (unsafe { *(ptr.offset(byte_offset) as *const u16) }) as f32
    }
}

/// Unsharp threshold on the 0-255 scale from the flat/jaggy boundary,
/// which is expressed on a 0-100 lightness scale.
fn unsharp_threshold(x1: f32) -> i32 {
    (x1 * 255.0 / 100.0).round() as i32
}

/// `m2` is always [`Sharpening::MULTIPLIER`] (1.0), the full-strength mask
/// that `unsharpen` already applies.
fn sharpen_page(image: DynamicImage, sharpening: Sharpening) -> DynamicImage {
    image.unsharpen(sharpening.sigma, unsharp_threshold(sharpening.x1))
}

/// Convert to a pixel layout every 8-bit encoder accepts.
fn to_8bit(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// PNG keeps 16-bit depth; only float images need converting.
fn to_png_layout(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb32F(_) => DynamicImage::ImageRgb16(image.to_rgb16()),
        DynamicImage::ImageRgba32F(_) => DynamicImage::ImageRgba16(image.to_rgba16()),
        other => other,
    }
}

fn write_with<E: ImageEncoder>(
    mut encoder: E,
    image: &DynamicImage,
    icc_profile: Option<Vec<u8>>,
    format: OutputFormat,
) -> Result<(), BackendError> {
    if let Some(icc) = icc_profile {
        if encoder.set_icc_profile(icc).is_err() {
            debug!(%format, "encoder cannot embed ICC profile, dropped");
        }
    }
    image
        .write_with_encoder(encoder)
        .map_err(|e| BackendError::ProcessingFailed(format!("{format} encode failed: {e}")))
}

/// NeuQuant speed for a GIF quality: 100 → 1 (best), 1 → 30 (fastest).
fn gif_speed(quality: Option<Quality>) -> i32 {
    match quality {
        Some(q) => 30 - ((q.value() as i32 - 1) * 29) / 99,
        None => DEFAULT_GIF_SPEED,
    }
}

fn encode_gif(image: RasterImage, quality: Option<Quality>) -> Result<Vec<u8>, BackendError> {
    let gif_error = |e: ImageError| BackendError::ProcessingFailed(format!("gif encode failed: {e}"));
    let animated = image.pages.len() > 1;
    let frames: Vec<Frame> = image
        .pages
        .into_par_iter()
        .map(|page| Frame::from_parts(page.image.to_rgba8(), 0, 0, page.delay))
        .collect();

    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut buf, gif_speed(quality));
        if animated {
            encoder.set_repeat(Repeat::Infinite).map_err(gif_error)?;
        }
        encoder.encode_frames(frames).map_err(gif_error)?;
    }
    Ok(buf)
}

/// Lossy WebP through libwebp. `image` only ships a lossless encoder.
fn encode_webp(image: &DynamicImage, quality: f32) -> Result<Vec<u8>, BackendError> {
    let encoder = webp::Encoder::from_image(image)
        .map_err(|e| BackendError::ProcessingFailed(format!("webp encode failed: {e}")))?;
    Ok(encoder.encode(quality).to_vec())
}

/// Encode the first frame with a single-image encoder.
fn encode_still(
    image: RasterImage,
    format: OutputFormat,
    quality: Option<Quality>,
) -> Result<Vec<u8>, BackendError> {
    let RasterImage {
        pages, icc_profile, ..
    } = image;
    let first = pages
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::ProcessingFailed("image has no frames".into()))?
        .image;

    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let q = quality.map_or(DEFAULT_JPEG_QUALITY, Quality::value) as u8;
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, q);
            let rgb = DynamicImage::ImageRgb8(first.to_rgb8());
            write_with(encoder, &rgb, icc_profile, format)?;
        }
        OutputFormat::Png => {
            let encoder = image::codecs::png::PngEncoder::new(&mut buf);
            write_with(encoder, &to_png_layout(first), icc_profile, format)?;
        }
        OutputFormat::Webp => {
            let q = quality.map_or(DEFAULT_WEBP_QUALITY, Quality::value) as f32;
            buf = encode_webp(&to_8bit(first), q)?;
            if icc_profile.is_some() {
                debug!(%format, "encoder cannot embed ICC profile, dropped");
            }
        }
        OutputFormat::Tiff => {
            let encoder = image::codecs::tiff::TiffEncoder::new(Cursor::new(&mut buf));
            write_with(encoder, &to_8bit(first), icc_profile, format)?;
        }
        OutputFormat::Avif => {
            let q = quality.map_or(DEFAULT_AVIF_QUALITY, Quality::value) as u8;
            let encoder =
                image::codecs::avif::AvifEncoder::new_with_speed_quality(&mut buf, AVIF_SPEED, q);
            write_with(encoder, &to_8bit(first), icc_profile, format)?;
        }
        OutputFormat::Heif | OutputFormat::Jp2k | OutputFormat::Gif | OutputFormat::Unspecified => {
            return Err(BackendError::Unsupported(format!(
                "no encoder available for {format}"
            )));
        }
    }
    Ok(buf)
}

impl ImageBackend for RustBackend {
    type Image = RasterImage;

    fn decode(&self, bytes: &[u8], source: SourceType) -> Result<RasterImage, BackendError> {
        match source {
            SourceType::Avif => Ok(RasterImage::still(
                decode_avif(bytes, &self.limits)?,
                source,
                None,
            )),
            SourceType::Heif | SourceType::Jp2k => Err(BackendError::Decode(format!(
                "no decoder available for {source:?}"
            ))),
            SourceType::Svg => Err(BackendError::Unsupported(
                "vector images are never rasterized".into(),
            )),
            _ => {
                let format = image_format(source).ok_or_else(|| {
                    BackendError::Decode(format!("no decoder available for {source:?}"))
                })?;
                let (image, icc_profile) = decode_raster(bytes, format, &self.limits)?;
                Ok(RasterImage::still(image, source, icc_profile))
            }
        }
    }

    fn decode_animated(&self, bytes: &[u8]) -> Result<RasterImage, BackendError> {
        let mut decoder = GifDecoder::new(Cursor::new(bytes)).map_err(decode_error)?;
        // The logical screen is what every frame is composited onto.
        let (width, height) = decoder.dimensions();
        self.limits
            .check(width.into(), height.into(), 1)
            .map_err(oversize_source)?;
        decoder
            .set_limits(decoder_limits(&self.limits))
            .map_err(decode_error)?;
        let icc_profile = decoder.icc_profile().ok().flatten();

        // Frames are cheap to declare, so count them as they arrive instead
        // of collecting first.
        let mut pages = Vec::new();
        for frame in decoder.into_frames() {
            let frame = frame.map_err(decode_error)?;
            self.limits
                .check(width.into(), height.into(), pages.len() as u64 + 1)
                .map_err(oversize_source)?;
            pages.push(Page {
                delay: frame.delay(),
                image: DynamicImage::ImageRgba8(frame.into_buffer()),
            });
        }
        if pages.is_empty() {
            return Err(BackendError::Decode("GIF has no frames".into()));
        }
        Ok(RasterImage {
            pages,
            source: SourceType::Gif,
            icc_profile,
        })
    }

    fn describe(&self, image: &RasterImage) -> ImageInfo {
        let (width, page_height, has_alpha) = image
            .first()
            .map(|p| (p.width(), p.height(), p.color().has_alpha()))
            .unwrap_or((0, 0, false));
        let pages = image.pages.len() as u32;
        ImageInfo {
            width,
            height: page_height * pages,
            page_height,
            pages,
            has_alpha,
            source: image.source,
        }
    }

    fn add_alpha(&self, image: RasterImage) -> Result<RasterImage, BackendError> {
        Ok(image.map_pages(|page| match page {
            DynamicImage::ImageRgba8(_) => page,
            other => DynamicImage::ImageRgba8(other.to_rgba8()),
        }))
    }

    fn rotate(&self, image: RasterImage, degrees: u32) -> Result<RasterImage, BackendError> {
        let theta = ((degrees % 360) as f32).to_radians();
        Ok(image.map_pages(|page| {
            DynamicImage::ImageRgba8(rotate_about_center(
                &page.to_rgba8(),
                theta,
                Interpolation::Bilinear,
                Rgba([0, 0, 0, 0]),
            ))
        }))
    }

    fn blur(&self, image: RasterImage, sigma: f64) -> Result<RasterImage, BackendError> {
        let sigma = sigma as f32;
        Ok(image.map_pages(|page| page.blur(sigma)))
    }

    fn resize(&self, image: RasterImage, scale: Scale) -> Result<RasterImage, BackendError> {
        let info = self.describe(&image);
        let (width, height) = resized_dimensions(&info, scale, &self.limits)
            .map_err(|e| BackendError::ProcessingFailed(format!("resize refused: {e}")))?;
        Ok(image.map_pages(|page| page.resize_exact(width, height, FilterType::Lanczos3)))
    }

    fn sharpen(
        &self,
        image: RasterImage,
        sharpening: Sharpening,
    ) -> Result<RasterImage, BackendError> {
        Ok(image.map_pages(|page| sharpen_page(page, sharpening)))
    }

    fn strip_metadata(&self, image: RasterImage) -> Result<RasterImage, BackendError> {
        Ok(RasterImage {
            icc_profile: None,
            ..image
        })
    }

    fn encode(
        &self,
        image: RasterImage,
        format: OutputFormat,
        quality: Option<Quality>,
    ) -> Result<Vec<u8>, BackendError> {
        match format {
            OutputFormat::Gif => encode_gif(image, quality),
            _ => encode_still(image, format, quality),
        }
    }
}
