//! Image renditions: decode, resize and re-encode a source image.
//!
//! Everything here is pure. The same source bytes and spec always produce the
//! same output bytes, which is what makes redelivered messages idempotent.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{
    ColorType, DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageError,
    ImageFormat, ImageReader, Limits,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::outcome::FailureKind;

/// Largest edge the JPEG and TIFF encoders accept.
pub const MAX_TARGET_DIMENSION: u32 = 65_535;
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
    #[serde(alias = "tif")]
    Tiff,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Tiff => "tiff",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Tiff => "image/tiff",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Tiff => ImageFormat::Tiff,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Largest size that fits inside the requested box, aspect preserved.
    #[default]
    Contain,
    /// Exactly the requested box, aspect ignored.
    Exact,
    /// Fill the requested box, then center-crop the overflow.
    Cover,
}

impl FitMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contain => "contain",
            Self::Exact => "exact",
            Self::Cover => "cover",
        }
    }
}

/// Desired image derivative. Dimensions stay signed so that out-of-range
/// values reach [`render`] and are rejected there as unprocessable input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ImageSpec {
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(default)]
    pub fit: FitMode,
}

impl ImageSpec {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            width: None,
            height: None,
            scale: None,
            quality: None,
            fit: FitMode::Contain,
        }
    }

    pub fn with_width(mut self, width: i64) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_height(mut self, height: i64) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_fit(mut self, fit: FitMode) -> Self {
        self.fit = fit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSettings {
    pub default_jpeg_quality: u8,
    /// Upper bound on decoder allocations; `None` keeps the codec default.
    pub max_alloc_bytes: Option<u64>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            default_jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_alloc_bytes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("invalid rendition spec: {0}")]
    InvalidSpec(String),
    #[error("malformed image data: {0}")]
    Malformed(String),
    #[error("unsupported image: {0}")]
    Unsupported(String),
    #[error("failed to encode {format}: {reason}")]
    Encode { format: &'static str, reason: String },
    #[error("image exceeds decoder limits: {0}")]
    ResourceExhausted(String),
}

impl RenderError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ResourceExhausted(_) => FailureKind::ResourceExhausted,
            _ => FailureKind::UnprocessableInput,
        }
    }

    pub(crate) fn from_image_error(error: ImageError) -> Self {
        match error {
            ImageError::Limits(limit) => Self::ResourceExhausted(limit.to_string()),
            ImageError::Unsupported(unsupported) => Self::Unsupported(unsupported.to_string()),
            other => Self::Malformed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestedSize {
    Original,
    Scale(f64),
    Width(u32),
    Height(u32),
    Box { width: u32, height: u32 },
}

pub fn render(
    source: &[u8],
    spec: &ImageSpec,
    settings: &RenderSettings,
) -> Result<Rendition, RenderError> {
    let quality = resolve_quality(spec.quality, settings.default_jpeg_quality)?;
    let requested = requested_size(spec)?;
    let image = decode_image(source, settings.max_alloc_bytes)?;

    let (source_width, source_height) = image.dimensions();
    let (width, height) = target_dimensions(source_width, source_height, requested, spec.fit);
    check_resize_budget(
        (source_width, source_height),
        (width, height),
        requested,
        spec.fit,
        image.color().bytes_per_pixel(),
        settings.max_alloc_bytes,
    )?;
    tracing::debug!(
        source_width,
        source_height,
        width,
        height,
        format = spec.format.extension(),
        "rendering image derivative"
    );

    let resized = resize(image, width, height, requested, spec.fit);
    let bytes = encode(&resized, spec.format, quality)?;

    Ok(Rendition {
        bytes,
        width: resized.width(),
        height: resized.height(),
        format: spec.format,
    })
}

pub fn requested_size(spec: &ImageSpec) -> Result<RequestedSize, RenderError> {
    let width = spec
        .width
        .map(|value| positive_dimension("width", value))
        .transpose()?;
    let height = spec
        .height
        .map(|value| positive_dimension("height", value))
        .transpose()?;

    if let Some(scale) = spec.scale {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(RenderError::InvalidSpec(format!(
                "scale must be a positive number, got {scale}"
            )));
        }
    }

    match (width, height, spec.scale) {
        (None, None, None) => Ok(RequestedSize::Original),
        (None, None, Some(scale)) => Ok(RequestedSize::Scale(scale)),
        (Some(width), None, None) => Ok(RequestedSize::Width(width)),
        (None, Some(height), None) => Ok(RequestedSize::Height(height)),
        (Some(width), Some(height), None) => Ok(RequestedSize::Box { width, height }),
        _ => Err(RenderError::InvalidSpec(
            "scale cannot be combined with width or height".to_string(),
        )),
    }
}

fn positive_dimension(name: &str, value: i64) -> Result<u32, RenderError> {
    if value <= 0 {
        return Err(RenderError::InvalidSpec(format!(
            "{name} must be positive, got {value}"
        )));
    }
    match u32::try_from(value) {
        Ok(value) if value <= MAX_TARGET_DIMENSION => Ok(value),
        _ => Err(RenderError::InvalidSpec(format!(
            "{name} exceeds MAX_TARGET_DIMENSION={MAX_TARGET_DIMENSION}"
        ))),
    }
}

fn resolve_quality(requested: Option<u8>, default_quality: u8) -> Result<u8, RenderError> {
    let quality = requested.unwrap_or(default_quality);
    if !(1..=100).contains(&quality) {
        return Err(RenderError::InvalidSpec(format!(
            "quality must be within 1..=100, got {quality}"
        )));
    }
    Ok(quality)
}

/// Output size for a source of `source_width` x `source_height`.
pub fn target_dimensions(
    source_width: u32,
    source_height: u32,
    requested: RequestedSize,
    fit: FitMode,
) -> (u32, u32) {
    match requested {
        RequestedSize::Original => (source_width, source_height),
        // Thumbnail semantics: scaling never enlarges the source.
        RequestedSize::Scale(scale) if scale >= 1.0 => (source_width, source_height),
        RequestedSize::Scale(scale) => (
            scaled(source_width, scale),
            scaled(source_height, scale),
        ),
        RequestedSize::Width(width) => (
            width,
            proportional(source_height, width, source_width),
        ),
        RequestedSize::Height(height) => (
            proportional(source_width, height, source_height),
            height,
        ),
        RequestedSize::Box { width, height } => match fit {
            FitMode::Exact | FitMode::Cover => (width, height),
            FitMode::Contain => {
                let width_bound = u64::from(width) * u64::from(source_height)
                    <= u64::from(height) * u64::from(source_width);
                if width_bound {
                    (width, proportional(source_height, width, source_width))
                } else {
                    (proportional(source_width, height, source_height), height)
                }
            }
        },
    }
}

/// Bytes per pixel of the `f32` RGBA buffer the resize filters sample into.
const RESIZE_SAMPLE_BYTES: u64 = 16;

/// Rejects targets whose edges or resize buffers are larger than the encoders
/// and the allocation budget allow, before anything is allocated.
fn check_resize_budget(
    source: (u32, u32),
    target: (u32, u32),
    requested: RequestedSize,
    fit: FitMode,
    bytes_per_pixel: u8,
    max_alloc_bytes: Option<u64>,
) -> Result<(), RenderError> {
    if target.0 > MAX_TARGET_DIMENSION || target.1 > MAX_TARGET_DIMENSION {
        return Err(RenderError::InvalidSpec(format!(
            "{}x{} target exceeds MAX_TARGET_DIMENSION={MAX_TARGET_DIMENSION}",
            target.0, target.1
        )));
    }
    if source == target {
        return Ok(());
    }

    let working = match (requested, fit) {
        (RequestedSize::Box { .. }, FitMode::Cover) => cover_fill(source, target),
        _ => target,
    };
    if working.0 > MAX_TARGET_DIMENSION || working.1 > MAX_TARGET_DIMENSION {
        return Err(RenderError::InvalidSpec(format!(
            "{}x{} fill for a {}x{} cover exceeds MAX_TARGET_DIMENSION={MAX_TARGET_DIMENSION}",
            working.0, working.1, target.0, target.1
        )));
    }

    let Some(limit) = max_alloc_bytes else {
        return Ok(());
    };
    let sampled = u64::from(source.0) * u64::from(working.1) * RESIZE_SAMPLE_BYTES;
    let output = u64::from(working.0) * u64::from(working.1) * u64::from(bytes_per_pixel);
    let needed = sampled.saturating_add(output);
    if needed > limit {
        return Err(RenderError::ResourceExhausted(format!(
            "resizing {}x{} to {}x{} needs about {needed} bytes, limit is {limit}",
            source.0, source.1, working.0, working.1
        )));
    }
    Ok(())
}

/// Size a `cover` resize scales to before cropping.
fn cover_fill(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (source_width, source_height) = source;
    let (width, height) = target;
    if u64::from(width) * u64::from(source_height) >= u64::from(height) * u64::from(source_width) {
        (width, proportional(source_height, width, source_width))
    } else {
        (proportional(source_width, height, source_height), height)
    }
}

fn scaled(dimension: u32, scale: f64) -> u32 {
    ((f64::from(dimension) * scale).round() as u32).max(1)
}

fn proportional(dimension: u32, numerator: u32, denominator: u32) -> u32 {
    let value = f64::from(dimension) * f64::from(numerator) / f64::from(denominator.max(1));
    (value.round() as u32).max(1)
}

fn resize(
    image: DynamicImage,
    width: u32,
    height: u32,
    requested: RequestedSize,
    fit: FitMode,
) -> DynamicImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    match (requested, fit) {
        (RequestedSize::Box { .. }, FitMode::Cover) => {
            image.resize_to_fill(width, height, RESIZE_FILTER)
        }
        _ => image.resize_exact(width, height, RESIZE_FILTER),
    }
}

pub(crate) fn decode_image(
    bytes: &[u8],
    max_alloc_bytes: Option<u64>,
) -> Result<DynamicImage, RenderError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|error| RenderError::Malformed(error.to_string()))?;
    if reader.format().is_none() {
        return Err(RenderError::Malformed(
            "unrecognized image format".to_string(),
        ));
    }

    let mut limits = Limits::default();
    if max_alloc_bytes.is_some() {
        limits.max_alloc = max_alloc_bytes;
    }
    reader.limits(limits);

    reader.decode().map_err(RenderError::from_image_error)
}

fn encode(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>, RenderError> {
    if format == OutputFormat::Jpeg {
        return encode_jpeg(image, quality).map(|encoded| encoded.bytes);
    }

    let encodable = encodable_for(image, format);
    let mut bytes = Vec::new();
    encodable
        .write_to(&mut Cursor::new(&mut bytes), format.image_format())
        .map_err(|error| RenderError::Encode {
            format: format.extension(),
            reason: error.to_string(),
        })?;
    Ok(bytes)
}

/// Converts pixel layouts the PNG/TIFF encoders reject into ones they accept.
fn encodable_for(image: &DynamicImage, format: OutputFormat) -> std::borrow::Cow<'_, DynamicImage> {
    use std::borrow::Cow;

    match (format, image.color()) {
        (_, ColorType::Rgb32F | ColorType::Rgba32F) => {
            Cow::Owned(DynamicImage::ImageRgba16(image.to_rgba16()))
        }
        (OutputFormat::Tiff, ColorType::La8) => Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8())),
        (OutputFormat::Tiff, ColorType::La16) => {
            Cow::Owned(DynamicImage::ImageRgba16(image.to_rgba16()))
        }
        _ => Cow::Borrowed(image),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JpegColor {
    Gray,
    Rgb,
}

pub(crate) struct EncodedJpeg {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub color: JpegColor,
}

/// Baseline JPEG; alpha is dropped and grayscale sources stay single channel.
pub(crate) fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<EncodedJpeg, RenderError> {
    let (width, height) = image.dimensions();
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);

    let (result, color) = if image.color().has_color() {
        let rgb = image.to_rgb8();
        (
            encoder.write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8),
            JpegColor::Rgb,
        )
    } else {
        let luma = image.to_luma8();
        (
            encoder.write_image(luma.as_raw(), width, height, ExtendedColorType::L8),
            JpegColor::Gray,
        )
    };
    result.map_err(|error| RenderError::Encode {
        format: "jpeg",
        reason: error.to_string(),
    })?;

    Ok(EncodedJpeg {
        bytes,
        width,
        height,
        color,
    })
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    fn encoded(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), format)
            .expect("fixture should encode");
        bytes
    }

    fn decoded(bytes: &[u8]) -> DynamicImage {
        image::load_from_memory(bytes).expect("output should decode")
    }

    #[test]
    fn width_only_keeps_aspect_ratio() {
        let source = encoded(DynamicImage::ImageRgb8(gradient(1600, 1200)), ImageFormat::Tiff);
        let spec = ImageSpec::new(OutputFormat::Jpeg).with_width(800);

        let rendition = render(&source, &spec, &RenderSettings::default())
            .expect("render should succeed");

        assert_eq!((rendition.width, rendition.height), (800, 600));
        assert_eq!(
            image::guess_format(&rendition.bytes).expect("format should be detected"),
            ImageFormat::Jpeg
        );
        assert_eq!(decoded(&rendition.bytes).dimensions(), (800, 600));
    }

    #[test]
    fn rejects_derived_edges_beyond_the_encoder_limit() {
        assert_eq!(
            target_dimensions(1, 20_000, RequestedSize::Width(65_535), FitMode::Contain),
            (65_535, 1_310_700_000)
        );

        let thin = GrayImage::from_pixel(1, 20_000, Luma([128]));
        let source = encoded(DynamicImage::ImageLuma8(thin), ImageFormat::Png);
        let spec = ImageSpec::new(OutputFormat::Jpeg).with_width(65_535);
        let settings = RenderSettings {
            max_alloc_bytes: Some(1 << 30),
            ..RenderSettings::default()
        };

        let error = render(&source, &spec, &settings).expect_err("oversized target");
        assert!(matches!(error, RenderError::InvalidSpec(_)), "{error:?}");
        assert_eq!(error.failure_kind(), FailureKind::UnprocessableInput);
    }

    #[test]
    fn resize_buffers_over_the_allocation_limit_are_resource_exhaustion() {
        let source = encoded(DynamicImage::ImageRgb8(gradient(64, 64)), ImageFormat::Png);
        let spec = ImageSpec::new(OutputFormat::Png).with_width(4_000);
        let settings = RenderSettings {
            max_alloc_bytes: Some(8 << 20),
            ..RenderSettings::default()
        };

        let error = render(&source, &spec, &settings).expect_err("resize over budget");
        assert!(matches!(error, RenderError::ResourceExhausted(_)), "{error:?}");
        assert_eq!(error.failure_kind(), FailureKind::ResourceExhausted);
    }

    #[test]
    fn cover_fill_beyond_the_encoder_limit_is_rejected() {
        let source = encoded(DynamicImage::ImageRgb8(gradient(2, 400)), ImageFormat::Png);
        let spec = ImageSpec::new(OutputFormat::Png)
            .with_width(60_000)
            .with_height(10)
            .with_fit(FitMode::Cover);

        let error = render(&source, &spec, &RenderSettings::default()).expect_err("huge fill");
        assert!(matches!(error, RenderError::InvalidSpec(_)), "{error:?}");
    }

    #[test]
    fn width_request_enlarges_small_sources() {
        let source = encoded(DynamicImage::ImageRgb8(gradient(400, 100)), ImageFormat::Png);
        let spec = ImageSpec::new(OutputFormat::Png).with_width(800);

        let rendition = render(&source, &spec, &RenderSettings::default())
            .expect("render should succeed");

        assert_eq!((rendition.width, rendition.height), (800, 200));
        assert_eq!(
            image::guess_format(&rendition.bytes).expect("format should be detected"),
            ImageFormat::Png
        );
    }

    #[test]
    fn contain_box_fits_the_tighter_edge() {
        assert_eq!(
            target_dimensions(
                1000,
                500,
                RequestedSize::Box {
                    width: 400,
                    height: 400
                },
                FitMode::Contain
            ),
            (400, 200)
        );
        assert_eq!(
            target_dimensions(
                500,
                1000,
                RequestedSize::Box {
                    width: 400,
                    height: 400
                },
                FitMode::Contain
            ),
            (200, 400)
        );
    }

    #[test]
    fn cover_box_fills_and_crops() {
        let source = encoded(DynamicImage::ImageRgb8(gradient(300, 100)), ImageFormat::Png);
        let spec = ImageSpec::new(OutputFormat::Png)
            .with_width(50)
            .with_height(50)
            .with_fit(FitMode::Cover);

        let rendition = render(&source, &spec, &RenderSettings::default())
            .expect("render should succeed");

        assert_eq!((rendition.width, rendition.height), (50, 50));
    }

    #[test]
    fn scale_never_enlarges() {
        assert_eq!(
            target_dimensions(1000, 800, RequestedSize::Scale(0.4), FitMode::Contain),
            (400, 320)
        );
        assert_eq!(
            target_dimensions(1000, 800, RequestedSize::Scale(2.5), FitMode::Contain),
            (1000, 800)
        );
    }

    #[test]
    fn tiny_results_are_clamped_to_one_pixel() {
        assert_eq!(
            target_dimensions(1000, 2, RequestedSize::Width(10), FitMode::Contain),
            (10, 1)
        );
    }

    #[test]
    fn rejects_zero_and_negative_dimensions() {
        let source = encoded(DynamicImage::ImageRgb8(gradient(10, 10)), ImageFormat::Png);

        for spec in [
            ImageSpec::new(OutputFormat::Jpeg).with_width(0),
            ImageSpec::new(OutputFormat::Jpeg).with_height(-20),
            ImageSpec::new(OutputFormat::Jpeg).with_scale(0.0),
            ImageSpec::new(OutputFormat::Jpeg).with_width(70_000),
        ] {
            let error = render(&source, &spec, &RenderSettings::default())
                .expect_err("invalid dimensions should fail");
            assert!(matches!(error, RenderError::InvalidSpec(_)));
            assert_eq!(error.failure_kind(), FailureKind::UnprocessableInput);
        }
    }

    #[test]
    fn rejects_quality_out_of_range() {
        let source = encoded(DynamicImage::ImageRgb8(gradient(10, 10)), ImageFormat::Png);
        let spec = ImageSpec::new(OutputFormat::Jpeg).with_quality(0);

        let error = render(&source, &spec, &RenderSettings::default())
            .expect_err("quality 0 should fail");
        assert!(matches!(error, RenderError::InvalidSpec(_)));
    }

    #[test]
    fn rejects_malformed_image_bytes() {
        let spec = ImageSpec::new(OutputFormat::Jpeg).with_width(100);

        let error = render(b"definitely not an image", &spec, &RenderSettings::default())
            .expect_err("garbage should fail");
        assert_eq!(error.failure_kind(), FailureKind::UnprocessableInput);

        let mut truncated = encoded(DynamicImage::ImageRgb8(gradient(64, 64)), ImageFormat::Png);
        truncated.truncate(truncated.len() / 2);
        let error = render(&truncated, &spec, &RenderSettings::default())
            .expect_err("truncated png should fail");
        assert_eq!(error.failure_kind(), FailureKind::UnprocessableInput);
    }

    #[test]
    fn decoder_limits_map_to_resource_exhaustion() {
        let source = encoded(DynamicImage::ImageRgb8(gradient(256, 256)), ImageFormat::Png);
        let settings = RenderSettings {
            max_alloc_bytes: Some(1024),
            ..RenderSettings::default()
        };

        let error = render(&source, &ImageSpec::new(OutputFormat::Jpeg), &settings)
            .expect_err("allocation limit should trip");
        assert_eq!(error.failure_kind(), FailureKind::ResourceExhausted);
    }

    #[test]
    fn rendering_is_deterministic() {
        let source = encoded(DynamicImage::ImageRgb8(gradient(640, 480)), ImageFormat::Png);
        let spec = ImageSpec::new(OutputFormat::Jpeg)
            .with_width(320)
            .with_quality(80);

        let first = render(&source, &spec, &RenderSettings::default()).expect("first render");
        let second = render(&source, &spec, &RenderSettings::default()).expect("second render");

        assert_eq!(first, second);
    }

    #[test]
    fn grayscale_sources_stay_single_channel_in_jpeg() {
        let gray = GrayImage::from_fn(32, 16, |x, _| Luma([(x * 8) as u8]));
        let encoded_jpeg =
            encode_jpeg(&DynamicImage::ImageLuma8(gray), 90).expect("jpeg should encode");

        assert_eq!(encoded_jpeg.color, JpegColor::Gray);
        assert_eq!(decoded(&encoded_jpeg.bytes).color(), ColorType::L8);
    }

    #[test]
    fn spec_accepts_format_aliases() {
        let spec: ImageSpec = serde_json::from_str(r#"{"format":"jpg","width":10}"#)
            .expect("alias should parse");
        assert_eq!(spec.format, OutputFormat::Jpeg);
        assert_eq!(spec.fit, FitMode::Contain);

        let spec: ImageSpec =
            serde_json::from_str(r#"{"format":"tif"}"#).expect("alias should parse");
        assert_eq!(spec.format, OutputFormat::Tiff);
    }
}
