//! Imaging service — data URLs, upload checks, and small raster helpers.
//!
//! Backends exchange images as base64 payloads, usually wrapped in a
//! `data:<mime>;base64,` URL. Decoding and resizing use the `image` crate
//! with only the png/jpeg/webp codecs enabled.

use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use rand::Rng;

pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const ALLOWED_UPLOAD_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];
pub const THUMBNAIL_JPEG_QUALITY: u8 = 80;
const SEED_CEILING: i64 = 1_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ImagingError {
    #[error("not a base64 data URL")]
    InvalidDataUrl,
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Unsupported file type: {0}. Please upload JPEG, PNG, or WebP images.")]
    UnsupportedType(String),
    #[error("File size too large: {size} bytes. Maximum size is 10MB.")]
    TooLarge { size: u64 },
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("image encode failed: {0}")]
    Encode(String),
}

impl crate::error::ErrorCode for ImagingError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidDataUrl => "E_INVALID_DATA_URL",
            Self::Base64(_) => "E_BASE64",
            Self::UnsupportedType(_) => "E_UNSUPPORTED_TYPE",
            Self::TooLarge { .. } => "E_TOO_LARGE",
            Self::Decode(_) => "E_IMAGE_DECODE",
            Self::Encode(_) => "E_IMAGE_ENCODE",
        }
    }
}

// =============================================================================
// DATA URLS
// =============================================================================

/// A decoded `data:<mime>;base64,<payload>` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    /// # Errors
    ///
    /// Returns an error if `raw` is not a base64 data URL or the payload
    /// does not decode.
    pub fn parse(raw: &str) -> Result<Self, ImagingError> {
        let rest = raw.strip_prefix("data:").ok_or(ImagingError::InvalidDataUrl)?;
        let (mime, payload) = rest.split_once(";base64,").ok_or(ImagingError::InvalidDataUrl)?;
        let bytes = STANDARD.decode(payload.trim())?;
        Ok(Self { mime: mime.to_string(), bytes })
    }

    #[must_use]
    pub fn encode(mime: &str, bytes: &[u8]) -> String {
        format!("data:{mime};base64,{}", STANDARD.encode(bytes))
    }

    #[must_use]
    pub fn to_url(&self) -> String {
        Self::encode(&self.mime, &self.bytes)
    }
}

/// Wrap a bare base64 PNG payload, as returned by SD WebUI, in a data URL.
#[must_use]
pub fn png_data_url(base64_payload: &str) -> String {
    format!("data:image/png;base64,{base64_payload}")
}

/// Strip a data URL down to its base64 payload. Bare payloads pass through.
#[must_use]
pub fn base64_payload(raw: &str) -> &str {
    raw.split_once(";base64,").map_or(raw, |(_, payload)| payload)
}

#[must_use]
pub fn is_valid_image_data_url(raw: &str) -> bool {
    raw.starts_with("data:image/") && raw.contains("base64,")
}

// =============================================================================
// UPLOADS & FORMATTING
// =============================================================================

/// # Errors
///
/// Rejects anything other than JPEG, PNG, or WebP, and files over 10 MiB.
pub fn validate_upload(mime: &str, size: u64) -> Result<(), ImagingError> {
    if !ALLOWED_UPLOAD_TYPES.contains(&mime) {
        return Err(ImagingError::UnsupportedType(mime.to_string()));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(ImagingError::TooLarge { size });
    }
    Ok(())
}

/// Human-readable size: `0 Bytes`, `1.5 KB`, `2 MB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

/// Reduced width:height ratio, e.g. `1920x1080` gives `16:9`.
#[must_use]
pub fn aspect_ratio(width: u32, height: u32) -> String {
    let divisor = gcd(width, height).max(1);
    format!("{}:{}", width / divisor, height / divisor)
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Uniform seed in `[0, 1e9)`.
#[must_use]
pub fn random_seed() -> i64 {
    rand::rng().random_range(0..SEED_CEILING)
}

// =============================================================================
// RASTER
// =============================================================================

fn decode(bytes: &[u8]) -> Result<DynamicImage, ImagingError> {
    image::load_from_memory(bytes).map_err(|e| ImagingError::Decode(e.to_string()))
}

/// Decode to 8-bit RGBA.
///
/// # Errors
///
/// Returns an error if the input does not decode.
pub fn decode_rgba(bytes: &[u8]) -> Result<image::RgbaImage, ImagingError> {
    decode(bytes).map(|img| img.to_rgba8())
}

/// Width and height without decoding pixel data.
///
/// # Errors
///
/// Returns an error if the format is unrecognized or the header is corrupt.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), ImagingError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImagingError::Decode(e.to_string()))?
        .into_dimensions()
        .map_err(|e| ImagingError::Decode(e.to_string()))
}

/// Cover-scale to exactly `width`x`height`, center-crop, encode as JPEG.
///
/// # Errors
///
/// Returns an error if the input does not decode or JPEG encoding fails.
pub fn create_thumbnail(bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ImagingError> {
    let thumb = decode(bytes)?.resize_to_fill(width.max(1), height.max(1), FilterType::Triangle);
    let rgb = thumb.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, THUMBNAIL_JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| ImagingError::Encode(e.to_string()))?;
    Ok(out)
}

/// Shrink so the long side is at most `max_side`, keeping aspect ratio.
/// Images already small enough are re-encoded unchanged. Output is PNG.
///
/// # Errors
///
/// Returns an error if the input does not decode or PNG encoding fails.
pub fn resize_to_fit(bytes: &[u8], max_side: u32) -> Result<Vec<u8>, ImagingError> {
    let img = decode(bytes)?;
    let max_side = max_side.max(1);
    let resized = if img.width() > max_side || img.height() > max_side {
        img.resize(max_side, max_side, FilterType::Lanczos3)
    } else {
        img
    };
    encode_png(&resized)
}

/// Re-encode into `format`. JPEG output drops the alpha channel.
///
/// # Errors
///
/// Returns an error if the input does not decode or the encoder fails.
pub fn transcode(bytes: &[u8], format: crate::model::ImageFormat) -> Result<Vec<u8>, ImagingError> {
    use crate::model::ImageFormat as Target;

    let img = decode(bytes)?;
    let (img, target) = match format {
        Target::Png => (img, ImageFormat::Png),
        Target::Jpg => (DynamicImage::ImageRgb8(img.to_rgb8()), ImageFormat::Jpeg),
        Target::Webp => (DynamicImage::ImageRgba8(img.to_rgba8()), ImageFormat::WebP),
    };
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), target)
        .map_err(|e| ImagingError::Encode(e.to_string()))?;
    Ok(out)
}

/// # Errors
///
/// Returns an error if PNG encoding fails.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ImagingError> {
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| ImagingError::Encode(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
#[path = "imaging_test.rs"]
mod tests;
