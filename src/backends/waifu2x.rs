//! Waifu2x upscaler client.

use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{BackendError, ConnectionProbe, Endpoint};
use crate::model::ImageFormat;
use crate::services::imaging::{DataUrl, encode_png};

pub const BACKEND: &str = "Waifu2x";
pub const ALLOWED_SCALES: [u8; 3] = [2, 4, 8];
pub const MAX_DENOISE: u8 = 3;

fn default_scale() -> u8 {
    2
}
fn default_denoise() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpscaleRequest {
    /// Source image as a data URL.
    pub image: String,
    #[serde(default = "default_scale")]
    pub scale: u8,
    #[serde(default = "default_denoise")]
    pub denoise: u8,
    #[serde(default)]
    pub format: ImageFormat,
}

impl UpscaleRequest {
    /// # Errors
    ///
    /// Rejects scales outside {2, 4, 8} and denoise levels above 3.
    pub fn validate(&self) -> Result<(), BackendError> {
        if !ALLOWED_SCALES.contains(&self.scale) {
            return Err(BackendError::InvalidRequest(format!("scale must be 2, 4 or 8 (got {})", self.scale)));
        }
        if self.denoise > MAX_DENOISE {
            return Err(BackendError::InvalidRequest(format!("denoise must be 0-3 (got {})", self.denoise)));
        }
        if self.image.trim().is_empty() {
            return Err(BackendError::InvalidRequest("Image is required".into()));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    image: &'a str,
    scale: u8,
    noise_level: u8,
    format: ImageFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleResult {
    pub upscaled_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<Size>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upscaled_size: Option<Size>,
    #[serde(default)]
    pub processing_time: u64,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    success: bool,
    data: Option<UpscaleResult>,
    error: Option<String>,
}

/// Unwrap the `{success, data, error}` envelope.
///
/// # Errors
///
/// Returns a rejection when `success` is false or `data` is missing.
pub fn parse_response(text: &str) -> Result<UpscaleResult, BackendError> {
    let wire: WireResponse = serde_json::from_str(text).map_err(|e| super::parse_error(BACKEND, e))?;
    match (wire.success, wire.data) {
        (true, Some(data)) => Ok(data),
        _ => Err(BackendError::Rejected(wire.error.unwrap_or_else(|| "Image upscaling failed".into()))),
    }
}

pub struct Waifu2xClient {
    http: reqwest::Client,
    endpoint: Endpoint,
}

impl Waifu2xClient {
    /// # Errors
    ///
    /// Returns [`BackendError::NotConfigured`] when `base_url` is blank.
    pub fn new(http: reqwest::Client, base_url: &str, auth_token: Option<&str>) -> Result<Self, BackendError> {
        Ok(Self { http, endpoint: Endpoint::new(BACKEND, base_url, auth_token)? })
    }

    /// # Errors
    ///
    /// Returns an error if validation fails or the upscaler reports failure.
    pub async fn upscale(&self, request: &UpscaleRequest) -> Result<UpscaleResult, BackendError> {
        request.validate()?;
        info!(scale = request.scale, denoise = request.denoise, "waifu2x upscale");
        let wire = WireRequest {
            image: &request.image,
            scale: request.scale,
            noise_level: request.denoise,
            format: request.format,
        };
        let response = self
            .endpoint
            .authorize(self.http.post(self.endpoint.url("/upscale")))
            .json(&wire)
            .send()
            .await
            .map_err(|e| super::request_error(BACKEND, &e))?;
        let text = super::read_text(BACKEND, response).await?;
        parse_response(&text)
    }

    /// Upscale one image at a time. `on_progress` receives the completed
    /// percentage and the index just finished. A failure does not stop the
    /// batch; each slot holds its own result.
    pub async fn batch_upscale<F>(&self, requests: &[UpscaleRequest], mut on_progress: F) -> Vec<Result<UpscaleResult, BackendError>>
    where
        F: FnMut(f64, usize) + Send,
    {
        let mut results = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            results.push(self.upscale(request).await);
            on_progress(batch_progress(index, requests.len()), index);
        }
        results
    }
}

/// `(index + 1) / total * 100`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn batch_progress(index: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (index + 1) as f64 / total as f64 * 100.0
}

/// Tiny solid PNG used to exercise the upscaler without user data.
fn probe_image() -> Result<String, BackendError> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([120, 160, 200])));
    let png = encode_png(&img).map_err(|e| BackendError::InvalidRequest(e.to_string()))?;
    Ok(DataUrl::encode("image/png", &png))
}

#[async_trait::async_trait]
impl ConnectionProbe for Waifu2xClient {
    fn name(&self) -> &'static str {
        "waifu2x"
    }

    async fn check(&self) -> Result<(), BackendError> {
        let request = UpscaleRequest { image: probe_image()?, scale: 2, denoise: 1, format: ImageFormat::Png };
        self.upscale(&request).await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "waifu2x_test.rs"]
mod tests;
