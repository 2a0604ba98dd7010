//! Stable Diffusion WebUI client (`/sdapi/v1/*`).
//!
//! These are the relay proxy's upstream calls. Generation requests carry
//! WebUI's own snake_case field names so the proxy can deserialize a caller's
//! body straight into them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{BackendError, ConnectionProbe, Endpoint, parse_error, read_json, request_error};
use crate::services::imaging::png_data_url;

pub const BACKEND: &str = "SD WebUI";
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(300);
pub const CONNECTION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SAMPLER: &str = "Euler a";
pub const DEFAULT_DENOISING_STRENGTH: f64 = 0.75;

const NO_IMAGES: &str = "No images generated";

fn default_steps() -> u32 {
    20
}
fn default_cfg_scale() -> f64 {
    7.0
}
fn default_size() -> u32 {
    512
}
fn default_seed() -> i64 {
    -1
}
fn default_sampler() -> String {
    DEFAULT_SAMPLER.to_string()
}
fn default_one() -> u32 {
    1
}
fn default_denoising() -> f64 {
    DEFAULT_DENOISING_STRENGTH
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Per-request checkpoint/VAE override. Empty fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sd_model_checkpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sd_vae: Option<String>,
}

impl OverrideSettings {
    /// Build from optional names, dropping blanks.
    #[must_use]
    pub fn new(checkpoint: Option<&str>, vae: Option<&str>) -> Self {
        let keep = |s: Option<&str>| s.filter(|v| !v.is_empty()).map(str::to_string);
        Self { sd_model_checkpoint: keep(checkpoint), sd_vae: keep(vae) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Txt2ImgRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f64,
    #[serde(default = "default_size")]
    pub width: u32,
    #[serde(default = "default_size")]
    pub height: u32,
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default = "default_sampler")]
    pub sampler_name: String,
    #[serde(default = "default_one")]
    pub batch_size: u32,
    #[serde(default = "default_one")]
    pub n_iter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_faces: Option<bool>,
    /// Hires.fix toggle, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_hr: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_settings: Option<OverrideSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alwayson_scripts: Option<Value>,
}

impl Txt2ImgRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            steps: default_steps(),
            cfg_scale: default_cfg_scale(),
            width: default_size(),
            height: default_size(),
            seed: default_seed(),
            sampler_name: default_sampler(),
            batch_size: 1,
            n_iter: 1,
            restore_faces: None,
            enable_hr: None,
            override_settings: None,
            alwayson_scripts: None,
        }
    }

    /// Attach ControlNet units under `alwayson_scripts.controlnet.args`.
    #[must_use]
    pub fn with_controlnet(mut self, units: Vec<Value>) -> Self {
        self.alwayson_scripts = Some(serde_json::json!({ "controlnet": { "args": units } }));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Img2ImgRequest {
    #[serde(default)]
    pub init_images: Vec<String>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f64,
    #[serde(default = "default_size")]
    pub width: u32,
    #[serde(default = "default_size")]
    pub height: u32,
    #[serde(default = "default_denoising")]
    pub denoising_strength: f64,
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default = "default_sampler")]
    pub sampler_name: String,
    /// Inpainting mask, white = repaint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
}

// =============================================================================
// RESPONSES
// =============================================================================

/// First image of a generation, as a PNG data URL, plus WebUI's metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub image: String,
    pub info: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Deserialize)]
struct RawGeneration {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    info: Value,
    #[serde(default)]
    parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdModel {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub filename: String,
}

#[derive(Deserialize)]
struct RawSampler {
    name: String,
}

/// Active checkpoint and VAE reported by `/sdapi/v1/options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub sd_model_checkpoint: String,
    pub sd_vae: String,
}

/// Parse a txt2img/img2img response body.
///
/// `info` is a JSON document encoded as a string; it is decoded when
/// possible and kept as a plain string otherwise.
///
/// # Errors
///
/// Returns an error if the body is not JSON or carries no images.
pub fn parse_generation(text: &str) -> Result<GenerationResult, BackendError> {
    let raw: RawGeneration = serde_json::from_str(text).map_err(|e| parse_error(BACKEND, e))?;
    let Some(first) = raw.images.into_iter().next() else {
        return Err(BackendError::Rejected(NO_IMAGES.to_string()));
    };
    let info = match raw.info {
        Value::String(s) if s.is_empty() => Value::Null,
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    };
    Ok(GenerationResult { image: png_data_url(&first), info, parameters: raw.parameters })
}

/// # Errors
///
/// Returns an error if the body is not a JSON array of models.
pub fn parse_models(text: &str) -> Result<Vec<SdModel>, BackendError> {
    serde_json::from_str(text).map_err(|e| parse_error(BACKEND, e))
}

/// # Errors
///
/// Returns an error if the body is not a JSON array of samplers.
pub fn parse_samplers(text: &str) -> Result<Vec<String>, BackendError> {
    let raw: Vec<RawSampler> = serde_json::from_str(text).map_err(|e| parse_error(BACKEND, e))?;
    Ok(raw.into_iter().map(|s| s.name).collect())
}

/// Pull the active checkpoint and VAE out of an options document.
#[must_use]
pub fn parse_connection_info(options: &Value) -> ConnectionInfo {
    let field = |key: &str, fallback: &str| {
        options
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    };
    ConnectionInfo { sd_model_checkpoint: field("sd_model_checkpoint", "Unknown"), sd_vae: field("sd_vae", "Automatic") }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct SdWebUiClient {
    http: reqwest::Client,
    endpoint: Endpoint,
}

impl SdWebUiClient {
    /// # Errors
    ///
    /// Returns [`BackendError::NotConfigured`] when `base_url` is blank.
    pub fn new(http: reqwest::Client, base_url: &str, auth_token: Option<&str>) -> Result<Self, BackendError> {
        Ok(Self { http, endpoint: Endpoint::new(BACKEND, base_url, auth_token)? })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.endpoint.base_url()
    }

    /// # Errors
    ///
    /// Returns an error on transport failure, a non-2xx status, or an empty result.
    pub async fn txt2img(&self, request: &Txt2ImgRequest) -> Result<GenerationResult, BackendError> {
        info!(
            endpoint = self.endpoint.base_url(),
            prompt = %truncate(&request.prompt, 100),
            steps = request.steps,
            "sd txt2img"
        );
        self.generate("/sdapi/v1/txt2img", request).await
    }

    /// # Errors
    ///
    /// Returns an error on transport failure, a non-2xx status, or an empty result.
    pub async fn img2img(&self, request: &Img2ImgRequest) -> Result<GenerationResult, BackendError> {
        info!(
            endpoint = self.endpoint.base_url(),
            init_images = request.init_images.len(),
            masked = request.mask.is_some(),
            "sd img2img"
        );
        self.generate("/sdapi/v1/img2img", request).await
    }

    async fn generate(&self, path: &str, body: &impl Serialize) -> Result<GenerationResult, BackendError> {
        let response = self
            .endpoint
            .authorize(self.http.post(self.endpoint.url(path)))
            .timeout(GENERATION_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(BACKEND, &e))?;
        let text = super::read_text(BACKEND, response).await?;
        parse_generation(&text)
    }

    /// # Errors
    ///
    /// Returns an error on transport failure, a non-2xx status, or a malformed list.
    pub async fn models(&self) -> Result<Vec<SdModel>, BackendError> {
        let text = self.endpoint.get_text(&self.http, "/sdapi/v1/sd-models").await?;
        parse_models(&text)
    }

    /// # Errors
    ///
    /// Returns an error on transport failure, a non-2xx status, or a malformed list.
    pub async fn samplers(&self) -> Result<Vec<String>, BackendError> {
        let text = self.endpoint.get_text(&self.http, "/sdapi/v1/samplers").await?;
        parse_samplers(&text)
    }

    /// Fetch `/sdapi/v1/options` with a short deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the WebUI is unreachable or answers non-2xx.
    pub async fn check_connection(&self) -> Result<ConnectionInfo, BackendError> {
        let response = self
            .endpoint
            .authorize(self.http.get(self.endpoint.url("/sdapi/v1/options")))
            .timeout(CONNECTION_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| request_error(BACKEND, &e))?;
        let options: Value = read_json(BACKEND, response).await?;
        Ok(parse_connection_info(&options))
    }
}

#[async_trait::async_trait]
impl ConnectionProbe for SdWebUiClient {
    fn name(&self) -> &'static str {
        "sdwebui"
    }

    async fn check(&self) -> Result<(), BackendError> {
        self.check_connection().await.map(|_| ())
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    s.char_indices().nth(max_chars).map_or(s, |(i, _)| &s[..i])
}

#[cfg(test)]
#[path = "sdwebui_test.rs"]
mod tests;
