//! Client for the Flask API server that runs next to SD WebUI inside a
//! Colab notebook.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::info;

use super::{BackendError, ConnectionProbe, Endpoint};

pub const BACKEND: &str = "Google Colab";

/// Optional ControlNet conditioning images, one per reference category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlReferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColabGenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f64,
    #[serde(default)]
    pub seed: Option<i64>,
    pub model: String,
    #[serde(default)]
    pub references: Option<ControlReferences>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColabInpaintRequest {
    pub image: String,
    pub mask: String,
    pub prompt: String,
    pub denoising_strength: f64,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f64,
}

/// Diffusers-style field names expected by `/generate`.
#[must_use]
pub fn generate_payload(request: &ColabGenerateRequest) -> Value {
    json!({
        "prompt": request.prompt,
        "negative_prompt": request.negative_prompt,
        "width": request.width,
        "height": request.height,
        "num_inference_steps": request.steps,
        "guidance_scale": request.cfg_scale,
        "seed": request.seed,
        "model": request.model,
        "controlnet_images": request.references,
    })
}

#[must_use]
pub fn inpaint_payload(request: &ColabInpaintRequest) -> Value {
    json!({
        "image": request.image,
        "mask": request.mask,
        "prompt": request.prompt,
        "strength": request.denoising_strength,
        "width": request.width,
        "height": request.height,
        "num_inference_steps": request.steps,
        "guidance_scale": request.cfg_scale,
    })
}

/// `{success, error, progress, ...}`. Whatever else the server sends is kept
/// in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColabResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ColabResponse {
    /// The result image, whether the server put it at the top level or
    /// under `data`.
    #[must_use]
    pub fn image(&self) -> Option<&str> {
        if let Some(image) = self.payload.get("image").and_then(Value::as_str) {
            return Some(image);
        }
        match self.payload.get("data")? {
            Value::String(s) => Some(s),
            data => data.get("image").and_then(Value::as_str),
        }
    }
}

/// Model titles from a `/models` body (`models` or `data.models`).
#[must_use]
pub fn parse_models(body: &Value) -> Vec<String> {
    body.get("models")
        .or_else(|| body.get("data").and_then(|d| d.get("models")))
        .and_then(Value::as_array)
        .map(|models| models.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

pub struct ColabClient {
    http: reqwest::Client,
    endpoint: Endpoint,
}

impl ColabClient {
    /// # Errors
    ///
    /// Returns [`BackendError::NotConfigured`] when `base_url` is blank.
    pub fn new(http: reqwest::Client, base_url: &str, auth_token: Option<&str>) -> Result<Self, BackendError> {
        Ok(Self { http, endpoint: Endpoint::new(BACKEND, base_url, auth_token)? })
    }

    /// # Errors
    ///
    /// Returns an error if the prompt is blank or the server reports failure.
    pub async fn generate(&self, request: &ColabGenerateRequest) -> Result<ColabResponse, BackendError> {
        if request.prompt.trim().is_empty() {
            return Err(BackendError::InvalidRequest("Prompt is required".into()));
        }
        info!(model = %request.model, steps = request.steps, "colab generate");
        let body = generate_payload(request);
        self.endpoint.post_envelope(&self.http, "/generate", &body, "Image generation failed").await
    }

    /// # Errors
    ///
    /// Returns an error if the server reports failure.
    pub async fn inpaint(&self, request: &ColabInpaintRequest) -> Result<ColabResponse, BackendError> {
        info!(strength = request.denoising_strength, "colab inpaint");
        let body = inpaint_payload(request);
        self.endpoint.post_envelope(&self.http, "/inpaint", &body, "Inpainting failed").await
    }

    /// # Errors
    ///
    /// Returns an error if the task is unknown or the server is unreachable.
    pub async fn status(&self, task_id: &str) -> Result<ColabResponse, BackendError> {
        let path = format!("/status/{}", Endpoint::segment(task_id));
        self.endpoint.get_envelope(&self.http, &path, "Failed to get generation status").await
    }

    /// # Errors
    ///
    /// Returns an error if the server refuses the cancellation.
    pub async fn cancel(&self, task_id: &str) -> Result<ColabResponse, BackendError> {
        let body = json!({ "task_id": task_id });
        self.endpoint.post_envelope(&self.http, "/cancel", &body, "Failed to cancel generation").await
    }

    /// # Errors
    ///
    /// Returns an error if the server cannot list its models.
    pub async fn models(&self) -> Result<Vec<String>, BackendError> {
        let body: Value = self.endpoint.get_envelope(&self.http, "/models", "Failed to get available models").await?;
        Ok(parse_models(&body))
    }
}

#[async_trait::async_trait]
impl ConnectionProbe for ColabClient {
    fn name(&self) -> &'static str {
        "colab"
    }

    async fn check(&self) -> Result<(), BackendError> {
        let _: Value = self.endpoint.get_envelope(&self.http, "/health", "Connection test failed").await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "colab_test.rs"]
mod tests;
