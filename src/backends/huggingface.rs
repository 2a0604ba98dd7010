//! Hugging Face Inference API client.
//!
//! `POST {base}/models/{model}` with a bearer token returns the generated
//! image as a raw blob, which is handed back as a data URL.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::{BackendError, ConnectionProbe, request_error};
use crate::services::imaging::DataUrl;

pub const BACKEND: &str = "Hugging Face";
const INVALID_KEY: &str = "Invalid Hugging Face API key";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HfParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_inference_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

#[derive(Serialize)]
struct HfRequest<'a> {
    inputs: &'a str,
    parameters: &'a HfParameters,
}

/// Map a non-2xx Inference API answer to an error.
#[must_use]
pub fn classify_error(status: u16, body: &str) -> BackendError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    match status {
        401 | 403 => BackendError::Unauthorized(INVALID_KEY.to_string()),
        503 => BackendError::ModelLoading {
            estimated_time: parsed.as_ref().and_then(|v| v.get("estimated_time")).and_then(Value::as_f64),
        },
        _ => {
            let detail = parsed
                .as_ref()
                .and_then(|v| v.get("error"))
                .and_then(Value::as_str)
                .map_or_else(|| body.trim().to_string(), str::to_string);
            BackendError::Rejected(format!("Hugging Face API error {status}: {detail}"))
        }
    }
}

pub struct HuggingFaceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HuggingFaceClient {
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidRequest`] when the key or model is blank.
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Result<Self, BackendError> {
        if api_key.trim().is_empty() {
            return Err(BackendError::InvalidRequest("Hugging Face API key is required".into()));
        }
        if model.trim().is_empty() {
            return Err(BackendError::InvalidRequest("Hugging Face model is required".into()));
        }
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            model: model.trim().to_string(),
        })
    }

    fn model_url(&self) -> String {
        format!("{}/models/{}", self.base_url, self.model)
    }

    /// Generate one image and return it as a data URL.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unauthorized`] for 401/403,
    /// [`BackendError::ModelLoading`] for 503, and a rejection carrying the
    /// upstream `error` field for any other failure status.
    pub async fn generate(&self, prompt: &str, parameters: &HfParameters) -> Result<String, BackendError> {
        if prompt.trim().is_empty() {
            return Err(BackendError::InvalidRequest("Prompt is required".into()));
        }
        info!(model = %self.model, "hugging face generate");

        let response = self
            .http
            .post(self.model_url())
            .bearer_auth(&self.api_key)
            .json(&HfRequest { inputs: prompt, parameters })
            .send()
            .await
            .map_err(|e| request_error(BACKEND, &e))?;

        let status = response.status();
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| "image/png".to_string());
        let bytes = response.bytes().await.map_err(|e| request_error(BACKEND, &e))?;

        if !status.is_success() {
            let err = classify_error(status.as_u16(), &String::from_utf8_lossy(&bytes));
            warn!(status = status.as_u16(), error = %err, "hugging face request failed");
            return Err(err);
        }
        Ok(DataUrl::encode(&mime, &bytes))
    }
}

/// A `GET` on the model URL answers 200 for a valid key and public model.
#[async_trait::async_trait]
impl ConnectionProbe for HuggingFaceClient {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    async fn check(&self) -> Result<(), BackendError> {
        let response = self
            .http
            .get(self.model_url())
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| request_error(BACKEND, &e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status.as_u16(), &body))
    }
}

#[cfg(test)]
#[path = "huggingface_test.rs"]
mod tests;
