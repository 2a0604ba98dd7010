//! Wan2.2 video generation client.
//!
//! The server takes one of three task families depending on which inputs
//! are present and answers with a `{success, data, error, progress, taskId}`
//! envelope. Long jobs are followed through `/status/{task}`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::{BackendError, ConnectionProbe, Endpoint};

pub const BACKEND: &str = "Wan2.2";
pub const ALLOWED_FPS: [u32; 2] = [24, 30];
pub const MIN_DURATION_SECS: u32 = 2;
pub const MAX_DURATION_SECS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VideoKind {
    TextToVideo,
    ImageToVideo,
    TextImageToVideo,
}

impl VideoKind {
    /// Model task name sent to the server.
    #[must_use]
    pub fn task(self) -> &'static str {
        match self {
            Self::TextToVideo => "t2v-A14B",
            Self::ImageToVideo => "i2v-A14B",
            Self::TextImageToVideo => "ti2v-5B",
        }
    }

    fn needs_prompt(self) -> bool {
        !matches!(self, Self::ImageToVideo)
    }

    fn needs_image(self) -> bool {
        !matches!(self, Self::TextToVideo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "720p")]
    Hd,
    #[serde(rename = "1080p")]
    FullHd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStyle {
    Realistic,
    Anime,
    Artistic,
}

fn default_duration() -> u32 {
    4
}
fn default_fps() -> u32 {
    24
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    #[serde(rename = "type")]
    pub kind: VideoKind,
    #[serde(default)]
    pub prompt: Option<String>,
    /// Reference frame as a data URL.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub style: Option<VideoStyle>,
    #[serde(default)]
    pub seed: Option<i64>,
}

impl VideoRequest {
    /// # Errors
    ///
    /// Rejects a missing prompt or image for the chosen kind, an fps other
    /// than 24 or 30, and durations outside 2..=10 seconds.
    pub fn validate(&self) -> Result<(), BackendError> {
        let has_prompt = self.prompt.as_deref().is_some_and(|p| !p.trim().is_empty());
        let has_image = self.image.as_deref().is_some_and(|i| !i.trim().is_empty());
        if self.kind.needs_prompt() && !has_prompt {
            return Err(BackendError::InvalidRequest("Prompt is required".into()));
        }
        if self.kind.needs_image() && !has_image {
            return Err(BackendError::InvalidRequest("Reference image is required".into()));
        }
        if !ALLOWED_FPS.contains(&self.fps) {
            return Err(BackendError::InvalidRequest(format!("fps must be 24 or 30 (got {})", self.fps)));
        }
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&self.duration) {
            return Err(BackendError::InvalidRequest(format!(
                "duration must be {MIN_DURATION_SECS}-{MAX_DURATION_SECS} seconds (got {})",
                self.duration
            )));
        }
        Ok(())
    }
}

/// Body for `/generate-video`. Only the inputs the task consumes are sent.
#[must_use]
pub fn build_payload(request: &VideoRequest) -> Value {
    let mut payload = json!({
        "task": request.kind.task(),
        "duration": request.duration,
        "fps": request.fps,
        "resolution": request.resolution,
    });
    if request.kind.needs_prompt() {
        payload["prompt"] = json!(request.prompt.as_deref().map(str::trim));
    }
    if request.kind.needs_image() {
        payload["image"] = json!(request.image);
    }
    if let Some(style) = request.style {
        payload["style"] = json!(style);
    }
    if let Some(seed) = request.seed {
        payload["seed"] = json!(seed);
    }
    payload
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoData {
    pub video_url: String,
    pub thumbnail_url: String,
    pub duration: f64,
    pub resolution: String,
    pub file_size: u64,
    pub processing_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<VideoData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, alias = "task_id", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

pub struct Wan22Client {
    http: reqwest::Client,
    endpoint: Endpoint,
}

impl Wan22Client {
    /// # Errors
    ///
    /// Returns [`BackendError::NotConfigured`] when `base_url` is blank.
    pub fn new(http: reqwest::Client, base_url: &str, auth_token: Option<&str>) -> Result<Self, BackendError> {
        Ok(Self { http, endpoint: Endpoint::new(BACKEND, base_url, auth_token)? })
    }

    /// Start (or synchronously run) a generation.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or the server reports failure.
    pub async fn generate(&self, request: &VideoRequest) -> Result<VideoResponse, BackendError> {
        request.validate()?;
        info!(task = request.kind.task(), duration = request.duration, fps = request.fps, "wan22 generate");
        let body = build_payload(request);
        self.endpoint.post_envelope(&self.http, "/generate-video", &body, "Video generation failed").await
    }

    /// # Errors
    ///
    /// Returns an error if the task is unknown or the server is unreachable.
    pub async fn status(&self, task_id: &str) -> Result<VideoResponse, BackendError> {
        let path = format!("/status/{}", Endpoint::segment(task_id));
        self.endpoint.get_envelope(&self.http, &path, "Failed to get generation status").await
    }

    /// # Errors
    ///
    /// Returns an error if the server refuses the cancellation.
    pub async fn cancel(&self, task_id: &str) -> Result<VideoResponse, BackendError> {
        info!(task_id, "wan22 cancel");
        let body = json!({ "task_id": task_id });
        self.endpoint.post_envelope(&self.http, "/cancel", &body, "Failed to cancel generation").await
    }

    /// Raw `/models` body; its shape is server-defined.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn models(&self) -> Result<Value, BackendError> {
        self.endpoint.get_envelope(&self.http, "/models", "Failed to get available models").await
    }
}

#[async_trait::async_trait]
impl ConnectionProbe for Wan22Client {
    fn name(&self) -> &'static str {
        "wan22"
    }

    async fn check(&self) -> Result<(), BackendError> {
        self.endpoint.get_text(&self.http, "/health").await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "wan22_test.rs"]
mod tests;
