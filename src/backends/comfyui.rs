//! ComfyUI client — OpenPose + ControlNet pose-transfer workflow.
//!
//! DESIGN
//! ======
//! ComfyUI executes node graphs in its API format: a map of node id to
//! `{class_type, inputs}`, where a link to another node's output is written
//! `[node_id, output_index]`. A pose run:
//!
//! 1. uploads the source image (`/upload/image`),
//! 2. submits the graph (`/prompt`) and gets a `prompt_id`,
//! 3. polls `/history/{prompt_id}` until outputs appear,
//! 4. downloads the rendered image and the detected skeleton (`/view`).

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{BackendError, ConnectionProbe, Endpoint, read_json, request_error};
use crate::model::new_id;
use crate::services::imaging::DataUrl;

pub const BACKEND: &str = "ComfyUI";
pub const DEFAULT_NEGATIVE_PROMPT: &str = "low quality, blurry, distorted";
pub const OPENPOSE_CONTROLNET: &str = "control_v11p_sd15_openpose.pth";

const OUTPUT_NODE: &str = "11";
const SKELETON_NODE: &str = "12";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_POLLS: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseModel {
    #[default]
    Sd15,
    Sdxl,
    Flux,
}

impl PoseModel {
    #[must_use]
    pub fn checkpoint(self) -> &'static str {
        match self {
            Self::Sd15 => "v1-5-pruned-emaonly.ckpt",
            Self::Sdxl => "sd_xl_base_1.0.safetensors",
            Self::Flux => "flux1-dev.safetensors",
        }
    }
}

fn default_pose_strength() -> f64 {
    1.0
}
fn default_steps() -> u32 {
    20
}
fn default_cfg() -> f64 {
    7.0
}
fn default_size() -> u32 {
    512
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseRequest {
    /// Source photo as a data URL.
    pub source_image: String,
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_pose_strength")]
    pub pose_strength: f64,
    #[serde(default)]
    pub model: PoseModel,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg")]
    pub cfg_scale: f64,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default = "default_size")]
    pub width: u32,
    #[serde(default = "default_size")]
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseResult {
    pub prompt_id: String,
    pub generated_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose_image: Option<String>,
    pub seed: i64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableModels {
    pub models: Vec<String>,
    pub controlnets: Vec<String>,
}

// =============================================================================
// WORKFLOW
// =============================================================================

fn link(node: &str, output: u32) -> Value {
    json!([node, output])
}

/// Build the pose-control graph. `uploaded_image` is the name ComfyUI
/// assigned to the uploaded source.
#[must_use]
pub fn build_pose_workflow(request: &PoseRequest, uploaded_image: &str, seed: i64) -> Value {
    let negative = request
        .negative_prompt
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_NEGATIVE_PROMPT);

    json!({
        "1": { "class_type": "LoadImage", "inputs": { "image": uploaded_image } },
        "2": {
            "class_type": "OpenposePreprocessor",
            "inputs": {
                "image": link("1", 0),
                "detect_hand": "enable",
                "detect_body": "enable",
                "detect_face": "enable",
                "resolution": request.width.max(request.height),
            }
        },
        "3": { "class_type": "ControlNetLoader", "inputs": { "control_net_name": OPENPOSE_CONTROLNET } },
        "4": {
            "class_type": "ControlNetApply",
            "inputs": {
                "conditioning": link("6", 0),
                "control_net": link("3", 0),
                "image": link("2", 0),
                "strength": request.pose_strength,
            }
        },
        "5": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": request.model.checkpoint() } },
        "6": { "class_type": "CLIPTextEncode", "inputs": { "text": request.prompt, "clip": link("5", 1) } },
        "7": { "class_type": "CLIPTextEncode", "inputs": { "text": negative, "clip": link("5", 1) } },
        "8": {
            "class_type": "KSampler",
            "inputs": {
                "model": link("5", 0),
                "positive": link("4", 0),
                "negative": link("7", 0),
                "latent_image": link("9", 0),
                "seed": seed,
                "steps": request.steps,
                "cfg": request.cfg_scale,
                "sampler_name": "euler",
                "scheduler": "normal",
                "denoise": 1.0,
            }
        },
        "9": {
            "class_type": "EmptyLatentImage",
            "inputs": { "width": request.width, "height": request.height, "batch_size": 1 }
        },
        "10": { "class_type": "VAEDecode", "inputs": { "samples": link("8", 0), "vae": link("5", 2) } },
        OUTPUT_NODE: { "class_type": "SaveImage", "inputs": { "images": link("10", 0), "filename_prefix": "pose_control" } },
        SKELETON_NODE: { "class_type": "SaveImage", "inputs": { "images": link("2", 0), "filename_prefix": "pose_skeleton" } },
    })
}

// =============================================================================
// HISTORY PARSING
// =============================================================================

/// A file reference from a history entry, fetchable via `/view`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub filename: String,
    pub subfolder: String,
    pub kind: String,
}

/// History responses are either `{prompt_id: {outputs}}` or `{outputs}`.
#[must_use]
pub fn extract_outputs<'a>(history: &'a Value, prompt_id: &str) -> Option<&'a Value> {
    history
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .or_else(|| history.get("outputs"))
}

/// Why a prompt finished without usable outputs: ComfyUI reported
/// `status_str: "error"`, or marked the run completed with no outputs.
/// `None` while the prompt is still queued or running.
#[must_use]
pub fn execution_failure(history: &Value, prompt_id: &str) -> Option<String> {
    let entry = history.get(prompt_id)?;
    let status = entry.get("status")?;
    let errored = status.get("status_str").and_then(Value::as_str) == Some("error");
    let completed = status.get("completed").and_then(Value::as_bool) == Some(true);
    let has_outputs = entry.get("outputs").and_then(Value::as_object).is_some_and(|m| !m.is_empty());
    if !errored && !(completed && !has_outputs) {
        return None;
    }

    let detail = status
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|m| m.get(0).and_then(Value::as_str) == Some("execution_error"))
        .and_then(|m| m.get(1))
        .map(|e| {
            let message = e.get("exception_message").and_then(Value::as_str).unwrap_or("unknown error").trim();
            match e.get("node_type").and_then(Value::as_str) {
                Some(node) => format!("{node}: {message}"),
                None => message.to_string(),
            }
        });
    Some(match detail {
        Some(detail) => format!("ComfyUI workflow failed: {detail}"),
        None if errored => "ComfyUI workflow failed".to_string(),
        None => "ComfyUI workflow completed without outputs".to_string(),
    })
}

/// First image written by `node_id`, falling back to any node with images.
#[must_use]
pub fn find_image_output(outputs: &Value, node_id: &str) -> Option<ImageRef> {
    outputs
        .get(node_id)
        .and_then(first_image)
        .or_else(|| outputs.as_object()?.values().find_map(first_image))
}

fn first_image(output: &Value) -> Option<ImageRef> {
    let first = output.get("images")?.as_array()?.first()?;
    let text = |key: &str, fallback: &str| first.get(key).and_then(Value::as_str).unwrap_or(fallback).to_string();
    Some(ImageRef {
        filename: first.get("filename")?.as_str()?.to_string(),
        subfolder: text("subfolder", ""),
        kind: text("type", "output"),
    })
}

/// Checkpoint and ControlNet names from `/object_info`.
#[must_use]
pub fn parse_object_info(info: &Value) -> AvailableModels {
    let names = |class: &str, input: &str| -> Vec<String> {
        info.pointer(&format!("/{class}/input/required/{input}/0"))
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    };
    AvailableModels {
        models: names("CheckpointLoaderSimple", "ckpt_name"),
        controlnets: names("ControlNetLoader", "control_net_name"),
    }
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Deserialize)]
struct UploadResponse {
    name: String,
    #[serde(default)]
    subfolder: String,
}

#[derive(Deserialize)]
struct PromptResponse {
    prompt_id: String,
}

pub struct ComfyUiClient {
    http: reqwest::Client,
    endpoint: Endpoint,
    poll_interval: Duration,
    max_polls: u32,
}

impl ComfyUiClient {
    /// # Errors
    ///
    /// Returns [`BackendError::NotConfigured`] when `base_url` is blank.
    pub fn new(http: reqwest::Client, base_url: &str, auth_token: Option<&str>) -> Result<Self, BackendError> {
        Ok(Self {
            http,
            endpoint: Endpoint::new(BACKEND, base_url, auth_token)?,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    #[must_use]
    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    /// Run the full pose workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if the source image is not a data URL, any ComfyUI
    /// call fails, or no output appears before the poll budget runs out.
    pub async fn generate_with_pose(&self, request: &PoseRequest) -> Result<PoseResult, BackendError> {
        if request.prompt.trim().is_empty() {
            return Err(BackendError::InvalidRequest("Prompt is required".into()));
        }
        let source = DataUrl::parse(&request.source_image)
            .map_err(|e| BackendError::InvalidRequest(format!("source image: {e}")))?;

        let started = Instant::now();
        let uploaded = self.upload_image(&source).await?;
        let seed = request.seed.unwrap_or_else(crate::services::imaging::random_seed);
        let workflow = build_pose_workflow(request, &uploaded, seed);

        let prompt_id = self.submit_prompt(&workflow).await?;
        info!(%prompt_id, model = request.model.checkpoint(), seed, "comfyui prompt queued");
        let outputs = self.poll_history(&prompt_id).await?;

        let image = find_image_output(&outputs, OUTPUT_NODE)
            .ok_or_else(|| BackendError::Rejected("ComfyUI history did not include image outputs".into()))?;
        let generated = self.download(&image).await?;
        let pose_image = match outputs.get(SKELETON_NODE).and_then(first_image) {
            Some(skeleton) => Some(self.download(&skeleton).await?),
            None => None,
        };

        Ok(PoseResult {
            prompt_id,
            generated_image: generated,
            pose_image,
            seed,
            processing_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Upload a source image and return the name to reference in `LoadImage`.
    async fn upload_image(&self, image: &DataUrl) -> Result<String, BackendError> {
        let extension = image.mime.rsplit('/').next().unwrap_or("png");
        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(format!("atelier_{}.{extension}", new_id()))
            .mime_str(&image.mime)
            .map_err(|e| BackendError::InvalidRequest(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .endpoint
            .authorize(self.http.post(self.endpoint.url("/upload/image")))
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error(BACKEND, &e))?;
        let uploaded: UploadResponse = read_json(BACKEND, response).await?;
        Ok(if uploaded.subfolder.is_empty() {
            uploaded.name
        } else {
            format!("{}/{}", uploaded.subfolder, uploaded.name)
        })
    }

    async fn submit_prompt(&self, workflow: &Value) -> Result<String, BackendError> {
        let body = json!({ "prompt": workflow, "client_id": new_id() });
        let response: PromptResponse = self.endpoint.post_json(&self.http, "/prompt", &body).await?;
        Ok(response.prompt_id)
    }

    async fn poll_history(&self, prompt_id: &str) -> Result<Value, BackendError> {
        let path = format!("/history/{}", Endpoint::segment(prompt_id));
        for attempt in 0..self.max_polls {
            let history: Value = self.endpoint.get_json(&self.http, &path).await?;
            if let Some(outputs) = extract_outputs(&history, prompt_id).filter(|o| o.as_object().is_some_and(|m| !m.is_empty())) {
                debug!(%prompt_id, attempt, "comfyui outputs ready");
                return Ok(outputs.clone());
            }
            if let Some(reason) = execution_failure(&history, prompt_id) {
                warn!(%prompt_id, attempt, %reason, "comfyui prompt failed");
                return Err(BackendError::Rejected(reason));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(BackendError::Timeout { backend: BACKEND })
    }

    async fn download(&self, image: &ImageRef) -> Result<String, BackendError> {
        let response = self
            .endpoint
            .authorize(self.http.get(self.endpoint.url("/view")))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .send()
            .await
            .map_err(|e| request_error(BACKEND, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status { backend: BACKEND, status: status.as_u16(), body: String::new() });
        }
        let bytes = response.bytes().await.map_err(|e| request_error(BACKEND, &e))?;
        Ok(DataUrl::encode(mime_for(&image.filename), &bytes))
    }

    /// # Errors
    ///
    /// Returns an error if `/object_info` cannot be fetched.
    pub async fn available_models(&self) -> Result<AvailableModels, BackendError> {
        let info: Value = self.endpoint.get_json(&self.http, "/object_info").await?;
        Ok(parse_object_info(&info))
    }
}

#[async_trait::async_trait]
impl ConnectionProbe for ComfyUiClient {
    fn name(&self) -> &'static str {
        "comfyui"
    }

    async fn check(&self) -> Result<(), BackendError> {
        self.endpoint
            .get_text(&self.http, "/system_stats")
            .await
            .map(|_| ())
    }
}

fn mime_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

#[cfg(test)]
#[path = "comfyui_test.rs"]
mod tests;
