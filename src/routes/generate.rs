//! Orchestrated generation.
//!
//! Handlers read backend endpoints from the workspace settings, release the
//! lock, call the backend, and record image results in the gallery against
//! the current project (or `general`).

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{ApiError, drive, workspace};
use crate::backends::colab::{ColabClient, ColabGenerateRequest, ColabInpaintRequest, ColabResponse};
use crate::backends::comfyui::{ComfyUiClient, PoseRequest, PoseResult};
use crate::backends::huggingface::{HfParameters, HuggingFaceClient};
use crate::backends::sdwebui::{Img2ImgRequest, SdWebUiClient, Txt2ImgRequest};
use crate::backends::waifu2x::{UpscaleRequest, UpscaleResult, Waifu2xClient};
use crate::backends::wan22::{VideoRequest, VideoResponse, Wan22Client};
use crate::backends::{BackendError, ConnectionProbe, ConnectionStatus, probe_all};
use crate::model::{AppSettings, GeneratedImage, GenerationSettings, ImageMetadata, new_id, now_ms};
use crate::services::imaging::{self, DataUrl};
use crate::services::mask::{MaskCanvas, Stroke, ViewTransform};
use crate::state::AppState;

/// Appended to the negative prompt unless NSFW mode is on.
pub const NSFW_BLOCK_LIST: &str = "nsfw, nude, naked, explicit, adult content, sexual";
pub const GENERATION_SAMPLER: &str = "DPM++ 2M Karras";
pub const PROMPT_REQUIRED: &str = "Prompt is required";
pub const EMPTY_MASK: &str = "Mask is empty. Paint the area to regenerate.";
pub const DEFAULT_INPAINT_STRENGTH: f64 = 0.8;
pub const DEFAULT_MASK_OPACITY: f32 = 0.7;

/// Negative prompt as sent upstream.
#[must_use]
pub fn guarded_negative_prompt(negative: &str, nsfw_mode: bool) -> String {
    let negative = negative.trim();
    match (nsfw_mode, negative.is_empty()) {
        (true, _) => negative.to_string(),
        (false, true) => NSFW_BLOCK_LIST.to_string(),
        (false, false) => format!("{negative}, {NSFW_BLOCK_LIST}"),
    }
}

fn require_prompt(prompt: &str) -> Result<(), ApiError> {
    if prompt.trim().is_empty() {
        return Err(ApiError::bad_request(PROMPT_REQUIRED));
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn sd_client(state: &AppState, settings: &AppSettings) -> Result<SdWebUiClient, BackendError> {
    let colab = &settings.colab;
    SdWebUiClient::new(state.http.clone(), &colab.api_endpoint, colab.auth_token.as_deref())
}

fn colab_client(state: &AppState, settings: &AppSettings) -> Result<ColabClient, BackendError> {
    let colab = &settings.colab;
    ColabClient::new(state.http.clone(), &colab.api_endpoint, colab.auth_token.as_deref())
}

fn comfyui_client(state: &AppState, settings: &AppSettings) -> Result<ComfyUiClient, BackendError> {
    let c = &settings.comfyui;
    let polling = Duration::from_millis(state.config.comfyui_poll_interval_ms);
    Ok(ComfyUiClient::new(state.http.clone(), &c.api_endpoint, c.auth_token.as_deref())?
        .with_polling(polling, state.config.comfyui_max_polls))
}

fn waifu2x_client(state: &AppState, settings: &AppSettings) -> Result<Waifu2xClient, BackendError> {
    let c = &settings.waifu2x;
    Waifu2xClient::new(state.http.clone(), &c.api_endpoint, c.auth_token.as_deref())
}

fn wan22_client(state: &AppState, settings: &AppSettings) -> Result<Wan22Client, BackendError> {
    let c = &settings.wan22;
    Wan22Client::new(state.http.clone(), &c.api_endpoint, c.auth_token.as_deref())
}

fn hf_client(state: &AppState, settings: &AppSettings) -> Result<HuggingFaceClient, BackendError> {
    let hf = &settings.hugging_face;
    HuggingFaceClient::new(state.http.clone(), &state.config.hf_api_base_url, &hf.api_key, &hf.model)
}

/// Everything needed to record a result except what the handler computes.
struct Recorded {
    filename_prefix: &'static str,
    url: String,
    prompt: String,
    negative_prompt: Option<String>,
    settings: GenerationSettings,
    reference_ids: Vec<String>,
}

/// Build and store a gallery entry. Dimensions come from the image header
/// when it decodes, else from the requested size.
async fn record(state: &AppState, r: Recorded) -> GeneratedImage {
    let (size, dims) = match DataUrl::parse(&r.url) {
        Ok(data) => (data.bytes.len() as u64, imaging::image_dimensions(&data.bytes).ok()),
        Err(_) => (0, None),
    };
    let (width, height) = dims.unwrap_or((r.settings.width, r.settings.height));
    let now = now_ms();
    let image = GeneratedImage {
        id: new_id(),
        filename: format!("{}_{now}.png", r.filename_prefix),
        url: r.url,
        prompt: r.prompt,
        negative_prompt: r.negative_prompt,
        settings: r.settings,
        references: workspace::references_by_id(state, &r.reference_ids).await,
        project_id: workspace::owning_project_id(state).await,
        created_at: now,
        metadata: ImageMetadata { width, height, format: "png".into(), size, tags: Vec::new(), description: None },
    };
    workspace::record_image(state, image).await
}

#[derive(Serialize)]
pub struct RecordedResponse {
    pub success: bool,
    pub image: GeneratedImage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

// =============================================================================
// SD WEBUI
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub settings: Option<GenerationSettings>,
    #[serde(default)]
    pub reference_ids: Vec<String>,
}

/// `POST /api/generate`
pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<RecordedResponse>, ApiError> {
    let settings = state.settings().await;
    let sd = sd_client(&state, &settings)?;
    require_prompt(&body.prompt)?;

    let gen_settings = body
        .settings
        .unwrap_or_else(|| GenerationSettings { model: settings.default_model, ..GenerationSettings::default() });
    let negative = non_empty(body.negative_prompt);

    let mut request = Txt2ImgRequest::new(body.prompt.clone());
    request.negative_prompt = guarded_negative_prompt(negative.as_deref().unwrap_or_default(), settings.nsfw_mode);
    request.steps = gen_settings.steps;
    request.cfg_scale = gen_settings.cfg_scale;
    request.width = gen_settings.width;
    request.height = gen_settings.height;
    request.seed = gen_settings.seed.unwrap_or(-1);
    request.sampler_name = GENERATION_SAMPLER.to_string();
    request.restore_faces = Some(false);
    request.enable_hr = Some(false);

    info!(model = gen_settings.model.label(), steps = request.steps, nsfw_mode = settings.nsfw_mode, "generate");
    let result = sd.txt2img(&request).await?;

    let image = record(
        &state,
        Recorded {
            filename_prefix: "generated",
            url: result.image,
            prompt: body.prompt,
            negative_prompt: negative,
            settings: gen_settings,
            reference_ids: body.reference_ids,
        },
    )
    .await;
    Ok(Json(RecordedResponse { success: true, image, info: Some(result.info) }))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewBody {
    #[serde(default = "default_zoom")]
    pub zoom: f32,
    #[serde(default)]
    pub pan_x: f32,
    #[serde(default)]
    pub pan_y: f32,
}

fn default_zoom() -> f32 {
    1.0
}

impl From<ViewBody> for ViewTransform {
    fn from(v: ViewBody) -> Self {
        ViewTransform::new(v.zoom, v.pan_x, v.pan_y)
    }
}

/// Run raster work on the blocking pool.
async fn off_thread<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "E_INTERNAL", format!("image task failed: {e}"))
    })?
}

/// Replay `strokes` over a blank mask the size of `width`x`height`.
fn paint_mask(width: u32, height: u32, strokes: &[Stroke], view: Option<ViewBody>) -> MaskCanvas {
    let mut canvas = MaskCanvas::new(width, height);
    if let Some(view) = view {
        canvas.view = view.into();
    }
    for stroke in strokes {
        canvas.replay(stroke);
    }
    debug!(strokes = strokes.len(), coverage = canvas.coverage(), "mask painted");
    canvas
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InpaintBody {
    /// Base image as a data URL.
    pub image: String,
    /// Ready-made mask data URL; when absent the mask is painted from `strokes`.
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub strokes: Vec<Stroke>,
    #[serde(default)]
    pub view: Option<ViewBody>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub denoising_strength: Option<f64>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub cfg_scale: Option<f64>,
    #[serde(default)]
    pub seed: Option<i64>,
}

/// `POST /api/inpaint`
pub async fn inpaint(
    State(state): State<AppState>,
    Json(body): Json<InpaintBody>,
) -> Result<Json<RecordedResponse>, ApiError> {
    let settings = state.settings().await;
    let sd = sd_client(&state, &settings)?;
    require_prompt(&body.prompt)?;

    let base = DataUrl::parse(&body.image)?;
    imaging::validate_upload(&base.mime, base.bytes.len() as u64)?;
    let provided = match non_empty(body.mask) {
        Some(mask) if imaging::is_valid_image_data_url(&mask) => Some(mask),
        Some(_) => return Err(ApiError::bad_request("Mask must be an image data URL")),
        None => None,
    };
    let (strokes, view) = (body.strokes, body.view);
    let (width, height, mask) = off_thread(move || {
        // a full decode enforces the image crate's allocation limits
        let (width, height) = imaging::decode_rgba(&base.bytes)?.dimensions();
        let mask = match provided {
            Some(mask) => mask,
            None => {
                let canvas = paint_mask(width, height, &strokes, view);
                if canvas.is_empty() {
                    return Err(ApiError::bad_request(EMPTY_MASK));
                }
                canvas.to_png_data_url()?
            }
        };
        Ok((width, height, mask))
    })
    .await?;

    let defaults = GenerationSettings::default();
    let gen_settings = GenerationSettings {
        model: settings.default_model,
        steps: body.steps.unwrap_or(defaults.steps),
        cfg_scale: body.cfg_scale.unwrap_or(defaults.cfg_scale),
        width,
        height,
        seed: body.seed,
        denoising_strength: Some(body.denoising_strength.unwrap_or(DEFAULT_INPAINT_STRENGTH)),
    };
    let negative = non_empty(body.negative_prompt);
    let request = Img2ImgRequest {
        init_images: vec![imaging::base64_payload(&body.image).to_string()],
        prompt: body.prompt.clone(),
        negative_prompt: guarded_negative_prompt(negative.as_deref().unwrap_or_default(), settings.nsfw_mode),
        steps: gen_settings.steps,
        cfg_scale: gen_settings.cfg_scale,
        width,
        height,
        denoising_strength: gen_settings.denoising_strength.unwrap_or(DEFAULT_INPAINT_STRENGTH),
        seed: body.seed.unwrap_or(-1),
        sampler_name: GENERATION_SAMPLER.to_string(),
        mask: Some(imaging::base64_payload(&mask).to_string()),
    };

    info!(width, height, strength = request.denoising_strength, "inpaint");
    let result = sd.img2img(&request).await?;
    let image = record(
        &state,
        Recorded {
            filename_prefix: "inpainted",
            url: result.image,
            prompt: body.prompt,
            negative_prompt: negative,
            settings: gen_settings,
            reference_ids: Vec::new(),
        },
    )
    .await;
    Ok(Json(RecordedResponse { success: true, image, info: Some(result.info) }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskPreviewBody {
    pub image: String,
    #[serde(default)]
    pub strokes: Vec<Stroke>,
    #[serde(default)]
    pub view: Option<ViewBody>,
    #[serde(default)]
    pub opacity: Option<f32>,
}

/// `POST /api/mask/preview`: the painted mask in red over the base image,
/// plus the painted region's screen-space bounds (null when nothing is painted).
pub async fn mask_preview(Json(body): Json<MaskPreviewBody>) -> Result<Json<Value>, ApiError> {
    let base = DataUrl::parse(&body.image)?;
    let opacity = body.opacity.unwrap_or(DEFAULT_MASK_OPACITY);
    off_thread(move || {
        let rgba = imaging::decode_rgba(&base.bytes)?;
        let canvas = paint_mask(rgba.width(), rgba.height(), &body.strokes, body.view);
        let preview = canvas.overlay_preview(&rgba, opacity);
        let png = imaging::encode_png(&image::DynamicImage::ImageRgba8(preview))?;
        Ok(Json(json!({
            "success": true,
            "preview": DataUrl::encode("image/png", &png),
            "mask": canvas.to_png_data_url()?,
            "coverage": canvas.coverage(),
            "bounds": canvas.screen_bounds().map(|(x, y, width, height)| json!({ "x": x, "y": y, "width": width, "height": height })),
        })))
    })
    .await
}

// =============================================================================
// HUGGING FACE
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HfGenerateBody {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub settings: Option<GenerationSettings>,
}

/// `POST /api/hf/generate`
pub async fn hf_generate(
    State(state): State<AppState>,
    Json(body): Json<HfGenerateBody>,
) -> Result<Json<RecordedResponse>, ApiError> {
    let settings = state.settings().await;
    let hf = hf_client(&state, &settings)?;
    require_prompt(&body.prompt)?;

    let gen_settings = body
        .settings
        .unwrap_or_else(|| GenerationSettings { model: settings.default_model, ..GenerationSettings::default() });
    let negative = non_empty(body.negative_prompt);
    let parameters = HfParameters {
        negative_prompt: Some(guarded_negative_prompt(negative.as_deref().unwrap_or_default(), settings.nsfw_mode)),
        num_inference_steps: Some(gen_settings.steps),
        guidance_scale: Some(gen_settings.cfg_scale),
        width: Some(gen_settings.width),
        height: Some(gen_settings.height),
        seed: gen_settings.seed,
    };

    let url = hf.generate(&body.prompt, &parameters).await?;
    let image = record(
        &state,
        Recorded {
            filename_prefix: "hf",
            url,
            prompt: body.prompt,
            negative_prompt: negative,
            settings: gen_settings,
            reference_ids: Vec::new(),
        },
    )
    .await;
    Ok(Json(RecordedResponse { success: true, image, info: None }))
}

// =============================================================================
// COMFYUI
// =============================================================================

#[derive(Serialize)]
pub struct PoseResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: PoseResult,
    pub image: GeneratedImage,
}

/// `POST /api/pose`
pub async fn pose(State(state): State<AppState>, Json(body): Json<PoseRequest>) -> Result<Json<PoseResponse>, ApiError> {
    let settings = state.settings().await;
    let comfy = comfyui_client(&state, &settings)?;
    require_prompt(&body.prompt)?;

    let result = comfy.generate_with_pose(&body).await?;
    let image = record(
        &state,
        Recorded {
            filename_prefix: "pose",
            url: result.generated_image.clone(),
            prompt: body.prompt.clone(),
            negative_prompt: non_empty(body.negative_prompt.clone()),
            settings: GenerationSettings {
                model: settings.default_model,
                steps: body.steps,
                cfg_scale: body.cfg_scale,
                width: body.width,
                height: body.height,
                seed: Some(result.seed),
                denoising_strength: None,
            },
            reference_ids: Vec::new(),
        },
    )
    .await;
    Ok(Json(PoseResponse { success: true, result, image }))
}

/// `GET /api/pose/models`
pub async fn pose_models(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let settings = state.settings().await;
    let models = comfyui_client(&state, &settings)?.available_models().await?;
    Ok(Json(json!({ "success": true, "models": models.models, "controlnets": models.controlnets })))
}

// =============================================================================
// WAIFU2X
// =============================================================================

#[derive(Deserialize)]
pub struct BatchUpscaleBody {
    pub images: Vec<UpscaleRequest>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<UpscaleResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /api/upscale`
pub async fn upscale(State(state): State<AppState>, Json(body): Json<UpscaleRequest>) -> Result<Json<Value>, ApiError> {
    let settings = state.settings().await;
    let waifu = waifu2x_client(&state, &settings)?;
    body.validate()?;
    let data = waifu.upscale(&body).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

/// `POST /api/upscale/batch`: sequential, one result slot per input.
pub async fn upscale_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchUpscaleBody>,
) -> Result<Json<Value>, ApiError> {
    let settings = state.settings().await;
    let waifu = waifu2x_client(&state, &settings)?;
    if body.images.is_empty() {
        return Err(ApiError::bad_request("At least one image is required"));
    }

    let total = body.images.len();
    let results = waifu
        .batch_upscale(&body.images, |progress, index| {
            info!(index, total, progress, "upscale batch progress");
        })
        .await;
    let items: Vec<BatchItem> = results
        .into_iter()
        .map(|r| match r {
            Ok(data) => BatchItem { success: true, data: Some(data), error: None },
            Err(e) => BatchItem { success: false, data: None, error: Some(e.to_string()) },
        })
        .collect();
    let succeeded = items.iter().filter(|i| i.success).count();
    Ok(Json(json!({ "success": succeeded == total, "succeeded": succeeded, "results": items })))
}

// =============================================================================
// WAN2.2
// =============================================================================

/// `POST /api/video`
pub async fn video(State(state): State<AppState>, Json(body): Json<VideoRequest>) -> Result<Json<VideoResponse>, ApiError> {
    let settings = state.settings().await;
    let wan = wan22_client(&state, &settings)?;
    body.validate()?;
    Ok(Json(wan.generate(&body).await?))
}

/// `GET /api/video/{task}`
pub async fn video_status(State(state): State<AppState>, Path(task): Path<String>) -> Result<Json<VideoResponse>, ApiError> {
    let settings = state.settings().await;
    Ok(Json(wan22_client(&state, &settings)?.status(&task).await?))
}

/// `POST /api/video/{task}/cancel`
pub async fn video_cancel(State(state): State<AppState>, Path(task): Path<String>) -> Result<Json<VideoResponse>, ApiError> {
    let settings = state.settings().await;
    Ok(Json(wan22_client(&state, &settings)?.cancel(&task).await?))
}

/// `GET /api/video/models`
pub async fn video_models(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let settings = state.settings().await;
    Ok(Json(wan22_client(&state, &settings)?.models().await?))
}

// =============================================================================
// COLAB API SERVER
// =============================================================================

/// `POST /api/colab/generate`
pub async fn colab_generate(
    State(state): State<AppState>,
    Json(body): Json<ColabGenerateRequest>,
) -> Result<Json<Value>, ApiError> {
    let settings = state.settings().await;
    let colab = colab_client(&state, &settings)?;
    require_prompt(&body.prompt)?;

    let mut request = body.clone();
    request.negative_prompt = Some(guarded_negative_prompt(
        body.negative_prompt.as_deref().unwrap_or_default(),
        settings.nsfw_mode,
    ));
    let response = colab.generate(&request).await?;
    let Some(url) = response.image().map(str::to_string) else {
        return Ok(Json(json!(response)));
    };

    let image = record(
        &state,
        Recorded {
            filename_prefix: "colab",
            url,
            prompt: body.prompt,
            negative_prompt: non_empty(body.negative_prompt),
            settings: GenerationSettings {
                model: settings.default_model,
                steps: body.steps,
                cfg_scale: body.cfg_scale,
                width: body.width,
                height: body.height,
                seed: body.seed,
                denoising_strength: None,
            },
            reference_ids: Vec::new(),
        },
    )
    .await;
    Ok(Json(json!({ "success": true, "image": image, "progress": response.progress })))
}

/// `POST /api/colab/inpaint`
pub async fn colab_inpaint(
    State(state): State<AppState>,
    Json(body): Json<ColabInpaintRequest>,
) -> Result<Json<ColabResponse>, ApiError> {
    let settings = state.settings().await;
    let colab = colab_client(&state, &settings)?;
    require_prompt(&body.prompt)?;
    Ok(Json(colab.inpaint(&body).await?))
}

/// `GET /api/colab/status/{task}`
pub async fn colab_status(State(state): State<AppState>, Path(task): Path<String>) -> Result<Json<ColabResponse>, ApiError> {
    let settings = state.settings().await;
    Ok(Json(colab_client(&state, &settings)?.status(&task).await?))
}

/// `POST /api/colab/cancel/{task}`
pub async fn colab_cancel(State(state): State<AppState>, Path(task): Path<String>) -> Result<Json<ColabResponse>, ApiError> {
    let settings = state.settings().await;
    Ok(Json(colab_client(&state, &settings)?.cancel(&task).await?))
}

/// `GET /api/colab/models`
pub async fn colab_models(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let settings = state.settings().await;
    let models = colab_client(&state, &settings)?.models().await?;
    Ok(Json(json!({ "success": true, "models": models })))
}

// =============================================================================
// STATUS
// =============================================================================

fn push_probe<P: ConnectionProbe + 'static>(
    name: &'static str,
    built: Result<P, BackendError>,
    probes: &mut Vec<Box<dyn ConnectionProbe>>,
    skipped: &mut Vec<ConnectionStatus>,
) {
    match built {
        Ok(probe) => probes.push(Box::new(probe)),
        Err(e) => skipped.push(ConnectionStatus { backend: name, connected: false, error: Some(e.to_string()) }),
    }
}

/// `GET /api/backends/status`: connection test for every backend, in
/// parallel. Drive is included when the request carries a bearer token.
pub async fn backends_status(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let settings = state.settings().await;
    let mut probes: Vec<Box<dyn ConnectionProbe>> = Vec::new();
    let mut skipped = Vec::new();

    push_probe("sdwebui", sd_client(&state, &settings), &mut probes, &mut skipped);
    push_probe("colab", colab_client(&state, &settings), &mut probes, &mut skipped);
    push_probe("comfyui", comfyui_client(&state, &settings), &mut probes, &mut skipped);
    push_probe("waifu2x", waifu2x_client(&state, &settings), &mut probes, &mut skipped);
    push_probe("wan22", wan22_client(&state, &settings), &mut probes, &mut skipped);
    push_probe("huggingface", hf_client(&state, &settings), &mut probes, &mut skipped);
    if let Some(token) = drive::bearer_token(&headers) {
        match drive::drive_client(&state, token) {
            Ok(client) => probes.push(Box::new(client)),
            Err(e) => skipped.push(ConnectionStatus { backend: "gdrive", connected: false, error: Some(e.message) }),
        }
    }

    let mut statuses = probe_all(&probes).await;
    statuses.extend(skipped);
    let connected = statuses.iter().filter(|s| s.connected).count();
    info!(checked = statuses.len(), connected, "backend status");
    Json(json!({ "success": true, "backends": statuses }))
}

#[cfg(test)]
#[path = "generate_test.rs"]
mod tests;
