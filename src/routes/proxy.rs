//! SD WebUI relay proxy.
//!
//! Each request names its upstream in `sd_webui_endpoint` (body or query),
//! so these handlers never touch the workspace. Validation failures are 400;
//! every upstream failure is a 500 carrying the upstream message.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::ApiError;
use crate::backends::sdwebui::{GenerationResult, Img2ImgRequest, OverrideSettings, SdWebUiClient, Txt2ImgRequest};
use crate::state::AppState;

pub const ENDPOINT_REQUIRED: &str = "SD WebUI endpoint is required";
pub const PROMPT_REQUIRED: &str = "Prompt is required";
pub const INIT_IMAGE_REQUIRED: &str = "Initial image is required";
pub const CONNECTION_FAILED: &str = "Cannot connect to SD WebUI. Please check the endpoint.";

#[derive(Deserialize)]
pub struct Txt2ImgBody {
    #[serde(default)]
    pub sd_webui_endpoint: Option<String>,
    #[serde(default)]
    pub model_checkpoint: Option<String>,
    #[serde(default)]
    pub vae: Option<String>,
    #[serde(flatten)]
    pub request: Txt2ImgRequest,
}

#[derive(Deserialize)]
pub struct Img2ImgBody {
    #[serde(default)]
    pub sd_webui_endpoint: Option<String>,
    #[serde(flatten)]
    pub request: Img2ImgRequest,
}

#[derive(Deserialize)]
pub struct ControlNetBody {
    #[serde(default)]
    pub sd_webui_endpoint: Option<String>,
    #[serde(default)]
    pub controlnet_units: Option<Vec<Value>>,
    #[serde(flatten)]
    pub request: Txt2ImgRequest,
}

#[derive(Deserialize)]
pub struct EndpointParams {
    #[serde(default)]
    pub sd_webui_endpoint: Option<String>,
}

#[derive(Serialize)]
pub struct GenerationResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: GenerationResult,
}

fn ok(result: GenerationResult) -> Json<GenerationResponse> {
    Json(GenerationResponse { success: true, result })
}

fn client(state: &AppState, endpoint: Option<&str>) -> Result<SdWebUiClient, ApiError> {
    let endpoint = endpoint
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::bad_request(ENDPOINT_REQUIRED))?;
    SdWebUiClient::new(state.http.clone(), endpoint, None).map_err(|_| ApiError::bad_request(ENDPOINT_REQUIRED))
}

/// `POST /api/txt2img`
pub async fn txt2img(
    State(state): State<AppState>,
    Json(body): Json<Txt2ImgBody>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let sd = client(&state, body.sd_webui_endpoint.as_deref())?;
    if body.request.prompt.is_empty() {
        return Err(ApiError::bad_request(PROMPT_REQUIRED));
    }
    let mut request = body.request;
    request.override_settings = Some(OverrideSettings::new(body.model_checkpoint.as_deref(), body.vae.as_deref()));

    let result = sd.txt2img(&request).await.map_err(|e| ApiError::internal(&e))?;
    Ok(ok(result))
}

/// `POST /api/img2img`
pub async fn img2img(
    State(state): State<AppState>,
    Json(body): Json<Img2ImgBody>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let sd = client(&state, body.sd_webui_endpoint.as_deref())?;
    if body.request.init_images.is_empty() {
        return Err(ApiError::bad_request(INIT_IMAGE_REQUIRED));
    }
    let mut result = sd.img2img(&body.request).await.map_err(|e| ApiError::internal(&e))?;
    result.parameters = None;
    Ok(ok(result))
}

/// `GET /api/models?sd_webui_endpoint=`
pub async fn models(
    State(state): State<AppState>,
    Query(params): Query<EndpointParams>,
) -> Result<Json<Value>, ApiError> {
    let sd = client(&state, params.sd_webui_endpoint.as_deref())?;
    let models = sd.models().await.map_err(|e| ApiError::internal(&e))?;
    Ok(Json(json!({ "success": true, "models": models })))
}

/// `GET /api/samplers?sd_webui_endpoint=`
pub async fn samplers(
    State(state): State<AppState>,
    Query(params): Query<EndpointParams>,
) -> Result<Json<Value>, ApiError> {
    let sd = client(&state, params.sd_webui_endpoint.as_deref())?;
    let samplers = sd.samplers().await.map_err(|e| ApiError::internal(&e))?;
    Ok(Json(json!({ "success": true, "samplers": samplers })))
}

/// `POST /api/check-connection`
pub async fn check_connection(
    State(state): State<AppState>,
    Json(params): Json<EndpointParams>,
) -> Result<Json<Value>, ApiError> {
    let sd = client(&state, params.sd_webui_endpoint.as_deref())?;
    match sd.check_connection().await {
        Ok(info) => Ok(Json(json!({
            "success": true,
            "message": "Connected to SD WebUI successfully",
            "sd_model_checkpoint": info.sd_model_checkpoint,
            "sd_vae": info.sd_vae,
        }))),
        Err(e) => {
            tracing::warn!(endpoint = sd.base_url(), error = %e, "sd webui connection check failed");
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "E_CONNECTION_FAILED", CONNECTION_FAILED))
        }
    }
}

/// `POST /api/controlnet/txt2img`
pub async fn controlnet_txt2img(
    State(state): State<AppState>,
    Json(body): Json<ControlNetBody>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let sd = client(&state, body.sd_webui_endpoint.as_deref())?;
    let request = body.request.with_controlnet(body.controlnet_units.unwrap_or_default());
    let mut result = sd.txt2img(&request).await.map_err(|e| ApiError::internal(&e))?;
    result.parameters = None;
    Ok(ok(result))
}

#[cfg(test)]
#[path = "proxy_test.rs"]
mod tests;
