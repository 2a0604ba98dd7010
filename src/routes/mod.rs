//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One axum router serves three groups of endpoints:
//! the SD WebUI relay proxy (`proxy`), which is stateless and takes the
//! upstream URL from each request; the state API (`workspace`) over the
//! shared [`Workspace`](crate::services::store::Workspace); and the
//! orchestrated generation endpoints (`generate`, `drive`), which read
//! backend settings from the workspace, call a backend, and record results.
//!
//! Every failure leaves as `{success: false, error, code}` via [`ApiError`].

pub mod drive;
pub mod generate;
pub mod proxy;
pub mod workspace;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::backends::BackendError;
use crate::error::ErrorCode;
use crate::services::imaging::ImagingError;
use crate::state::AppState;

/// Request bodies carry base64 images.
pub const BODY_LIMIT_BYTES: usize = 50 * 1024 * 1024;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // relay proxy
        .route("/health", get(health))
        .route("/api/txt2img", post(proxy::txt2img))
        .route("/api/img2img", post(proxy::img2img))
        .route("/api/models", get(proxy::models))
        .route("/api/samplers", get(proxy::samplers))
        .route("/api/check-connection", post(proxy::check_connection))
        .route("/api/controlnet/txt2img", post(proxy::controlnet_txt2img))
        // state
        .route("/api/projects", get(workspace::list_projects).post(workspace::create_project))
        .route(
            "/api/projects/current",
            get(workspace::get_current_project).put(workspace::set_current_project),
        )
        .route(
            "/api/projects/{id}",
            get(workspace::get_project)
                .put(workspace::update_project)
                .delete(workspace::delete_project),
        )
        .route("/api/templates", get(workspace::list_templates))
        .route("/api/references", get(workspace::list_references).post(workspace::add_reference))
        .route(
            "/api/references/{id}",
            put(workspace::update_reference).delete(workspace::delete_reference),
        )
        .route("/api/images", get(workspace::list_images).post(workspace::save_image))
        .route("/api/settings", get(workspace::get_settings).put(workspace::put_settings))
        .route("/api/settings/export", get(workspace::export_settings))
        .route("/api/statistics", get(workspace::get_statistics))
        // orchestration
        .route("/api/generate", post(generate::generate))
        .route("/api/inpaint", post(generate::inpaint))
        .route("/api/mask/preview", post(generate::mask_preview))
        .route("/api/hf/generate", post(generate::hf_generate))
        .route("/api/pose", post(generate::pose))
        .route("/api/pose/models", get(generate::pose_models))
        .route("/api/upscale", post(generate::upscale))
        .route("/api/upscale/batch", post(generate::upscale_batch))
        .route("/api/video", post(generate::video))
        .route("/api/video/models", get(generate::video_models))
        .route("/api/video/{task}", get(generate::video_status))
        .route("/api/video/{task}/cancel", post(generate::video_cancel))
        .route("/api/colab/generate", post(generate::colab_generate))
        .route("/api/colab/inpaint", post(generate::colab_inpaint))
        .route("/api/colab/status/{task}", get(generate::colab_status))
        .route("/api/colab/cancel/{task}", post(generate::colab_cancel))
        .route("/api/colab/models", get(generate::colab_models))
        .route("/api/backends/status", get(generate::backends_status))
        // drive
        .route("/api/drive/upload", post(drive::upload))
        .route("/api/drive/files", get(drive::list_files))
        .route("/api/drive/files/{id}", delete(drive::delete_file))
        .route("/api/drive/quota", get(drive::quota))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "message": "SD WebUI Proxy is running" }))
}

// =============================================================================
// ERRORS
// =============================================================================

/// JSON error response: `{success: false, error, code}`, plus
/// `retryable: true` when trying again may help.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into(), retryable: false }
    }

    fn from_code(status: StatusCode, err: &impl ErrorCode) -> Self {
        Self { retryable: err.retryable(), ..Self::new(status, err.error_code(), err.to_string()) }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "E_INVALID_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "E_NOT_FOUND", message)
    }

    /// Any backend failure as a 500, keeping the backend's code and message.
    #[must_use]
    pub fn internal(err: &BackendError) -> Self {
        Self::from_code(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
}

pub(crate) fn backend_status(err: &BackendError) -> StatusCode {
    match err {
        BackendError::NotConfigured { .. } | BackendError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        BackendError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        BackendError::ModelLoading { .. } => StatusCode::SERVICE_UNAVAILABLE,
        BackendError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        BackendError::HttpClientBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
        BackendError::Request { .. }
        | BackendError::Status { .. }
        | BackendError::Parse { .. }
        | BackendError::Rejected(_) => StatusCode::BAD_GATEWAY,
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        Self::from_code(backend_status(&err), &err)
    }
}

impl From<ImagingError> for ApiError {
    fn from(err: ImagingError) -> Self {
        Self::from_code(StatusCode::BAD_REQUEST, &err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = self.status.as_u16(), code = self.code, error = %self.message, "request failed");
        } else {
            tracing::debug!(status = self.status.as_u16(), code = self.code, error = %self.message, "request rejected");
        }
        let mut body = json!({ "success": false, "error": self.message, "code": self.code });
        if self.retryable {
            body["retryable"] = json!(true);
        }
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
