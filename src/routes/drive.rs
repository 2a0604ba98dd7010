//! Google Drive pass-through.
//!
//! The browser owns the OAuth flow and forwards its access token as
//! `Authorization: Bearer <token>`; it is used for the one request and never
//! stored.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};

use super::ApiError;
use crate::backends::gdrive::{DriveClient, DriveFile, DriveUpload, StorageQuota};
use crate::state::AppState;

/// Token from an `Authorization: Bearer` header, if present and non-blank.
/// The scheme name is matched case-insensitively.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let (scheme, token) = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub(crate) fn drive_client(state: &AppState, token: &str) -> Result<DriveClient, ApiError> {
    let config = &state.config;
    Ok(DriveClient::new(state.http.clone(), &config.drive_api_base_url, &config.drive_upload_base_url, token)?)
}

fn client_from_headers(state: &AppState, headers: &HeaderMap) -> Result<DriveClient, ApiError> {
    drive_client(state, bearer_token(headers).unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub folder_id: Option<String>,
}

/// `POST /api/drive/upload`
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DriveUpload>,
) -> Result<(StatusCode, Json<DriveFile>), ApiError> {
    let drive = client_from_headers(&state, &headers)?;
    let file = drive.upload(&body).await?;
    Ok((StatusCode::CREATED, Json(file)))
}

/// `GET /api/drive/files?folderId=`
pub async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let drive = client_from_headers(&state, &headers)?;
    let files = drive.list_files(params.folder_id.as_deref()).await?;
    Ok(Json(json!({ "success": true, "files": files })))
}

/// `DELETE /api/drive/files/{id}`
pub async fn delete_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    client_from_headers(&state, &headers)?.delete_file(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/drive/quota`
pub async fn quota(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<StorageQuota>, ApiError> {
    let drive = client_from_headers(&state, &headers)?;
    Ok(Json(drive.storage_quota().await?))
}

#[cfg(test)]
#[path = "drive_test.rs"]
mod tests;
