//! State API over the shared workspace.
//!
//! Every mutation goes through [`Action`] so persistence sees it. Reads copy
//! out of the lock; nothing here awaits a backend while holding it.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::ApiError;
use crate::model::{
    AppSettings, GENERAL_PROJECT_ID, GeneratedImage, GenerationSettings, ImageFormat, ImageMetadata, Project,
    ProjectTemplate, Reference, ReferenceCategory, ReferencePresets, SaveOptions, new_id, now_ms,
};
use crate::services::gallery::{self, GalleryQuery, Statistics, TimeRange};
use crate::services::imaging::{self, DataUrl};
use crate::services::store::Action;
use crate::state::AppState;

pub const PROJECT_NAME_REQUIRED: &str = "Project name is required";
pub const PROJECT_NOT_FOUND: &str = "Project not found";
pub const REFERENCE_NOT_FOUND: &str = "Reference not found";
pub const SETTINGS_EXPORT_FILENAME: &str = "ai-image-gen-settings.json";
const THUMBNAIL_SIDE: u32 = 256;

/// Project id for new records: the current project, else `general`.
pub(crate) async fn owning_project_id(state: &AppState) -> String {
    state
        .current_project()
        .await
        .map_or_else(|| GENERAL_PROJECT_ID.to_string(), |p| p.id)
}

/// Append a generated image to the gallery.
pub(crate) async fn record_image(state: &AppState, image: GeneratedImage) -> GeneratedImage {
    let meta = &image.metadata;
    info!(
        image_id = %image.id,
        project_id = %image.project_id,
        filename = %image.filename,
        size = %imaging::format_file_size(meta.size),
        aspect = %imaging::aspect_ratio(meta.width, meta.height),
        "image recorded"
    );
    state.dispatch(Action::AddGeneratedImage(image.clone())).await;
    image
}

/// References by id, in request order, skipping unknown ids.
pub(crate) async fn references_by_id(state: &AppState, ids: &[String]) -> Vec<Reference> {
    let ws = state.workspace.read().await;
    ids.iter().filter_map(|id| ws.reference(id).cloned()).collect()
}

// =============================================================================
// PROJECTS
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub template: ProjectTemplate,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub client: Option<String>,
    pub template: Option<ProjectTemplate>,
}

#[derive(Deserialize)]
pub struct CurrentProjectBody {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Serialize)]
pub struct TemplateInfo {
    pub id: ProjectTemplate,
    pub presets: ReferencePresets,
}

/// `GET /api/projects`
pub async fn list_projects(State(state): State<AppState>) -> Json<Vec<Project>> {
    Json(state.workspace.read().await.projects.clone())
}

/// `POST /api/projects`: the new project also becomes current.
pub async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProjectBody>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request(PROJECT_NAME_REQUIRED));
    }
    let project = Project::new(&body.name, &body.description, &body.category, body.client.as_deref(), body.template);
    info!(project_id = %project.id, name = %project.name, template = project.template.as_str(), "project created");

    let mut ws = state.workspace.write().await;
    ws.apply(Action::AddProject(project.clone()));
    ws.apply(Action::SetCurrentProject(Some(project.clone())));
    Ok((StatusCode::CREATED, Json(project)))
}

/// `GET /api/projects/{id}`
pub async fn get_project(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Project>, ApiError> {
    let ws = state.workspace.read().await;
    ws.project(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(PROJECT_NOT_FOUND))
}

/// `PUT /api/projects/{id}`
pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateProjectBody>,
) -> Result<Json<Project>, ApiError> {
    let mut ws = state.workspace.write().await;
    let mut project = ws.project(&id).cloned().ok_or_else(|| ApiError::not_found(PROJECT_NOT_FOUND))?;

    if let Some(name) = body.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::bad_request(PROJECT_NAME_REQUIRED));
        }
        project.name = name.to_string();
    }
    if let Some(description) = body.description {
        project.description = description.trim().to_string();
    }
    if let Some(category) = body.category {
        project.category = category.trim().to_string();
    }
    if let Some(client) = body.client {
        let client = client.trim();
        project.client = (!client.is_empty()).then(|| client.to_string());
    }
    if let Some(template) = body.template {
        project.template = template;
    }
    project.updated_at = now_ms();

    ws.apply(Action::UpdateProject(project.clone()));
    Ok(Json(project))
}

/// `DELETE /api/projects/{id}`
pub async fn delete_project(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let mut ws = state.workspace.write().await;
    if ws.project(&id).is_none() {
        return Err(ApiError::not_found(PROJECT_NOT_FOUND));
    }
    ws.apply(Action::DeleteProject(id.clone()));
    info!(project_id = %id, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/projects/current`
pub async fn get_current_project(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "project": state.current_project().await }))
}

/// `PUT /api/projects/current`: `{id: null}` clears the selection.
pub async fn set_current_project(
    State(state): State<AppState>,
    Json(body): Json<CurrentProjectBody>,
) -> Result<Json<Value>, ApiError> {
    let mut ws = state.workspace.write().await;
    let project = match body.id {
        Some(id) => Some(ws.project(&id).cloned().ok_or_else(|| ApiError::not_found(PROJECT_NOT_FOUND))?),
        None => None,
    };
    ws.apply(Action::SetCurrentProject(project.clone()));
    Ok(Json(json!({ "project": project })))
}

/// `GET /api/templates`
pub async fn list_templates() -> Json<Vec<TemplateInfo>> {
    Json(
        ProjectTemplate::ALL
            .into_iter()
            .map(|id| TemplateInfo { id, presets: id.presets() })
            .collect(),
    )
}

// =============================================================================
// REFERENCES
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceQuery {
    /// A category name; `all` or absent means every category.
    pub category: Option<String>,
    pub project_id: Option<String>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddReferenceBody {
    pub filename: String,
    /// Image as a data URL.
    pub url: String,
    #[serde(default)]
    pub category: Option<ReferenceCategory>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Shrink so the long side fits, re-encoding as PNG.
    #[serde(default)]
    pub max_side: Option<u32>,
}

#[derive(Deserialize)]
pub struct UpdateReferenceBody {
    pub filename: Option<String>,
    pub category: Option<ReferenceCategory>,
    pub tags: Option<Vec<String>>,
}

fn parse_category(raw: Option<&str>) -> Result<Option<ReferenceCategory>, ApiError> {
    match raw.map(str::trim).filter(|c| !c.is_empty() && *c != "all") {
        None => Ok(None),
        Some(name) => ReferenceCategory::parse(name)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown reference category: {name}"))),
    }
}

fn matches_search(reference: &Reference, needle: &str) -> bool {
    reference.filename.to_lowercase().contains(needle)
        || reference.tags.iter().any(|t| t.to_lowercase().contains(needle))
}

/// `GET /api/references?category=&projectId=&search=`
pub async fn list_references(
    State(state): State<AppState>,
    Query(query): Query<ReferenceQuery>,
) -> Result<Json<Vec<Reference>>, ApiError> {
    let category = parse_category(query.category.as_deref())?;
    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut refs = state
        .workspace
        .read()
        .await
        .references_matching(category, query.project_id.as_deref());
    if let Some(needle) = needle {
        refs.retain(|r| matches_search(r, &needle));
    }
    Ok(Json(refs))
}

/// `POST /api/references`
pub async fn add_reference(
    State(state): State<AppState>,
    Json(body): Json<AddReferenceBody>,
) -> Result<(StatusCode, Json<Reference>), ApiError> {
    if !imaging::is_valid_image_data_url(&body.url) {
        return Err(ApiError::bad_request("Reference must be an image data URL"));
    }
    let data = DataUrl::parse(&body.url)?;
    imaging::validate_upload(&data.mime, data.bytes.len() as u64)?;
    let url = match body.max_side {
        Some(side) => DataUrl::encode("image/png", &imaging::resize_to_fit(&data.bytes, side)?),
        None => body.url,
    };

    let project_id = match body.project_id.filter(|p| !p.trim().is_empty()) {
        Some(id) => id,
        None => owning_project_id(&state).await,
    };
    let reference = Reference {
        id: new_id(),
        filename: body.filename,
        url,
        category: body.category.unwrap_or(ReferenceCategory::Faces),
        tags: body.tags,
        project_id,
        uploaded_at: now_ms(),
    };
    info!(reference_id = %reference.id, category = reference.category.as_str(), "reference added");
    state.dispatch(Action::AddReference(reference.clone())).await;
    Ok((StatusCode::CREATED, Json(reference)))
}

/// `PUT /api/references/{id}`
pub async fn update_reference(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateReferenceBody>,
) -> Result<Json<Reference>, ApiError> {
    let mut ws = state.workspace.write().await;
    let mut reference = ws.reference(&id).cloned().ok_or_else(|| ApiError::not_found(REFERENCE_NOT_FOUND))?;
    if let Some(filename) = body.filename.filter(|f| !f.trim().is_empty()) {
        reference.filename = filename;
    }
    if let Some(category) = body.category {
        reference.category = category;
    }
    if let Some(tags) = body.tags {
        reference.tags = tags;
    }
    ws.apply(Action::UpdateReference(reference.clone()));
    Ok(Json(reference))
}

/// `DELETE /api/references/{id}`
pub async fn delete_reference(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let mut ws = state.workspace.write().await;
    if ws.reference(&id).is_none() {
        return Err(ApiError::not_found(REFERENCE_NOT_FOUND));
    }
    ws.apply(Action::DeleteReference(id));
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// IMAGES
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveImageBody {
    /// Data URL, or a bare base64 PNG payload.
    pub image: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub settings: GenerationSettings,
    #[serde(default)]
    pub reference_ids: Vec<String>,
    #[serde(default)]
    pub options: SaveOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveImageResponse {
    pub success: bool,
    pub image: GeneratedImage,
    pub saved_to_gallery: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// `GET /api/images?project_id=&search=&tag=&sort=`
pub async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<GalleryQuery>,
) -> Json<Vec<GeneratedImage>> {
    let ws = state.workspace.read().await;
    Json(gallery::filter_images(&ws.generated_images, &query))
}

/// `POST /api/images`: store an image with save options applied.
pub async fn save_image(
    State(state): State<AppState>,
    Json(body): Json<SaveImageBody>,
) -> Result<Json<SaveImageResponse>, ApiError> {
    let source = if body.image.starts_with("data:") {
        DataUrl::parse(&body.image)?
    } else {
        DataUrl::parse(&imaging::png_data_url(&body.image))?
    };
    let options = body.options;
    let bytes = if source.mime == options.format.mime() {
        source.bytes
    } else {
        imaging::transcode(&source.bytes, options.format)?
    };
    let (width, height) = imaging::image_dimensions(&bytes)?;

    let filename = match options.filename.trim() {
        "" => format!("ai-gen-{}.{}", now_ms(), options.format.extension()),
        name => name.to_string(),
    };
    let (tags, description) = if options.include_metadata {
        (options.tags, options.description)
    } else {
        (Vec::new(), None)
    };
    let thumbnail = if options.create_thumbnail {
        let thumb = imaging::create_thumbnail(&bytes, THUMBNAIL_SIDE, THUMBNAIL_SIDE)?;
        Some(DataUrl::encode(ImageFormat::Jpg.mime(), &thumb))
    } else {
        None
    };
    let size = bytes.len() as u64;
    let stored = DataUrl { mime: options.format.mime().to_string(), bytes };

    let image = GeneratedImage {
        id: new_id(),
        filename,
        url: stored.to_url(),
        prompt: body.prompt,
        negative_prompt: body.negative_prompt.filter(|n| !n.is_empty()),
        settings: body.settings,
        references: references_by_id(&state, &body.reference_ids).await,
        project_id: owning_project_id(&state).await,
        created_at: now_ms(),
        metadata: ImageMetadata {
            width,
            height,
            format: options.format.extension().to_string(),
            size,
            tags,
            description,
        },
    };
    let image = if options.add_to_gallery { record_image(&state, image).await } else { image };

    Ok(Json(SaveImageResponse { success: true, image, saved_to_gallery: options.add_to_gallery, thumbnail }))
}

// =============================================================================
// SETTINGS & STATISTICS
// =============================================================================

#[derive(Deserialize)]
pub struct StatisticsQuery {
    #[serde(default)]
    pub range: TimeRange,
}

/// `GET /api/settings`
pub async fn get_settings(State(state): State<AppState>) -> Json<AppSettings> {
    Json(state.settings().await)
}

/// `PUT /api/settings`: missing keys take their defaults.
pub async fn put_settings(State(state): State<AppState>, Json(settings): Json<AppSettings>) -> Json<AppSettings> {
    state.dispatch(Action::SetSettings(settings.clone())).await;
    info!(nsfw_mode = settings.nsfw_mode, "settings updated");
    Json(settings)
}

/// `GET /api/settings/export`: settings as a downloadable JSON file.
pub async fn export_settings(State(state): State<AppState>) -> Result<Response, ApiError> {
    let settings = state.settings().await;
    let body = serde_json::to_string_pretty(&settings).map_err(|e| {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "E_SERIALIZE", e.to_string())
    })?;
    let disposition = format!("attachment; filename=\"{SETTINGS_EXPORT_FILENAME}\"");
    Ok((
        [(CONTENT_TYPE, "application/json".to_string()), (CONTENT_DISPOSITION, disposition)],
        body,
    )
        .into_response())
}

/// `GET /api/statistics?range=7d|30d|90d|all`
pub async fn get_statistics(State(state): State<AppState>, Query(query): Query<StatisticsQuery>) -> Json<Statistics> {
    let ws = state.workspace.read().await;
    Json(gallery::statistics(&ws, query.range, now_ms()))
}

#[cfg(test)]
#[path = "workspace_test.rs"]
mod tests;
