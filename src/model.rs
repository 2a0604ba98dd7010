//! Workspace records: projects, references, generated images, and settings.
//!
//! DESIGN
//! ======
//! Passive value objects with no invariants beyond their shape. Field names
//! serialize in camelCase so a persisted snapshot keeps the same key layout
//! as the browser-side storage blob it replaces. Timestamps are milliseconds
//! since the Unix epoch.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(i64::MAX)
}

/// Fresh record identifier.
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// ENUMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectTemplate {
    #[default]
    Portrait,
    Product,
    Corporate,
    Creative,
    Fashion,
    Electronics,
}

/// How many references of each category a template starts out asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReferencePresets {
    pub faces: u32,
    pub products: u32,
    pub environments: u32,
    pub poses: u32,
}

impl ProjectTemplate {
    pub const ALL: [Self; 6] =
        [Self::Portrait, Self::Product, Self::Corporate, Self::Creative, Self::Fashion, Self::Electronics];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Portrait => "portrait",
            Self::Product => "product",
            Self::Corporate => "corporate",
            Self::Creative => "creative",
            Self::Fashion => "fashion",
            Self::Electronics => "electronics",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }

    #[must_use]
    pub fn presets(self) -> ReferencePresets {
        let (faces, products, environments, poses) = match self {
            Self::Portrait => (10, 0, 5, 8),
            Self::Product => (3, 15, 8, 5),
            Self::Corporate => (8, 5, 10, 6),
            Self::Creative => (5, 3, 12, 10),
            Self::Fashion => (12, 8, 6, 15),
            Self::Electronics => (5, 20, 8, 4),
        };
        ReferencePresets { faces, products, environments, poses }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceCategory {
    Faces,
    Products,
    Environments,
    Poses,
}

impl ReferenceCategory {
    pub const ALL: [Self; 4] = [Self::Faces, Self::Products, Self::Environments, Self::Poses];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Faces => "faces",
            Self::Products => "products",
            Self::Environments => "environments",
            Self::Poses => "poses",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AiModel {
    #[serde(rename = "stable-diffusion")]
    StableDiffusion,
    #[serde(rename = "sdxl")]
    Sdxl,
    #[default]
    #[serde(rename = "flux-ai")]
    FluxAi,
}

impl AiModel {
    pub const ALL: [Self; 3] = [Self::StableDiffusion, Self::Sdxl, Self::FluxAi];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::StableDiffusion => "Stable Diffusion",
            Self::Sdxl => "SDXL",
            Self::FluxAi => "Flux AI",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpg,
    Webp,
}

impl ImageFormat {
    #[must_use]
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Webp => "webp",
        }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub category: ReferenceCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    pub project_id: String,
    pub uploaded_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub template: ProjectTemplate,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub image_count: u32,
    pub folder_path: String,
    #[serde(default)]
    pub references: Vec<Reference>,
}

impl Project {
    /// New project with trimmed text fields and a `/Projects/<name>` folder.
    /// An empty client name is stored as `None`.
    #[must_use]
    pub fn new(name: &str, description: &str, category: &str, client: Option<&str>, template: ProjectTemplate) -> Self {
        let now = now_ms();
        let name = name.trim().to_string();
        let folder_path = format!("/Projects/{name}");
        Self {
            id: new_id(),
            name,
            description: description.trim().to_string(),
            category: category.trim().to_string(),
            client: client
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            template,
            created_at: now,
            updated_at: now,
            image_count: 0,
            folder_path,
            references: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    #[serde(default)]
    pub model: AiModel,
    pub steps: u32,
    pub cfg_scale: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denoising_strength: Option<f64>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: AiModel::default(),
            steps: 20,
            cfg_scale: 7.0,
            width: 512,
            height: 512,
            seed: None,
            denoising_strength: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub size: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub settings: GenerationSettings,
    #[serde(default)]
    pub references: Vec<Reference>,
    pub project_id: String,
    pub created_at: i64,
    pub metadata: ImageMetadata,
}

/// Project id recorded on images generated with no current project.
pub const GENERAL_PROJECT_ID: &str = "general";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOptions {
    /// Empty means a generated `ai-gen-<ms>` name.
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default = "default_true")]
    pub include_metadata: bool,
    #[serde(default)]
    pub create_thumbnail: bool,
    #[serde(default = "default_true")]
    pub add_to_gallery: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            filename: String::new(),
            folder: String::new(),
            tags: Vec::new(),
            description: None,
            format: ImageFormat::Png,
            include_metadata: true,
            create_thumbnail: false,
            add_to_gallery: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// SETTINGS
// =============================================================================

pub const DEFAULT_DRIVE_DISCOVERY_DOC: &str = "https://www.googleapis.com/discovery/v1/apis/drive/v3/rest";
pub const DEFAULT_DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
pub const DEFAULT_HF_MODEL: &str = "stabilityai/stable-diffusion-xl-base-1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleDriveConfig {
    pub client_id: String,
    pub api_key: String,
    pub discovery_doc: String,
    pub scopes: Vec<String>,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            api_key: String::new(),
            discovery_doc: DEFAULT_DRIVE_DISCOVERY_DOC.to_string(),
            scopes: vec![DEFAULT_DRIVE_SCOPE.to_string()],
        }
    }
}

/// Colab notebook hosting Stable Diffusion WebUI. `api_endpoint` is the
/// WebUI base URL used for generation and inpainting.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColabConfig {
    pub notebook_url: String,
    pub api_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Base URL plus optional bearer token for a generic backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointConfig {
    pub api_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HuggingFaceConfig {
    pub api_key: String,
    pub model: String,
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self { api_key: String::new(), model: DEFAULT_HF_MODEL.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub google_drive: GoogleDriveConfig,
    pub colab: ColabConfig,
    pub comfyui: EndpointConfig,
    pub waifu2x: EndpointConfig,
    pub wan22: EndpointConfig,
    pub hugging_face: HuggingFaceConfig,
    pub default_model: AiModel,
    pub auto_save: bool,
    pub theme: Theme,
    pub nsfw_mode: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            google_drive: GoogleDriveConfig::default(),
            colab: ColabConfig::default(),
            comfyui: EndpointConfig::default(),
            waifu2x: EndpointConfig::default(),
            wan22: EndpointConfig::default(),
            hugging_face: HuggingFaceConfig::default(),
            default_model: AiModel::FluxAi,
            auto_save: true,
            theme: Theme::Light,
            nsfw_mode: false,
        }
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
