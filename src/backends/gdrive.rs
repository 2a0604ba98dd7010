//! Google Drive v3 REST client.
//!
//! The caller supplies an OAuth access token; acquiring one happens in the
//! browser. Folder paths like `/Projects/Summer` are resolved one segment at
//! a time under `root`, creating any segment that does not exist yet.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{BackendError, ConnectionProbe, Endpoint};
use crate::services::imaging::DataUrl;

pub const BACKEND: &str = "Google Drive";
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

const FILE_FIELDS: &str = "id,name,mimeType,size,createdTime,modifiedTime,webViewLink,webContentLink,parents";
const UPLOAD_FIELDS: &str = "id,name,size,createdTime,webViewLink";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Drive reports sizes as decimal strings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_content_link: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageQuota {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_in_drive: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_in_drive_trash: Option<String>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct About {
    #[serde(default)]
    storage_quota: StorageQuota,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveUpload {
    pub filename: String,
    /// Image payload as a data URL.
    pub data: String,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Quote a value for a Drive `q` string literal.
#[must_use]
pub fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[must_use]
pub fn folder_query(name: &str, parent_id: &str) -> String {
    format!(
        "name='{}' and mimeType='{FOLDER_MIME}' and '{}' in parents and trashed=false",
        escape_query(name),
        escape_query(parent_id)
    )
}

#[must_use]
pub fn list_query(folder_id: Option<&str>) -> String {
    match folder_id {
        Some(id) => format!("trashed=false and '{}' in parents", escape_query(id)),
        None => "trashed=false".to_string(),
    }
}

/// Non-empty segments of a slash-separated folder path.
#[must_use]
pub fn folder_segments(path: &str) -> Vec<&str> {
    path.split('/').map(str::trim).filter(|s| !s.is_empty()).collect()
}

pub struct DriveClient {
    http: reqwest::Client,
    api: Endpoint,
    upload: Endpoint,
}

impl DriveClient {
    /// # Errors
    ///
    /// Returns [`BackendError::Unauthorized`] for a blank token and
    /// [`BackendError::NotConfigured`] for a blank base URL.
    pub fn new(http: reqwest::Client, api_base: &str, upload_base: &str, access_token: &str) -> Result<Self, BackendError> {
        if access_token.trim().is_empty() {
            return Err(BackendError::Unauthorized("Not signed in".into()));
        }
        Ok(Self {
            http,
            api: Endpoint::new(BACKEND, api_base, Some(access_token))?,
            upload: Endpoint::new(BACKEND, upload_base, Some(access_token))?,
        })
    }

    /// # Errors
    ///
    /// Returns an error if Drive refuses the request.
    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveFile, BackendError> {
        info!(name, parent_id, "drive create folder");
        let body = json!({ "name": name, "mimeType": FOLDER_MIME, "parents": [parent_id] });
        let request = self.http.post(self.api.url("/files")).query(&[("fields", "id,name,parents")]).json(&body);
        send_json(self.api.authorize(request)).await
    }

    /// Walk `path` from `root`, creating missing folders. Returns the id of
    /// the last segment, or `root` for an empty path.
    ///
    /// # Errors
    ///
    /// Returns an error if a lookup or create fails.
    pub async fn find_or_create_folder(&self, path: &str) -> Result<String, BackendError> {
        let mut parent = "root".to_string();
        for name in folder_segments(path) {
            let q = folder_query(name, &parent);
            let request = self.http.get(self.api.url("/files")).query(&[("q", q.as_str()), ("fields", "files(id,name)")]);
            let found: FileList = send_json(self.api.authorize(request)).await?;
            parent = match found.files.into_iter().next() {
                Some(folder) => folder.id,
                None => self.create_folder(name, &parent).await?.id,
            };
            debug!(segment = name, id = %parent, "drive folder resolved");
        }
        Ok(parent)
    }

    /// Multipart upload of a data-URL image, optionally into a folder path.
    ///
    /// # Errors
    ///
    /// Returns an error if the data URL is malformed or Drive refuses the upload.
    pub async fn upload(&self, upload: &DriveUpload) -> Result<DriveFile, BackendError> {
        let data = DataUrl::parse(&upload.data).map_err(|e| BackendError::InvalidRequest(e.to_string()))?;
        let mut metadata = json!({ "name": upload.filename });
        if let Some(description) = &upload.description {
            metadata["description"] = json!(description);
        }
        if let Some(folder) = upload.folder.as_deref().filter(|f| !f.trim().is_empty()) {
            let folder_id = self.find_or_create_folder(folder).await?;
            metadata["parents"] = json!([folder_id]);
        }
        info!(filename = %upload.filename, bytes = data.bytes.len(), "drive upload");

        let metadata_part = reqwest::multipart::Part::text(metadata.to_string())
            .mime_str("application/json")
            .map_err(|e| super::request_error(BACKEND, &e))?;
        let file_part = reqwest::multipart::Part::bytes(data.bytes)
            .file_name(upload.filename.clone())
            .mime_str(&data.mime)
            .map_err(|e| super::request_error(BACKEND, &e))?;
        let form = reqwest::multipart::Form::new().part("metadata", metadata_part).part("file", file_part);

        let request = self
            .http
            .post(self.upload.url("/files"))
            .query(&[("uploadType", "multipart"), ("fields", UPLOAD_FIELDS)])
            .multipart(form);
        send_json(self.upload.authorize(request)).await
    }

    /// Non-trashed files, newest modification first.
    ///
    /// # Errors
    ///
    /// Returns an error if Drive refuses the request.
    pub async fn list_files(&self, folder_id: Option<&str>) -> Result<Vec<DriveFile>, BackendError> {
        let q = list_query(folder_id);
        let fields = format!("files({FILE_FIELDS})");
        let request = self.http.get(self.api.url("/files")).query(&[
            ("q", q.as_str()),
            ("fields", fields.as_str()),
            ("orderBy", "modifiedTime desc"),
        ]);
        let list: FileList = send_json(self.api.authorize(request)).await?;
        Ok(list.files)
    }

    /// # Errors
    ///
    /// Returns an error if Drive refuses the delete.
    pub async fn delete_file(&self, file_id: &str) -> Result<(), BackendError> {
        info!(file_id, "drive delete");
        let request = self.http.delete(self.api.url(&format!("/files/{}", Endpoint::segment(file_id))));
        let response = self
            .api
            .authorize(request)
            .send()
            .await
            .map_err(|e| super::request_error(BACKEND, &e))?;
        classify(super::read_text(BACKEND, response).await).map(|_| ())
    }

    /// # Errors
    ///
    /// Returns an error if Drive refuses the request.
    pub async fn storage_quota(&self) -> Result<StorageQuota, BackendError> {
        let request = self.http.get(self.api.url("/about")).query(&[("fields", "storageQuota")]);
        let about: About = send_json(self.api.authorize(request)).await?;
        Ok(about.storage_quota)
    }
}

async fn send_json<T: serde::de::DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, BackendError> {
    let response = request.send().await.map_err(|e| super::request_error(BACKEND, &e))?;
    let text = classify(super::read_text(BACKEND, response).await)?;
    serde_json::from_str(&text).map_err(|e| super::parse_error(BACKEND, e))
}

/// A rejected token is reported as a sign-in problem rather than a bare status.
fn classify(result: Result<String, BackendError>) -> Result<String, BackendError> {
    match result {
        Err(BackendError::Status { status: 401, .. }) => {
            Err(BackendError::Unauthorized("Google Drive access token is invalid or expired".into()))
        }
        other => other,
    }
}

#[async_trait::async_trait]
impl ConnectionProbe for DriveClient {
    fn name(&self) -> &'static str {
        "gdrive"
    }

    async fn check(&self) -> Result<(), BackendError> {
        self.storage_quota().await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "gdrive_test.rs"]
mod tests;
