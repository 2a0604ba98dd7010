use super::*;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{delete, get, post};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::state::test_helpers::spawn_router;

#[test]
fn queries_escape_quotes() {
    assert_eq!(escape_query(r"it's a\b"), r"it\'s a\\b");
    assert_eq!(
        folder_query("Bob's", "root"),
        "name='Bob\\'s' and mimeType='application/vnd.google-apps.folder' and 'root' in parents and trashed=false"
    );
    assert_eq!(list_query(None), "trashed=false");
    assert_eq!(list_query(Some("f1")), "trashed=false and 'f1' in parents");
}

#[test]
fn folder_segments_skip_empty_parts() {
    assert_eq!(folder_segments("/Projects//Summer/ "), vec!["Projects", "Summer"]);
    assert!(folder_segments("/").is_empty());
}

#[test]
fn blank_token_means_not_signed_in() {
    let err = DriveClient::new(reqwest::Client::new(), "http://a", "http://b", "  ").err().unwrap();
    assert!(matches!(err, BackendError::Unauthorized(ref m) if m == "Not signed in"));
}

// =============================================================================
// client against a fake Drive
// =============================================================================

#[derive(Default)]
struct FakeDrive {
    /// (id, name, parent)
    folders: Vec<(String, String, String)>,
    queries: Vec<HashMap<String, String>>,
    upload_body: String,
    deleted: Vec<String>,
}

type Shared = Arc<Mutex<FakeDrive>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some("Bearer ya29.token")
}

async fn fake_drive(shared: Shared) -> String {
    let router = Router::new()
        .route(
            "/files",
            get(|State(s): State<Shared>, headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                if !authorized(&headers) {
                    return (StatusCode::UNAUTHORIZED, axum::Json(serde_json::json!({})));
                }
                let mut drive = s.lock().unwrap();
                let query = q.get("q").cloned().unwrap_or_default();
                drive.queries.push(q);
                let files: Vec<Value> = drive
                    .folders
                    .iter()
                    .filter(|(_, name, parent)| query.contains(&format!("name='{name}'")) && query.contains(&format!("'{parent}' in parents")))
                    .map(|(id, name, _)| serde_json::json!({ "id": id, "name": name }))
                    .collect();
                if query.starts_with("trashed=false") {
                    let listing = serde_json::json!([{ "id": "img-1", "name": "a.png", "size": "2048" }]);
                    return (StatusCode::OK, axum::Json(serde_json::json!({ "files": listing })));
                }
                (StatusCode::OK, axum::Json(serde_json::json!({ "files": files })))
            })
            .post(|State(s): State<Shared>, axum::Json(body): axum::Json<Value>| async move {
                let mut drive = s.lock().unwrap();
                let id = format!("folder-{}", drive.folders.len() + 1);
                let name = body["name"].as_str().unwrap_or_default().to_string();
                let parent = body["parents"][0].as_str().unwrap_or_default().to_string();
                drive.folders.push((id.clone(), name.clone(), parent));
                axum::Json(serde_json::json!({ "id": id, "name": name }))
            }),
        )
        .route(
            "/files/{id}",
            delete(|State(s): State<Shared>, Path(id): Path<String>| async move {
                s.lock().unwrap().deleted.push(id);
                StatusCode::NO_CONTENT
            }),
        )
        .route(
            "/about",
            get(|| async { axum::Json(serde_json::json!({ "storageQuota": { "limit": "100", "usage": "42" } })) }),
        )
        .route(
            "/upload/files",
            post(|State(s): State<Shared>, headers: HeaderMap, body: String| async move {
                let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or_default();
                assert!(content_type.starts_with("multipart/form-data"));
                s.lock().unwrap().upload_body = body;
                axum::Json(serde_json::json!({ "id": "up-1", "name": "shot.png", "size": "3" }))
            }),
        )
        .with_state(shared);
    spawn_router(router).await
}

async fn client(shared: &Shared, token: &str) -> DriveClient {
    let base = fake_drive(shared.clone()).await;
    DriveClient::new(reqwest::Client::new(), &base, &format!("{base}/upload"), token).unwrap()
}

#[tokio::test]
async fn folder_path_reuses_existing_and_creates_missing() {
    let shared = Shared::default();
    shared.lock().unwrap().folders.push(("existing".into(), "Projects".into(), "root".into()));
    let drive = client(&shared, "ya29.token").await;

    let id = drive.find_or_create_folder("/Projects/Summer").await.unwrap();

    assert_eq!(id, "folder-2");
    let state = shared.lock().unwrap();
    assert_eq!(state.folders[1], ("folder-2".into(), "Summer".into(), "existing".into()));
    assert_eq!(state.queries.len(), 2);
}

#[tokio::test]
async fn upload_sends_metadata_and_file_parts() {
    let shared = Shared::default();
    let drive = client(&shared, "ya29.token").await;

    let upload = DriveUpload {
        filename: "shot.png".into(),
        data: DataUrl::encode("image/png", b"PNG"),
        folder: Some("Exports".into()),
        description: Some("hero shot".into()),
    };
    let file = drive.upload(&upload).await.unwrap();

    assert_eq!(file.id, "up-1");
    let state = shared.lock().unwrap();
    assert!(state.upload_body.contains(r#""parents":["folder-1"]"#));
    assert!(state.upload_body.contains(r#""description":"hero shot""#));
    assert!(state.upload_body.contains("PNG"));
}

#[tokio::test]
async fn list_delete_and_quota() {
    let shared = Shared::default();
    let drive = client(&shared, "ya29.token").await;

    let files = drive.list_files(Some("f1")).await.unwrap();
    assert_eq!(files[0].size.as_deref(), Some("2048"));
    let q = shared.lock().unwrap().queries[0].clone();
    assert_eq!(q["orderBy"], "modifiedTime desc");
    assert_eq!(q["q"], "trashed=false and 'f1' in parents");

    drive.delete_file("img-1").await.unwrap();
    assert_eq!(shared.lock().unwrap().deleted, vec!["img-1"]);

    let quota = drive.storage_quota().await.unwrap();
    assert_eq!(quota.usage.as_deref(), Some("42"));
    assert!(drive.check().await.is_ok());
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let shared = Shared::default();
    let drive = client(&shared, "stale").await;
    assert!(matches!(drive.list_files(None).await, Err(BackendError::Unauthorized(_))));
}
