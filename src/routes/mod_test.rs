use super::*;
use serde_json::Value;

use crate::state::test_helpers::{spawn_app, test_app_state};

#[test]
fn backend_errors_map_to_statuses() {
    let cases = [
        (BackendError::NotConfigured { backend: "ComfyUI" }, StatusCode::BAD_REQUEST),
        (BackendError::InvalidRequest("bad".into()), StatusCode::BAD_REQUEST),
        (BackendError::Unauthorized("nope".into()), StatusCode::UNAUTHORIZED),
        (BackendError::ModelLoading { estimated_time: None }, StatusCode::SERVICE_UNAVAILABLE),
        (BackendError::Timeout { backend: "Wan2.2" }, StatusCode::GATEWAY_TIMEOUT),
        (BackendError::Rejected("failed".into()), StatusCode::BAD_GATEWAY),
        (
            BackendError::Status { backend: "Waifu2x", status: 500, body: String::new() },
            StatusCode::BAD_GATEWAY,
        ),
    ];
    for (err, status) in cases {
        assert_eq!(backend_status(&err), status, "{err}");
    }
}

#[test]
fn internal_keeps_code_and_message() {
    let err = ApiError::internal(&BackendError::Rejected("No images generated".into()));
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.code, "E_BACKEND_REJECTED");
    assert_eq!(err.message, "No images generated");
}

#[test]
fn imaging_errors_are_client_errors() {
    let err = ApiError::from(ImagingError::TooLarge { size: 11 });
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.code, "E_TOO_LARGE");
}

#[tokio::test]
async fn error_body_shape() {
    let response = ApiError::not_found("Project not found").into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({ "success": false, "error": "Project not found", "code": "E_NOT_FOUND" }));
}

#[tokio::test]
async fn health_and_cors() {
    let app = spawn_app(test_app_state()).await;
    let res = reqwest::Client::new()
        .get(format!("{app}/health"))
        .header("Origin", "http://localhost:5173")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert_eq!(res.json::<Value>().await.unwrap()["message"], "SD WebUI Proxy is running");

    let gone = reqwest::get(format!("{app}/healthz")).await.unwrap();
    assert_eq!(gone.status(), 404);
}

#[tokio::test]
async fn large_bodies_are_accepted() {
    let app = spawn_app(test_app_state()).await;
    let big = "A".repeat(5 * 1024 * 1024);
    let res = reqwest::Client::new()
        .post(format!("{app}/api/txt2img"))
        .json(&json!({ "prompt": big }))
        .send()
        .await
        .unwrap();
    // reaches the handler, which then wants an endpoint
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], "SD WebUI endpoint is required");
}

#[tokio::test]
async fn retryable_failures_say_so() {
    let err = ApiError::from(BackendError::Timeout { backend: "ComfyUI" });
    assert!(err.retryable);
    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["retryable"], true);
    assert_eq!(body["error"], "ComfyUI request timed out");
}
