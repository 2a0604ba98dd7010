use super::*;
use axum::Router;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::state::test_helpers::spawn_router;

fn request() -> PoseRequest {
    serde_json::from_value(json!({
        "sourceImage": "data:image/png;base64,QUJD",
        "prompt": "a dancer",
        "poseStrength": 0.8,
        "model": "sdxl",
        "seed": 99
    }))
    .unwrap()
}

// =============================================================================
// workflow
// =============================================================================

#[test]
fn pose_request_defaults() {
    let req: PoseRequest =
        serde_json::from_value(json!({ "sourceImage": "data:image/png;base64,QUJD", "prompt": "p" })).unwrap();
    assert_eq!(req.model, PoseModel::Sd15);
    assert_eq!(req.steps, 20);
    assert!((req.pose_strength - 1.0).abs() < f64::EPSILON);
    assert_eq!((req.width, req.height), (512, 512));
}

#[test]
fn model_checkpoint_names() {
    assert_eq!(PoseModel::Sd15.checkpoint(), "v1-5-pruned-emaonly.ckpt");
    assert_eq!(PoseModel::Sdxl.checkpoint(), "sd_xl_base_1.0.safetensors");
    assert_eq!(PoseModel::Flux.checkpoint(), "flux1-dev.safetensors");
}

#[test]
fn workflow_wires_controlnet_between_prompt_and_sampler() {
    let wf = build_pose_workflow(&request(), "up.png", 99);

    assert_eq!(wf["1"]["inputs"]["image"], "up.png");
    assert_eq!(wf["2"]["class_type"], "OpenposePreprocessor");
    assert_eq!(wf["4"]["inputs"]["conditioning"], json!(["6", 0]));
    assert_eq!(wf["4"]["inputs"]["image"], json!(["2", 0]));
    assert_eq!(wf["4"]["inputs"]["strength"], 0.8);
    assert_eq!(wf["5"]["inputs"]["ckpt_name"], "sd_xl_base_1.0.safetensors");
    assert_eq!(wf["8"]["inputs"]["positive"], json!(["4", 0]));
    assert_eq!(wf["8"]["inputs"]["negative"], json!(["7", 0]));
    assert_eq!(wf["8"]["inputs"]["seed"], 99);
    assert_eq!(wf["10"]["inputs"]["vae"], json!(["5", 2]));
    assert_eq!(wf["11"]["class_type"], "SaveImage");
    assert_eq!(wf["12"]["inputs"]["images"], json!(["2", 0]));
}

#[test]
fn workflow_uses_default_negative_prompt() {
    let mut req = request();
    req.negative_prompt = Some("   ".into());
    let wf = build_pose_workflow(&req, "up.png", 1);
    assert_eq!(wf["7"]["inputs"]["text"], DEFAULT_NEGATIVE_PROMPT);

    req.negative_prompt = Some("extra limbs".into());
    let wf = build_pose_workflow(&req, "up.png", 1);
    assert_eq!(wf["7"]["inputs"]["text"], "extra limbs");
}

// =============================================================================
// history parsing
// =============================================================================

#[test]
fn outputs_found_under_prompt_id_or_top_level() {
    let nested = json!({ "abc": { "outputs": { "11": {} } } });
    assert!(extract_outputs(&nested, "abc").is_some());
    let flat = json!({ "outputs": { "11": {} } });
    assert!(extract_outputs(&flat, "abc").is_some());
    assert!(extract_outputs(&json!({}), "abc").is_none());
}

#[test]
fn failed_history_reports_the_execution_error() {
    let history = json!({ "p-1": {
        "outputs": {},
        "status": {
            "status_str": "error",
            "completed": false,
            "messages": [
                ["execution_start", { "prompt_id": "p-1" }],
                ["execution_error", { "node_type": "OpenposePreprocessor", "exception_message": "node not found\n" }]
            ]
        }
    } });
    assert_eq!(
        execution_failure(&history, "p-1").as_deref(),
        Some("ComfyUI workflow failed: OpenposePreprocessor: node not found")
    );

    let silent = json!({ "p-1": { "outputs": {}, "status": { "status_str": "success", "completed": true } } });
    assert_eq!(execution_failure(&silent, "p-1").as_deref(), Some("ComfyUI workflow completed without outputs"));

    let running = json!({ "p-1": { "outputs": {}, "status": { "status_str": "running", "completed": false } } });
    assert_eq!(execution_failure(&running, "p-1"), None);
    assert_eq!(execution_failure(&json!({}), "p-1"), None);
}

#[test]
fn find_image_prefers_named_node_then_any() {
    let outputs = json!({
        "9": { "images": [{ "filename": "other.png" }] },
        "11": { "images": [{ "filename": "main.png", "subfolder": "s", "type": "temp" }] }
    });
    let image = find_image_output(&outputs, "11").unwrap();
    assert_eq!(image, ImageRef { filename: "main.png".into(), subfolder: "s".into(), kind: "temp".into() });

    let fallback = find_image_output(&json!({ "9": { "images": [{ "filename": "other.png" }] } }), "11").unwrap();
    assert_eq!(fallback.filename, "other.png");
    assert_eq!(fallback.kind, "output");

    assert!(find_image_output(&json!({ "11": { "text": ["x"] } }), "11").is_none());
}

#[test]
fn object_info_lists_models() {
    let info = json!({
        "CheckpointLoaderSimple": { "input": { "required": { "ckpt_name": [["a.ckpt", "b.safetensors"]] } } },
        "ControlNetLoader": { "input": { "required": { "control_net_name": [["openpose.pth"]] } } }
    });
    let models = parse_object_info(&info);
    assert_eq!(models.models, vec!["a.ckpt", "b.safetensors"]);
    assert_eq!(models.controlnets, vec!["openpose.pth"]);
    assert_eq!(parse_object_info(&json!({})), AvailableModels { models: vec![], controlnets: vec![] });
}

#[test]
fn view_mime_from_extension() {
    assert_eq!(mime_for("x.JPG"), "image/jpeg");
    assert_eq!(mime_for("x.webp"), "image/webp");
    assert_eq!(mime_for("x"), "image/png");
}

// =============================================================================
// client against a fake ComfyUI
// =============================================================================

async fn fake_comfy(polls: Arc<AtomicU32>) -> String {
    let router = Router::new()
        .route(
            "/upload/image",
            post(|| async { axum::Json(json!({ "name": "up.png", "subfolder": "", "type": "input" })) }),
        )
        .route("/prompt", post(|| async { axum::Json(json!({ "prompt_id": "p-1", "number": 0 })) }))
        .route(
            "/history/{id}",
            get(|State(polls): State<Arc<AtomicU32>>| async move {
                if polls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return axum::Json(json!({}));
                }
                axum::Json(json!({ "p-1": { "outputs": {
                    "11": { "images": [{ "filename": "out.png", "subfolder": "", "type": "output" }] },
                    "12": { "images": [{ "filename": "pose.png", "subfolder": "", "type": "output" }] }
                } } }))
            }),
        )
        .route(
            "/view",
            get(|Query(q): Query<HashMap<String, String>>| async move { q.get("filename").cloned().unwrap_or_default() }),
        )
        .route("/system_stats", get(|| async { axum::Json(json!({ "system": {} })) }))
        .with_state(polls);
    spawn_router(router).await
}

#[tokio::test]
async fn pose_run_uploads_polls_and_downloads() {
    let polls = Arc::new(AtomicU32::new(0));
    let base = fake_comfy(polls.clone()).await;
    let client = ComfyUiClient::new(reqwest::Client::new(), &base, None)
        .unwrap()
        .with_polling(Duration::from_millis(5), 10);

    let result = client.generate_with_pose(&request()).await.unwrap();

    assert_eq!(result.prompt_id, "p-1");
    assert_eq!(result.seed, 99);
    assert_eq!(result.generated_image, DataUrl::encode("image/png", b"out.png"));
    assert_eq!(result.pose_image, Some(DataUrl::encode("image/png", b"pose.png")));
    assert_eq!(polls.load(Ordering::SeqCst), 2);
    assert!(client.check().await.is_ok());
}

#[tokio::test]
async fn pose_run_times_out_when_history_stays_empty() {
    let polls = Arc::new(AtomicU32::new(0));
    let base = fake_comfy(polls.clone()).await;
    let client = ComfyUiClient::new(reqwest::Client::new(), &base, None)
        .unwrap()
        .with_polling(Duration::from_millis(1), 1);

    let err = client.generate_with_pose(&request()).await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout { .. }));
}

#[tokio::test]
async fn pose_run_stops_polling_when_the_workflow_errors() {
    let polls = Arc::new(AtomicU32::new(0));
    let router = Router::new()
        .route(
            "/upload/image",
            post(|| async { axum::Json(json!({ "name": "up.png", "subfolder": "", "type": "input" })) }),
        )
        .route("/prompt", post(|| async { axum::Json(json!({ "prompt_id": "p-1", "number": 0 })) }))
        .route(
            "/history/{id}",
            get(|State(polls): State<Arc<AtomicU32>>| async move {
                polls.fetch_add(1, Ordering::SeqCst);
                axum::Json(json!({ "p-1": { "outputs": {}, "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [["execution_error", { "node_type": "OpenposePreprocessor", "exception_message": "missing" }]]
                } } }))
            }),
        )
        .with_state(polls.clone());
    let base = spawn_router(router).await;
    let client = ComfyUiClient::new(reqwest::Client::new(), &base, None)
        .unwrap()
        .with_polling(Duration::from_millis(1), 50);

    let err = client.generate_with_pose(&request()).await.unwrap_err();
    match err {
        BackendError::Rejected(message) => assert!(message.contains("OpenposePreprocessor: missing"), "{message}"),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(polls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pose_run_rejects_non_data_url_source() {
    let client = ComfyUiClient::new(reqwest::Client::new(), "http://127.0.0.1:1", None).unwrap();
    let mut req = request();
    req.source_image = "https://example.com/a.png".into();
    assert!(matches!(client.generate_with_pose(&req).await, Err(BackendError::InvalidRequest(_))));
}
