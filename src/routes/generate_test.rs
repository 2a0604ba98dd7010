use super::*;
use axum::Router;
use axum::http::{StatusCode, header};
use axum::routing::{get, post};
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::{Arc, Mutex};

use crate::model::{AppSettings, EndpointConfig};
use crate::services::store::{Action, Workspace};
use crate::state::test_helpers::{sample_project, spawn_app, spawn_router, test_app_state, test_app_state_with, with_config};

type Seen = Arc<Mutex<Vec<Value>>>;

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([30, 30, 30])));
    imaging::encode_png(&img).unwrap()
}

fn png_url(width: u32, height: u32) -> String {
    DataUrl::encode("image/png", &png_bytes(width, height))
}

/// Fake WebUI answering every generation with a 64x48 PNG.
async fn fake_webui(seen: Seen) -> String {
    let payload = imaging::base64_payload(&png_url(64, 48)).to_string();
    let txt = payload.clone();
    let router = Router::new()
        .route(
            "/sdapi/v1/txt2img",
            post(move |axum::extract::State(seen): axum::extract::State<Seen>, Json(body): Json<Value>| {
                let image = txt.clone();
                async move {
                    seen.lock().unwrap().push(body);
                    Json(json!({ "images": [image], "info": "{\"seed\": 42}" }))
                }
            }),
        )
        .route(
            "/sdapi/v1/img2img",
            post(move |axum::extract::State(seen): axum::extract::State<Seen>, Json(body): Json<Value>| {
                let image = payload.clone();
                async move {
                    seen.lock().unwrap().push(body);
                    Json(json!({ "images": [image], "info": "{}" }))
                }
            }),
        )
        .route("/sdapi/v1/options", get(|| async { Json(json!({ "sd_model_checkpoint": "v1-5" })) }))
        .with_state(seen);
    spawn_router(router).await
}

fn workspace_with(edit: impl FnOnce(&mut AppSettings)) -> Workspace {
    let mut settings = AppSettings::default();
    edit(&mut settings);
    let mut ws = Workspace::new();
    ws.apply(Action::SetSettings(settings));
    ws
}

async fn webui_app(nsfw_mode: bool) -> (String, AppState, Seen) {
    let seen = Seen::default();
    let webui = fake_webui(seen.clone()).await;
    let state = test_app_state_with(workspace_with(|s| {
        s.colab.api_endpoint = webui;
        s.nsfw_mode = nsfw_mode;
    }));
    (spawn_app(state.clone()).await, state, seen)
}

// =============================================================================
// negative prompt guard
// =============================================================================

#[test]
fn block_list_is_appended_unless_nsfw_mode() {
    assert_eq!(guarded_negative_prompt("", false), NSFW_BLOCK_LIST);
    assert_eq!(guarded_negative_prompt(" blurry ", false), format!("blurry, {NSFW_BLOCK_LIST}"));
    assert_eq!(guarded_negative_prompt("blurry", true), "blurry");
    assert_eq!(guarded_negative_prompt("", true), "");
}

// =============================================================================
// generate
// =============================================================================

#[tokio::test]
async fn generate_without_endpoint_is_not_configured() {
    let app = spawn_app(test_app_state()).await;
    let res = reqwest::Client::new()
        .post(format!("{app}/api/generate"))
        .json(&json!({ "prompt": "a cat" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap()["code"], "E_BACKEND_NOT_CONFIGURED");
}

#[tokio::test]
async fn generate_sends_fixed_sampler_and_block_list() {
    let (app, _, seen) = webui_app(false).await;
    let res = reqwest::Client::new()
        .post(format!("{app}/api/generate"))
        .json(&json!({ "prompt": "a cat", "negativePrompt": "blurry" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let sent = seen.lock().unwrap()[0].clone();
    assert_eq!(sent["sampler_name"], GENERATION_SAMPLER);
    assert_eq!(sent["negative_prompt"], format!("blurry, {NSFW_BLOCK_LIST}"));
    assert_eq!(sent["restore_faces"], false);
    assert_eq!(sent["enable_hr"], false);
    assert_eq!(sent["seed"], -1);
}

#[tokio::test]
async fn generate_records_against_current_project() {
    let seen = Seen::default();
    let webui = fake_webui(seen.clone()).await;
    let project = sample_project("Launch");
    let mut ws = workspace_with(|s| s.colab.api_endpoint = webui);
    ws.apply(Action::AddProject(project.clone()));
    ws.apply(Action::SetCurrentProject(Some(project.clone())));
    let state = test_app_state_with(ws);
    let app = spawn_app(state.clone()).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{app}/api/generate"))
        .json(&json!({ "prompt": "a cat", "negativePrompt": "blurry", "settings": { "model": "sdxl", "steps": 30, "cfgScale": 6.5, "width": 64, "height": 48, "seed": 7 } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["info"]["seed"], 42);
    let image = &body["image"];
    assert!(image["filename"].as_str().unwrap().starts_with("generated_"));
    assert_eq!(image["negativePrompt"], "blurry");
    assert_eq!(image["metadata"]["width"], 64);
    assert_eq!(image["metadata"]["height"], 48);

    let ws = state.workspace.read().await;
    assert_eq!(ws.generated_images.len(), 1);
    assert_eq!(ws.generated_images[0].project_id, project.id);
    assert_eq!(seen.lock().unwrap()[0]["seed"], 7);
}

#[tokio::test]
async fn nsfw_mode_leaves_negative_prompt_alone() {
    let (app, _, seen) = webui_app(true).await;
    reqwest::Client::new()
        .post(format!("{app}/api/generate"))
        .json(&json!({ "prompt": "a cat" }))
        .send()
        .await
        .unwrap();
    assert_eq!(seen.lock().unwrap()[0]["negative_prompt"], "");
}

// =============================================================================
// inpaint & mask preview
// =============================================================================

#[tokio::test]
async fn inpaint_paints_mask_from_strokes() {
    let (app, state, seen) = webui_app(false).await;
    let res = reqwest::Client::new()
        .post(format!("{app}/api/inpaint"))
        .json(&json!({
            "image": png_url(40, 30),
            "prompt": "replace sky",
            "strokes": [{ "brushSize": 10, "points": [[5.0, 5.0], [30.0, 5.0]] }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let sent = seen.lock().unwrap()[0].clone();
    assert_eq!(sent["denoising_strength"], DEFAULT_INPAINT_STRENGTH);
    assert_eq!((sent["width"].as_u64(), sent["height"].as_u64()), (Some(40), Some(30)));
    let mask = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, sent["mask"].as_str().unwrap()).unwrap();
    assert_eq!(imaging::image_dimensions(&mask).unwrap(), (40, 30));
    assert!(!sent["init_images"][0].as_str().unwrap().starts_with("data:"));

    let ws = state.workspace.read().await;
    assert!(ws.generated_images[0].filename.starts_with("inpainted_"));
    assert_eq!(ws.generated_images[0].settings.denoising_strength, Some(DEFAULT_INPAINT_STRENGTH));
}

#[tokio::test]
async fn inpaint_rejects_header_only_base_image() {
    let (app, state, seen) = webui_app(false).await;
    let mut truncated = png_bytes(64, 48);
    truncated.truncate(45);
    assert!(imaging::image_dimensions(&truncated).is_ok());

    let res = reqwest::Client::new()
        .post(format!("{app}/api/inpaint"))
        .json(&json!({
            "image": DataUrl::encode("image/png", &truncated),
            "prompt": "x",
            "strokes": [{ "brushSize": 10, "points": [[5.0, 5.0]] }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap()["code"], "E_IMAGE_DECODE");
    assert!(seen.lock().unwrap().is_empty());
    assert!(state.workspace.read().await.generated_images.is_empty());
}

#[tokio::test]
async fn inpaint_replays_far_off_strokes_quickly() {
    let (app, _, seen) = webui_app(false).await;
    let started = std::time::Instant::now();
    let res = reqwest::Client::new()
        .post(format!("{app}/api/inpaint"))
        .json(&json!({
            "image": png_url(64, 64),
            "prompt": "x",
            "strokes": [{ "brushSize": 20, "points": [[0.0, 32.0], [1.0e12, 32.0]] }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn inpaint_rejects_empty_mask() {
    let (app, _, seen) = webui_app(false).await;
    let res = reqwest::Client::new()
        .post(format!("{app}/api/inpaint"))
        .json(&json!({ "image": png_url(10, 10), "prompt": "x", "strokes": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], EMPTY_MASK);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn mask_preview_overlays_strokes() {
    let app = spawn_app(test_app_state()).await;
    let body: Value = reqwest::Client::new()
        .post(format!("{app}/api/mask/preview"))
        .json(&json!({
            "image": png_url(20, 20),
            "strokes": [{ "brushSize": 6, "points": [[10.0, 10.0]] }],
            "view": { "zoom": 2.0 },
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(body["coverage"].as_f64().unwrap() > 0.0);
    let preview = DataUrl::parse(body["preview"].as_str().unwrap()).unwrap();
    let rgba = imaging::decode_rgba(&preview.bytes).unwrap();
    assert_eq!(rgba.dimensions(), (20, 20));
    // screen (10,10) at zoom 2 lands on image pixel (5,5)
    assert!(rgba.get_pixel(5, 5).0[0] > rgba.get_pixel(15, 15).0[0]);
    // painted region maps back around the stroke point on screen
    let bounds = &body["bounds"];
    let (x, w) = (bounds["x"].as_f64().unwrap(), bounds["width"].as_f64().unwrap());
    assert!(x <= 10.0 && x + w >= 10.0);
}

// =============================================================================
// hugging face
// =============================================================================

async fn fake_hf() -> String {
    let png = png_bytes(16, 16);
    let router = Router::new()
        .route(
            "/models/org/good",
            post(move || {
                let png = png.clone();
                async move { ([(header::CONTENT_TYPE, "image/png")], png) }
            }),
        )
        .route("/models/org/locked", post(|| async { (StatusCode::UNAUTHORIZED, "{}") }));
    spawn_router(router).await
}

async fn hf_app(model: &str) -> (String, AppState) {
    let hf = fake_hf().await;
    let model = model.to_string();
    let state = test_app_state_with(workspace_with(|s| {
        s.hugging_face.api_key = "hf_key".into();
        s.hugging_face.model = model;
    }));
    let state = with_config(&state, |c| c.hf_api_base_url = hf);
    (spawn_app(state.clone()).await, state)
}

#[tokio::test]
async fn hf_generate_records_image() {
    let (app, state) = hf_app("org/good").await;
    let body: Value = reqwest::Client::new()
        .post(format!("{app}/api/hf/generate"))
        .json(&json!({ "prompt": "a lighthouse" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["image"]["url"].as_str().unwrap().starts_with("data:image/png;base64,"));
    assert_eq!(body["image"]["metadata"]["width"], 16);
    assert_eq!(state.workspace.read().await.generated_images.len(), 1);
}

#[tokio::test]
async fn hf_invalid_key_is_401() {
    let (app, _) = hf_app("org/locked").await;
    let res = reqwest::Client::new()
        .post(format!("{app}/api/hf/generate"))
        .json(&json!({ "prompt": "a lighthouse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], "Invalid Hugging Face API key");
}

// =============================================================================
// waifu2x & wan2.2
// =============================================================================

async fn fake_waifu2x() -> String {
    let router = Router::new().route(
        "/upscale",
        post(|Json(body): Json<Value>| async move {
            if body["image"] == "data:image/png;base64,YmFk" {
                return Json(json!({ "success": false, "error": "decode failed" }));
            }
            Json(json!({ "success": true, "data": { "upscaledImage": "data:image/png;base64,QUJD", "processingTime": 5 } }))
        }),
    );
    spawn_router(router).await
}

#[tokio::test]
async fn upscale_batch_keeps_per_image_results() {
    let waifu = fake_waifu2x().await;
    let state = test_app_state_with(workspace_with(|s| s.waifu2x = EndpointConfig { api_endpoint: waifu, auth_token: None }));
    let app = spawn_app(state).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{app}/api/upscale/batch"))
        .json(&json!({ "images": [
            { "image": "data:image/png;base64,QUJD", "scale": 2 },
            { "image": "data:image/png;base64,YmFk", "scale": 4 },
        ] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["success"], false);
    assert_eq!(body["succeeded"], 1);
    assert_eq!(body["results"][0]["data"]["processingTime"], 5);
    assert_eq!(body["results"][1]["error"], "decode failed");
}

#[tokio::test]
async fn upscale_rejects_bad_scale_before_calling_backend() {
    let state = test_app_state_with(workspace_with(|s| s.waifu2x.api_endpoint = "http://127.0.0.1:1".into()));
    let app = spawn_app(state).await;
    let res = reqwest::Client::new()
        .post(format!("{app}/api/upscale"))
        .json(&json!({ "image": "data:image/png;base64,QUJD", "scale": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn video_round_trip_through_task_endpoints() {
    let router = Router::new()
        .route("/generate-video", post(|| async { Json(json!({ "success": true, "task_id": "t-1", "progress": 0 })) }))
        .route(
            "/status/{task}",
            get(|axum::extract::Path(task): axum::extract::Path<String>| async move {
                Json(json!({ "success": true, "taskId": task, "progress": 50 }))
            }),
        )
        .route("/cancel", post(|| async { Json(json!({ "success": true })) }));
    let wan = spawn_router(router).await;
    let state = test_app_state_with(workspace_with(|s| s.wan22.api_endpoint = wan));
    let app = spawn_app(state).await;
    let http = reqwest::Client::new();

    let res = http.post(format!("{app}/api/video")).json(&json!({ "type": "text-to-video" })).send().await.unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], "Prompt is required");

    let started: Value = http
        .post(format!("{app}/api/video"))
        .json(&json!({ "type": "text-to-video", "prompt": "waves" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["taskId"], "t-1");

    let status: Value = reqwest::get(format!("{app}/api/video/t-1")).await.unwrap().json().await.unwrap();
    assert_eq!(status["progress"], 50.0);

    let res = http.post(format!("{app}/api/video/t-1/cancel")).send().await.unwrap();
    assert_eq!(res.status(), 200);
}

// =============================================================================
// colab api server
// =============================================================================

#[tokio::test]
async fn colab_generate_records_top_level_image() {
    let seen = Seen::default();
    let image = png_url(8, 8);
    let router = Router::new()
        .route(
            "/generate",
            post(move |axum::extract::State(seen): axum::extract::State<Seen>, Json(body): Json<Value>| {
                let image = image.clone();
                async move {
                    seen.lock().unwrap().push(body);
                    Json(json!({ "success": true, "image": image }))
                }
            }),
        )
        .with_state(seen.clone());
    let colab = spawn_router(router).await;
    let state = test_app_state_with(workspace_with(|s| s.colab.api_endpoint = colab));
    let app = spawn_app(state.clone()).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{app}/api/colab/generate"))
        .json(&json!({ "prompt": "studio shot", "width": 8, "height": 8, "steps": 12, "cfgScale": 5.0, "model": "sdxl" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(body["image"]["filename"].as_str().unwrap().starts_with("colab_"));
    assert_eq!(seen.lock().unwrap()[0]["num_inference_steps"], 12);
    assert_eq!(seen.lock().unwrap()[0]["negative_prompt"], NSFW_BLOCK_LIST);
    assert_eq!(state.workspace.read().await.generated_images[0].settings.steps, 12);
}

// =============================================================================
// status
// =============================================================================

#[tokio::test]
async fn backends_status_reports_every_backend() {
    let (app, _, _) = webui_app(false).await;
    let body: Value = reqwest::get(format!("{app}/api/backends/status")).await.unwrap().json().await.unwrap();
    let backends = body["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 6);

    let find = |name: &str| backends.iter().find(|b| b["backend"] == name).unwrap().clone();
    assert_eq!(find("sdwebui")["connected"], true);
    assert_eq!(find("comfyui")["connected"], false);
    assert_eq!(find("comfyui")["error"], "ComfyUI endpoint not configured");
    assert_eq!(find("huggingface")["error"], "Hugging Face API key is required");
}

#[tokio::test]
async fn backends_status_includes_drive_with_token() {
    let state = with_config(&test_app_state(), |c| {
        c.drive_api_base_url = "http://127.0.0.1:1".into();
        c.drive_upload_base_url = "http://127.0.0.1:1/upload".into();
    });
    let app = spawn_app(state).await;
    let body: Value = reqwest::Client::new()
        .get(format!("{app}/api/backends/status"))
        .bearer_auth("ya29.x")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let backends = body["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 7);
    let drive = backends.iter().find(|b| b["backend"] == "gdrive").unwrap();
    assert_eq!(drive["connected"], false);
}
