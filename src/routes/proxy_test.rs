use super::*;
use axum::Router;
use axum::routing::{get, post};
use std::sync::{Arc, Mutex};

use crate::state::test_helpers::{spawn_app, spawn_router, test_app_state};

type Seen = Arc<Mutex<Vec<Value>>>;

/// Fake WebUI. Prompts containing "fail" get a 500; "empty" gets no images.
async fn fake_webui(seen: Seen) -> String {
    let router = Router::new()
        .route(
            "/sdapi/v1/txt2img",
            post(|axum::extract::State(seen): axum::extract::State<Seen>, Json(body): Json<Value>| async move {
                let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
                seen.lock().unwrap().push(body);
                if prompt.contains("fail") {
                    return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "boom" })));
                }
                if prompt.contains("empty") {
                    return (StatusCode::OK, Json(json!({ "images": [] })));
                }
                (
                    StatusCode::OK,
                    Json(json!({ "images": ["QUJD"], "info": "{\"seed\": 5}", "parameters": { "steps": 20 } })),
                )
            }),
        )
        .route(
            "/sdapi/v1/img2img",
            post(|| async { Json(json!({ "images": ["SU1H"], "info": "{}", "parameters": {} })) }),
        )
        .route(
            "/sdapi/v1/sd-models",
            get(|| async {
                Json(json!([{ "title": "v1-5 [abc]", "model_name": "v1-5", "hash": "abc", "filename": "/m/v1-5.ckpt", "config": null }]))
            }),
        )
        .route("/sdapi/v1/samplers", get(|| async { Json(json!([{ "name": "Euler a" }, { "name": "DDIM" }])) }))
        .route("/sdapi/v1/options", get(|| async { Json(json!({ "sd_model_checkpoint": "", "sd_vae": "vae.pt" })) }))
        .with_state(seen);
    spawn_router(router).await
}

async fn setup() -> (String, String, Seen) {
    let seen = Seen::default();
    let webui = fake_webui(seen.clone()).await;
    let app = spawn_app(test_app_state()).await;
    (app, webui, seen)
}

#[tokio::test]
async fn health_reports_proxy_running() {
    let app = spawn_app(test_app_state()).await;
    let body: Value = reqwest::get(format!("{app}/health")).await.unwrap().json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok", "message": "SD WebUI Proxy is running" }));
}

#[tokio::test]
async fn txt2img_validates_endpoint_then_prompt() {
    let (app, webui, _) = setup().await;
    let http = reqwest::Client::new();

    let res = http.post(format!("{app}/api/txt2img")).json(&json!({ "prompt": "x" })).send().await.unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], ENDPOINT_REQUIRED);

    let res = http
        .post(format!("{app}/api/txt2img"))
        .json(&json!({ "sd_webui_endpoint": webui }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], PROMPT_REQUIRED);
}

#[tokio::test]
async fn txt2img_forwards_defaults_and_overrides() {
    let (app, webui, seen) = setup().await;
    let res = reqwest::Client::new()
        .post(format!("{app}/api/txt2img"))
        .json(&json!({ "sd_webui_endpoint": webui, "prompt": "a fox", "model_checkpoint": "sdxl.safetensors" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["image"], "data:image/png;base64,QUJD");
    assert_eq!(body["info"], json!({ "seed": 5 }));
    assert_eq!(body["parameters"]["steps"], 20);

    let sent = seen.lock().unwrap()[0].clone();
    assert_eq!(sent["sampler_name"], "Euler a");
    assert_eq!(sent["seed"], -1);
    assert_eq!((sent["width"].as_u64(), sent["n_iter"].as_u64()), (Some(512), Some(1)));
    assert_eq!(sent["override_settings"], json!({ "sd_model_checkpoint": "sdxl.safetensors" }));
    assert!(sent.get("sd_webui_endpoint").is_none());
}

#[tokio::test]
async fn upstream_failures_are_500_with_message() {
    let (app, webui, _) = setup().await;
    let http = reqwest::Client::new();

    let res = http
        .post(format!("{app}/api/txt2img"))
        .json(&json!({ "sd_webui_endpoint": webui, "prompt": "fail please" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], "SD WebUI API error: 500");

    let res = http
        .post(format!("{app}/api/txt2img"))
        .json(&json!({ "sd_webui_endpoint": webui, "prompt": "empty result" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], "No images generated");
}

#[tokio::test]
async fn img2img_requires_init_images() {
    let (app, webui, _) = setup().await;
    let http = reqwest::Client::new();

    let res = http
        .post(format!("{app}/api/img2img"))
        .json(&json!({ "sd_webui_endpoint": webui, "prompt": "p" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], INIT_IMAGE_REQUIRED);

    let body: Value = http
        .post(format!("{app}/api/img2img"))
        .json(&json!({ "sd_webui_endpoint": webui, "init_images": ["QUJD"], "prompt": "p" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["image"], "data:image/png;base64,SU1H");
    assert!(body.get("parameters").is_none());
}

#[tokio::test]
async fn models_and_samplers_are_reduced() {
    let (app, webui, _) = setup().await;

    let models: Value = reqwest::get(format!("{app}/api/models?sd_webui_endpoint={webui}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        models["models"],
        json!([{ "title": "v1-5 [abc]", "model_name": "v1-5", "hash": "abc", "filename": "/m/v1-5.ckpt" }])
    );

    let samplers: Value = reqwest::get(format!("{app}/api/samplers?sd_webui_endpoint={webui}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(samplers["samplers"], json!(["Euler a", "DDIM"]));

    let res = reqwest::get(format!("{app}/api/samplers")).await.unwrap();
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn check_connection_defaults_and_fixed_failure_message() {
    let (app, webui, _) = setup().await;
    let http = reqwest::Client::new();

    let body: Value = http
        .post(format!("{app}/api/check-connection"))
        .json(&json!({ "sd_webui_endpoint": webui }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["sd_model_checkpoint"], "Unknown");
    assert_eq!(body["sd_vae"], "vae.pt");

    let res = http
        .post(format!("{app}/api/check-connection"))
        .json(&json!({ "sd_webui_endpoint": "http://127.0.0.1:1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], CONNECTION_FAILED);
}

#[tokio::test]
async fn controlnet_units_go_under_alwayson_scripts() {
    let (app, webui, seen) = setup().await;
    let unit = json!({ "module": "openpose", "model": "control_openpose" });
    let res = reqwest::Client::new()
        .post(format!("{app}/api/controlnet/txt2img"))
        .json(&json!({ "sd_webui_endpoint": webui, "prompt": "dancer", "controlnet_units": [unit.clone()] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(seen.lock().unwrap()[0]["alwayson_scripts"], json!({ "controlnet": { "args": [unit] } }));
}
