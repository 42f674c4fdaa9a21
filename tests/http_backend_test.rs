// Integration tests for the AUTOMATIC1111-compatible HTTP backend,
// driven against a mockito server.

use mockito::{Matcher, Server};
use serde_json::json;
use splitbot::config::QueueConfig;
use splitbot::{
    GenerationBackend, GenerationOutcome, GenerationParams, HttpBackend, ImageQueue, SafetyGate,
    SharedBackend,
};
use std::time::Duration;

// "PNG" after base64
const ENCODED: &str = "UE5H";

fn backend(url: &str) -> HttpBackend {
    HttpBackend::new(url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_txt2img_sends_params_and_decodes_image() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/sdapi/v1/txt2img")
        .match_body(Matcher::PartialJson(json!({
            "prompt": "a lighthouse at dusk",
            "negative_prompt": "low quality, blurry, distorted, deformed, ugly, bad anatomy",
            "width": 768,
            "height": 768,
            "steps": 20,
            "cfg_scale": 7.5
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "images": [ENCODED], "info": "{}" }).to_string())
        .create_async()
        .await;

    let mut backend = backend(&server.url());
    let bytes = backend
        .generate(&GenerationParams::new("a lighthouse at dusk"))
        .await
        .unwrap();

    assert_eq!(bytes, b"PNG");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_error_reports_status_and_body() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/sdapi/v1/txt2img")
        .with_status(500)
        .with_body("CUDA out of memory")
        .create_async()
        .await;

    let mut backend = backend(&server.url());
    let err = backend
        .generate(&GenerationParams::new("a fox"))
        .await
        .unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("500"));
    assert!(message.contains("CUDA out of memory"));
}

#[tokio::test]
async fn test_empty_image_list_is_an_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/sdapi/v1/txt2img")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"images": []}"#)
        .create_async()
        .await;

    let mut backend = backend(&server.url());
    let err = backend
        .generate(&GenerationParams::new("a fox"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no images"));
}

#[tokio::test]
async fn test_load_and_unload_track_residency() {
    let mut server = Server::new_async().await;
    let load = server
        .mock("POST", "/sdapi/v1/reload-checkpoint")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let unload = server
        .mock("POST", "/sdapi/v1/unload-checkpoint")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let mut backend = backend(&server.url());
    assert!(!backend.is_loaded());
    backend.load().await.unwrap();
    assert!(backend.is_loaded());
    backend.unload().await.unwrap();
    assert!(!backend.is_loaded());

    load.assert_async().await;
    unload.assert_async().await;
}

#[tokio::test]
async fn test_queue_drives_http_backend_end_to_end() {
    let mut server = Server::new_async().await;
    let load = server
        .mock("POST", "/sdapi/v1/reload-checkpoint")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let generate = server
        .mock("POST", "/sdapi/v1/txt2img")
        .match_body(Matcher::PartialJson(json!({ "width": 1024, "steps": 30 })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "images": [ENCODED] }).to_string())
        .expect(1)
        .create_async()
        .await;
    let unload = server
        .mock("POST", "/sdapi/v1/unload-checkpoint")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let shared = SharedBackend::new(Box::new(backend(&server.url())), true);
    let queue = ImageQueue::new(&QueueConfig::default(), SafetyGate::new());

    // Out-of-range values are clamped before they reach the server
    let params = GenerationParams {
        width: 4096,
        steps: 150,
        ..GenerationParams::new("a castle in the clouds")
    };
    let ticket = queue
        .submit(shared.request("guild:chan:alice", params))
        .into_ticket()
        .unwrap();

    assert_eq!(ticket.outcome().await, GenerationOutcome::Complete(b"PNG".to_vec()));
    load.assert_async().await;
    generate.assert_async().await;
    unload.assert_async().await;
    assert!(!shared.is_loaded().await);
}
