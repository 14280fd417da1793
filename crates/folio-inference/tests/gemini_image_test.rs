//! HTTP-level tests for the Gemini image backend.

use folio_core::{Error, ImageBackend};
use folio_inference::gemini::{GeminiConfig, GeminiImageBackend};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "gemini-2.5-flash-image";

fn backend_for(server: &MockServer) -> GeminiImageBackend {
    GeminiImageBackend::new(GeminiConfig {
        api_base: server.uri(),
        api_key: Some("test-key".to_string()),
        timeout_seconds: 10,
    })
    .unwrap()
}

#[tokio::test]
async fn test_generate_image_returns_inline_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/models/{MODEL}:generateContent")))
        .and(query_param("key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "a lighthouse at dusk"}]}],
            "generationConfig": {"responseModalities": ["IMAGE"]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Rendering"},
                    {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
                ]}
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let image = backend_for(&server)
        .generate_image("a lighthouse at dusk", MODEL)
        .await
        .unwrap();

    assert_eq!(image.mime_type, "image/png");
    assert_eq!(image.data, "iVBORw0KGgo=");
    assert_eq!(image.data_uri(), "data:image/png;base64,iVBORw0KGgo=");
}

#[tokio::test]
async fn test_non_success_status_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("prompt blocked"))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .generate_image("anything", MODEL)
        .await
        .unwrap_err();

    match err {
        Error::Provider { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "prompt blocked");
        }
        other => panic!("expected provider error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_response_without_image_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "I cannot draw that"}]}}]
        })))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .generate_image("anything", MODEL)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("did not include image data"));
}
