//! Gemini image generation (`models/{model}:generateContent`).

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, instrument};

use folio_core::defaults::GEMINI_API_BASE;
use folio_core::{Error, GeneratedImage, ImageBackend, Result};

/// Provider name images are attributed to.
pub const GEMINI_PROVIDER: &str = "gemini";

const DEFAULT_MIME_TYPE: &str = "image/png";

/// Configuration for the Gemini image backend.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: GEMINI_API_BASE.to_string(),
            api_key: None,
            timeout_seconds: 60,
        }
    }
}

impl GeminiConfig {
    /// Load from `GEMINI_API_BASE` and `GEMINI_API_KEY` (or `GOOGLE_API_KEY`).
    pub fn from_env() -> Self {
        let non_empty = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            api_base: non_empty("GEMINI_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| GEMINI_API_BASE.to_string()),
            api_key: non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY")),
            ..Self::default()
        }
    }
}

/// Image backend for the Gemini image model family.
pub struct GeminiImageBackend {
    client: Client,
    config: GeminiConfig,
}

impl GeminiImageBackend {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Inference(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::from_env())
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!(
            "{}/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model_path
        )
    }

    fn payload(prompt: &str) -> Value {
        let safety_settings: Vec<Value> = [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| json!({"category": category, "threshold": "BLOCK_ONLY_HIGH"}))
        .collect();

        json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": prompt}],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
            },
            "safetySettings": safety_settings,
        })
    }

    /// First inline image across all candidates and parts.
    fn extract_image(payload: &Value) -> Option<GeneratedImage> {
        let candidates = payload.get("candidates").and_then(Value::as_array)?;
        candidates
            .iter()
            .filter_map(|candidate| {
                candidate
                    .get("content")
                    .and_then(|content| content.get("parts"))
                    .and_then(Value::as_array)
            })
            .flatten()
            .find_map(|part| {
                let inline = part.get("inlineData").or_else(|| part.get("inline_data"))?;
                let data = inline.get("data").and_then(Value::as_str)?;
                if data.is_empty() {
                    return None;
                }
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_MIME_TYPE);
                Some(GeneratedImage {
                    mime_type: mime_type.to_string(),
                    data: data.to_string(),
                })
            })
    }
}

#[async_trait]
impl ImageBackend for GeminiImageBackend {
    fn provider_name(&self) -> &str {
        GEMINI_PROVIDER
    }

    #[instrument(skip(self, prompt), fields(subsystem = "inference", component = "gemini", op = "generate_image", model = %model_name, prompt_len = prompt.len()))]
    async fn generate_image(&self, prompt: &str, model_name: &str) -> Result<GeneratedImage> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            Error::Config("GEMINI_API_KEY (or GOOGLE_API_KEY) must be set for Gemini image models".into())
        })?;

        let response = self
            .client
            .post(self.endpoint_for_model(model_name))
            .query(&[("key", api_key)])
            .json(&Self::payload(prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("Image generation timed out: {}", e))
                } else {
                    Error::Inference(format!("Image request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), error = %message, "Image provider returned an error");
            return Err(Error::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse image response: {}", e)))?;

        let image = Self::extract_image(&payload).ok_or_else(|| {
            Error::Inference("Image provider response did not include image data".to_string())
        })?;

        BASE64
            .decode(image.data.as_bytes())
            .map_err(|e| Error::Inference(format!("Image payload is not valid base64: {}", e)))?;

        debug!(mime_type = %image.mime_type, data_len = image.data.len(), "Image generated");
        Ok(image)
    }
}
