//! Mock backends for deterministic testing.
//!
//! Embeddings are derived from the text itself, generation replies are
//! scripted, and every call is logged for assertions.
//!
//! ```rust,ignore
//! use folio_inference::mock::MockGenerationBackend;
//!
//! let backend = MockGenerationBackend::new("mock-gen")
//!     .with_default_response("Summary")
//!     .with_response_mapping("FINAL PROMPT", "plan\nFINAL PROMPT: a fox");
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use folio_core::{
    ChatReply, EmbeddingBackend, Error, GeneratedImage, GenerationBackend, ImageBackend,
    PromptMessage, PromptRole, Result, Vector,
};

type ErrorFactory = Arc<dyn Fn() -> Error + Send + Sync>;

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: String,
    pub system: String,
    pub input: String,
}

#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<MockCall>>>);

impl CallLog {
    fn push(&self, operation: &str, system: &str, input: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockCall {
                operation: operation.to_string(),
                system: system.to_string(),
                input: input.to_string(),
            });
    }

    fn snapshot(&self) -> Vec<MockCall> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Failure injection shared by the mocks: fail the next `remaining` calls.
#[derive(Clone)]
struct Failures {
    remaining: Arc<AtomicUsize>,
    error: ErrorFactory,
}

impl Failures {
    fn none() -> Self {
        Self {
            remaining: Arc::new(AtomicUsize::new(0)),
            error: Arc::new(|| Error::Inference("Simulated failure for testing".to_string())),
        }
    }

    fn take(&self) -> Option<Error> {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| (self.error)())
    }
}

// =============================================================================
// EMBEDDINGS
// =============================================================================

/// Deterministic embedding backend.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    calls: CallLog,
    failures: Failures,
}

impl Default for MockEmbeddingBackend {
    fn default() -> Self {
        Self::new(8)
    }
}

impl MockEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: CallLog::default(),
            failures: Failures::none(),
        }
    }

    /// Fail the next `times` calls with the error `make` builds.
    pub fn failing(mut self, times: usize, make: impl Fn() -> Error + Send + Sync + 'static) -> Self {
        self.failures = Failures {
            remaining: Arc::new(AtomicUsize::new(times)),
            error: Arc::new(make),
        };
        self
    }

    /// Texts of every embedding request, one entry per call.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.snapshot()
    }

    /// Unit vector derived from the characters of `text`.
    pub fn vector_for(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0f32; dimension.max(1)];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % vec.len();
            vec[idx] += 0.1;
        }
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
        vec
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.calls.push("embed", "", &texts.join("\u{1f}"));
        if let Some(err) = self.failures.take() {
            return Err(err);
        }
        Ok(texts
            .iter()
            .map(|t| Vector::from(Self::vector_for(t, self.dimension)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

// =============================================================================
// GENERATION
// =============================================================================

/// Scripted generation backend.
///
/// Reply precedence: queued scripted replies, then the first mapping whose
/// needle occurs in the input, then the default reply.
#[derive(Clone)]
pub struct MockGenerationBackend {
    name: String,
    default_response: String,
    mappings: Vec<(String, String)>,
    scripted: Arc<Mutex<VecDeque<String>>>,
    delay: Option<Duration>,
    failure_rate: f64,
    calls: CallLog,
    failures: Failures,
}

impl MockGenerationBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_response: "Mock response".to_string(),
            mappings: Vec::new(),
            scripted: Arc::new(Mutex::new(VecDeque::new())),
            delay: None,
            failure_rate: 0.0,
            calls: CallLog::default(),
            failures: Failures::none(),
        }
    }

    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Reply with `response` whenever the input contains `needle`.
    pub fn with_response_mapping(
        mut self,
        needle: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        self.mappings.push((needle.into(), response.into()));
        self
    }

    /// Queue a one-shot reply.
    pub fn with_scripted_response(self, response: impl Into<String>) -> Self {
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response.into());
        self
    }

    /// Sleep before answering; pairs with `tokio::time::pause` in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Randomly fail this fraction (0.0 - 1.0) of calls.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Fail the next `times` calls with the error `make` builds.
    pub fn failing(mut self, times: usize, make: impl Fn() -> Error + Send + Sync + 'static) -> Self {
        self.failures = Failures {
            remaining: Arc::new(AtomicUsize::new(times)),
            error: Arc::new(make),
        };
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.snapshot()
    }

    pub fn call_count(&self) -> usize {
        self.calls.snapshot().len()
    }

    fn random_failure(&self) -> bool {
        use rand::Rng;
        self.failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.failure_rate
    }

    async fn reply(&self, operation: &str, system: &str, input: &str) -> Result<String> {
        self.calls.push(operation, system, input);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.take() {
            return Err(err);
        }
        if self.random_failure() {
            return Err(Error::Inference("Simulated failure for testing".to_string()));
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(response) = scripted {
            return Ok(response);
        }
        let mapped = self
            .mappings
            .iter()
            .find(|(needle, _)| input.contains(needle.as_str()) || system.contains(needle.as_str()))
            .map(|(_, response)| response.clone());
        Ok(mapped.unwrap_or_else(|| self.default_response.clone()))
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.reply("generate", system, prompt).await
    }

    async fn chat(&self, messages: &[PromptMessage]) -> Result<ChatReply> {
        let system = messages
            .iter()
            .find(|m| m.role == PromptRole::System)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let transcript: Vec<&str> = messages
            .iter()
            .filter(|m| m.role != PromptRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let content = self.reply("chat", system, &transcript.join("\n")).await?;
        Ok(ChatReply {
            id: Some(format!("mock-{}", self.call_count())),
            content,
        })
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// IMAGES
// =============================================================================

/// Image backend returning a fixed tiny PNG payload.
#[derive(Clone)]
pub struct MockImageBackend {
    provider: String,
    image: GeneratedImage,
    calls: CallLog,
    failures: Failures,
}

impl MockImageBackend {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            image: GeneratedImage {
                mime_type: "image/png".to_string(),
                data: "iVBORw0KGgo=".to_string(),
            },
            calls: CallLog::default(),
            failures: Failures::none(),
        }
    }

    pub fn with_image(mut self, image: GeneratedImage) -> Self {
        self.image = image;
        self
    }

    /// Fail the next `times` calls with `Error::Provider{status, message}`.
    pub fn rejecting(mut self, times: usize, status: u16, message: &str) -> Self {
        let message = message.to_string();
        self.failures = Failures {
            remaining: Arc::new(AtomicUsize::new(times)),
            error: Arc::new(move || Error::Provider {
                status,
                message: message.clone(),
            }),
        };
        self
    }

    /// Prompts received, with the model name in `system`.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.snapshot()
    }
}

#[async_trait]
impl ImageBackend for MockImageBackend {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    async fn generate_image(&self, prompt: &str, model_name: &str) -> Result<GeneratedImage> {
        self.calls.push("generate_image", model_name, prompt);
        if let Some(err) = self.failures.take() {
            return Err(err);
        }
        Ok(self.image.clone())
    }
}
