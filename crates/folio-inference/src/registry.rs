//! Task-based model lookup.
//!
//! Workflows ask for "the model for this task" and may pass an explicit model
//! id. Generation backends are registered by id; each task names its default.
//! Content that exceeds the large-context threshold is routed to the
//! large-context model when one is configured, whatever else was asked for.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use folio_core::defaults::LARGE_CONTEXT_THRESHOLD_TOKENS;
use folio_core::{
    token_count, EmbeddingBackend, Error, GenerationBackend, ImageBackend, Result,
};

use crate::gemini::{GeminiConfig, GeminiImageBackend};
use crate::openai::{OpenAIBackend, OpenAIConfig};

/// Operations that need a generation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    /// Conversational replies.
    Chat,
    /// Applying transformation prompts to source text.
    Transformation,
    /// Planning image prompts before rendering.
    ImagePlanner,
    /// Inputs too large for the regular models.
    LargeContext,
}

impl ModelTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTask::Chat => "chat",
            ModelTask::Transformation => "transformation",
            ModelTask::ImagePlanner => "image_planner",
            ModelTask::LargeContext => "large_context",
        }
    }
}

impl fmt::Display for ModelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry of generation, embedding and image backends.
#[derive(Clone)]
pub struct ModelRegistry {
    generation: HashMap<String, Arc<dyn GenerationBackend>>,
    defaults: HashMap<ModelTask, String>,
    embedding: Option<Arc<dyn EmbeddingBackend>>,
    image_providers: HashMap<String, Arc<dyn ImageBackend>>,
    large_context_threshold: usize,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            generation: HashMap::new(),
            defaults: HashMap::new(),
            embedding: None,
            image_providers: HashMap::new(),
            large_context_threshold: LARGE_CONTEXT_THRESHOLD_TOKENS,
        }
    }

    /// Register a generation backend under `id`.
    pub fn with_generation(
        mut self,
        id: impl Into<String>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        self.generation.insert(id.into(), backend);
        self
    }

    /// Make `id` the default model for `task`.
    pub fn with_default(mut self, task: ModelTask, id: impl Into<String>) -> Self {
        self.defaults.insert(task, id.into());
        self
    }

    pub fn with_embedding(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedding = Some(backend);
        self
    }

    /// Register an image backend under its provider name.
    pub fn with_image_provider(mut self, backend: Arc<dyn ImageBackend>) -> Self {
        self.image_providers
            .insert(backend.provider_name().to_ascii_lowercase(), backend);
        self
    }

    pub fn with_large_context_threshold(mut self, tokens: usize) -> Self {
        self.large_context_threshold = tokens;
        self
    }

    /// Build from environment: one OpenAI-compatible endpoint serving every
    /// task, optional per-task model names, and Gemini images when a key is set.
    ///
    /// Per-task variables: `CHAT_MODEL`, `TRANSFORMATION_MODEL`,
    /// `IMAGE_PLANNER_MODEL`, `LARGE_CONTEXT_MODEL`.
    pub fn from_env() -> Result<Self> {
        let base = OpenAIConfig::from_env();
        let embedding = Arc::new(OpenAIBackend::new(base.clone())?);
        let mut registry = Self::new()
            .with_embedding(embedding)
            .with_generation(
                base.gen_model.clone(),
                Arc::new(OpenAIBackend::new(base.clone())?),
            );

        for (task, var) in [
            (ModelTask::Chat, "CHAT_MODEL"),
            (ModelTask::Transformation, "TRANSFORMATION_MODEL"),
            (ModelTask::ImagePlanner, "IMAGE_PLANNER_MODEL"),
            (ModelTask::LargeContext, "LARGE_CONTEXT_MODEL"),
        ] {
            let model = match std::env::var(var) {
                Ok(model) if !model.trim().is_empty() => model.trim().to_string(),
                _ if task == ModelTask::LargeContext => continue,
                _ => base.gen_model.clone(),
            };
            if !registry.generation.contains_key(&model) {
                let backend = OpenAIBackend::new(base.clone().with_gen_model(model.clone()))?;
                registry = registry.with_generation(model.clone(), Arc::new(backend));
            }
            registry = registry.with_default(task, model);
        }

        let gemini = GeminiConfig::from_env();
        if gemini.api_key.is_some() {
            registry = registry.with_image_provider(Arc::new(GeminiImageBackend::new(gemini)?));
        }

        info!(
            subsystem = "inference",
            component = "registry",
            op = "init",
            generation_models = registry.generation.len(),
            image_providers = registry.image_providers.len(),
            "Model registry initialized"
        );
        Ok(registry)
    }

    /// Pick the generation backend for `task`.
    ///
    /// Precedence: large-context model when `content` exceeds the threshold,
    /// then `override_id`, then the task default.
    pub fn resolve(
        &self,
        task: ModelTask,
        override_id: Option<&str>,
        content: &str,
    ) -> Result<Arc<dyn GenerationBackend>> {
        if let Some(large_id) = self.defaults.get(&ModelTask::LargeContext) {
            let tokens = token_count(content);
            if tokens > self.large_context_threshold {
                debug!(
                    subsystem = "inference",
                    component = "registry",
                    task = %task,
                    tokens,
                    model = %large_id,
                    "Using large-context model"
                );
                return self.generation_model(large_id);
            }
        }

        if let Some(id) = override_id.map(str::trim).filter(|id| !id.is_empty()) {
            return self.generation_model(id);
        }

        let id = self
            .defaults
            .get(&task)
            .ok_or_else(|| Error::Config(format!("No default {} model configured", task)))?;
        self.generation_model(id)
    }

    /// Generation backend registered under `id`.
    pub fn generation_model(&self, id: &str) -> Result<Arc<dyn GenerationBackend>> {
        self.generation
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("Unknown model: {}", id)))
    }

    pub fn embedding(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        self.embedding
            .clone()
            .ok_or_else(|| Error::Config("No embedding model configured".to_string()))
    }

    /// Whether an embedding backend is available.
    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    pub fn image_provider(&self, provider: &str) -> Result<Arc<dyn ImageBackend>> {
        self.image_providers
            .get(&provider.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::Config(format!("Unsupported image provider: {}", provider)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use folio_core::{ChatReply, PromptMessage};

    struct Named(&'static str);

    #[async_trait]
    impl GenerationBackend for Named {
        async fn generate_with_system(&self, _system: &str, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }

        async fn chat(&self, _messages: &[PromptMessage]) -> Result<ChatReply> {
            Ok(ChatReply {
                id: None,
                content: self.0.to_string(),
            })
        }

        fn model_name(&self) -> &str {
            self.0
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with_generation("small", Arc::new(Named("small")))
            .with_generation("big", Arc::new(Named("big")))
            .with_generation("huge", Arc::new(Named("huge")))
            .with_default(ModelTask::Chat, "small")
            .with_default(ModelTask::Transformation, "big")
            .with_default(ModelTask::LargeContext, "huge")
            .with_large_context_threshold(5)
    }

    #[test]
    fn test_task_default() {
        let r = registry();
        assert_eq!(r.resolve(ModelTask::Chat, None, "hi").unwrap().model_name(), "small");
        assert_eq!(
            r.resolve(ModelTask::Transformation, None, "hi").unwrap().model_name(),
            "big"
        );
    }

    #[test]
    fn test_override_wins_over_default() {
        let r = registry();
        let backend = r.resolve(ModelTask::Chat, Some("big"), "hi").unwrap();
        assert_eq!(backend.model_name(), "big");
    }

    #[test]
    fn test_large_content_wins_over_override() {
        let r = registry();
        let content = "word ".repeat(50);
        let backend = r.resolve(ModelTask::Chat, Some("big"), &content).unwrap();
        assert_eq!(backend.model_name(), "huge");
    }

    #[test]
    fn test_missing_default_and_unknown_model() {
        let r = registry();
        assert!(matches!(
            r.resolve(ModelTask::ImagePlanner, None, "hi"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            r.resolve(ModelTask::Chat, Some("nope"), "hi"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_embedding_and_image_provider() {
        let r = ModelRegistry::new();
        assert!(!r.has_embedding());
        assert!(r.embedding().is_err());
        assert!(r.image_provider("gemini").is_err());
    }
}
