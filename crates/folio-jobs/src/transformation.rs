//! Applies a transformation prompt to source text.

use tracing::{debug, instrument};

use folio_core::{Result, Transformation};
use folio_inference::{strip_thinking, ModelRegistry, ModelTask};

/// Single-shot transformation runner. No retries of its own.
#[derive(Clone)]
pub struct TransformationRunner {
    models: ModelRegistry,
}

impl TransformationRunner {
    pub fn new(models: ModelRegistry) -> Self {
        Self { models }
    }

    /// Run `transformation` over `input_text`, returning the cleaned output.
    ///
    /// The transformation prompt is the system instruction; reasoning blocks
    /// are stripped from the reply.
    #[instrument(
        skip(self, transformation, input_text),
        fields(
            subsystem = "transformation",
            component = "runner",
            op = "run",
            transformation = %transformation.name,
            prompt_len = input_text.len(),
        )
    )]
    pub async fn run(&self, transformation: &Transformation, input_text: &str) -> Result<String> {
        let backend = self
            .models
            .resolve(ModelTask::Transformation, None, input_text)?;
        let raw = backend
            .generate_with_system(&transformation.prompt, input_text)
            .await?;
        let output = strip_thinking(&raw);
        debug!(
            model = backend.model_name(),
            response_len = output.len(),
            "Transformation finished"
        );
        Ok(output)
    }
}
