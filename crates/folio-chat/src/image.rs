//! Two-stage image generation: plan a prompt, then render it.

use std::time::Instant;

use tracing::{debug, error, info, instrument};

use folio_core::defaults::{
    FINAL_PROMPT_MARKER, IMAGE_CONTEXT_INSIGHTS, IMAGE_CONTEXT_MAX_SECTIONS,
    IMAGE_CONTEXT_NOTE_CHARS, IMAGE_CONTEXT_SOURCE_CHARS,
};
use folio_core::{ChatMessage, ImageRequest, Result};
use folio_inference::{strip_thinking, ModelRegistry, ModelTask};

use crate::context::NotebookContext;
use crate::prompts::{planner_human_prompt, planner_system_prompt, strip_data_uris};

/// Planner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePlan {
    pub plan_text: String,
    /// Prompt handed to the image model.
    pub final_prompt: String,
}

/// First `max_chars` characters of `text`.
fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Grounding passages for the planner: a couple of sources, then notes, up
/// to `max_sections` in total.
pub fn build_context_summary(context: &NotebookContext, max_sections: usize) -> String {
    let mut sections = Vec::new();

    let source_budget = (max_sections / 2).max(1);
    for (idx, source) in context.sources.iter().take(source_budget).enumerate() {
        let title = source
            .title
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(String::from)
            .unwrap_or_else(|| {
                if source.id.is_empty() {
                    format!("Source {}", idx + 1)
                } else {
                    source.id.clone()
                }
            });
        let snippet = match source.full_text.as_deref().filter(|t| !t.is_empty()) {
            Some(text) => excerpt(text, IMAGE_CONTEXT_SOURCE_CHARS).to_string(),
            None => source
                .insights
                .iter()
                .take(IMAGE_CONTEXT_INSIGHTS)
                .map(|i| format!("- {}: {}", i.insight_type, i.content))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        sections.push(format!("[Source] {}\n{}", title, snippet).trim().to_string());
    }

    let note_budget = max_sections.saturating_sub(sections.len());
    for (idx, note) in context.notes.iter().take(note_budget).enumerate() {
        let title = note
            .title
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("Note {}", idx + 1));
        let content = excerpt(&note.content, IMAGE_CONTEXT_NOTE_CHARS);
        sections.push(format!("[Note] {}\n{}", title, content).trim().to_string());
    }

    sections
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Text after the last `FINAL PROMPT:` marker, matched case-insensitively.
///
/// Falls back to `user_prompt` when the marker is missing or nothing follows it.
pub fn extract_final_prompt(plan_text: &str, user_prompt: &str) -> String {
    // ASCII uppercasing keeps byte offsets aligned with `plan_text`.
    let upper = plan_text.to_ascii_uppercase();
    let found = upper
        .rfind(FINAL_PROMPT_MARKER)
        .map(|idx| plan_text[idx + FINAL_PROMPT_MARKER.len()..].trim())
        .filter(|prompt| !prompt.is_empty());
    match found {
        Some(prompt) => prompt.to_string(),
        None => user_prompt.to_string(),
    }
}

/// Assemble the single AI message for a rendered image.
pub fn image_message_content(plan_text: &str, data_uri: &str, model: &str, provider: &str) -> String {
    [
        format!("### Image Plan ({})", model),
        plan_text.trim().to_string(),
        format!("![Generated with {}]({})", model, data_uri),
        format!("_Image model: {} ({})_", model, provider),
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("\n\n")
}

/// Plans and renders images for conversation turns.
#[derive(Clone)]
pub struct ImageGenerator {
    models: ModelRegistry,
}

impl ImageGenerator {
    pub fn new(models: ModelRegistry) -> Self {
        Self { models }
    }

    /// Expand the user's request into a detailed plan and a final prompt.
    pub async fn plan(
        &self,
        request: &ImageRequest,
        context: Option<&NotebookContext>,
        planner_override: Option<&str>,
    ) -> Result<ImagePlan> {
        let summary = match context {
            Some(context) if request.use_rag => {
                build_context_summary(context, IMAGE_CONTEXT_MAX_SECTIONS)
            }
            _ => String::new(),
        };
        let human = strip_data_uris(&planner_human_prompt(&request.prompt, &summary)).into_owned();

        // Without a dedicated planner the chat model plans.
        let planner = self
            .models
            .resolve(ModelTask::ImagePlanner, planner_override, &human)
            .or_else(|_| self.models.resolve(ModelTask::Chat, planner_override, &human))?;
        debug!(
            subsystem = "chat",
            component = "image",
            op = "plan",
            model = planner.model_name(),
            use_rag = request.use_rag,
            summary_len = summary.len(),
            "Planning image prompt"
        );
        let raw = planner
            .generate_with_system(&planner_system_prompt(), &human)
            .await?;
        let plan_text = strip_thinking(&raw);
        let final_prompt = extract_final_prompt(&plan_text, &request.prompt);
        Ok(ImagePlan {
            plan_text,
            final_prompt,
        })
    }

    /// Plan, render and assemble the AI message. Provider errors fail the call.
    #[instrument(
        skip(self, request, context),
        fields(
            subsystem = "chat",
            component = "image",
            op = "generate",
            model = %request.image_model.name,
            provider = %request.image_model.provider,
        )
    )]
    pub async fn generate(
        &self,
        request: &ImageRequest,
        context: Option<&NotebookContext>,
        planner_override: Option<&str>,
    ) -> Result<ChatMessage> {
        let start = Instant::now();
        let plan = self.plan(request, context, planner_override).await?;

        let provider = self.models.image_provider(&request.image_model.provider)?;
        let image = provider
            .generate_image(&plan.final_prompt, &request.image_model.name)
            .await
            .map_err(|e| {
                error!(error = %e, "Image generation failed");
                e
            })?;

        info!(
            prompt_len = plan.final_prompt.len(),
            mime_type = %image.mime_type,
            duration_ms = start.elapsed().as_millis() as u64,
            "Image generated"
        );
        Ok(ChatMessage::ai(image_message_content(
            &plan.plan_text,
            &image.data_uri(),
            &request.image_model.name,
            &request.image_model.provider,
        )))
    }
}
