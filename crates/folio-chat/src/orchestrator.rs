//! Conversation turns over persisted thread state.
//!
//! A turn loads the thread, appends the human message, produces exactly one
//! AI message (text reply or generated image) and saves the thread. A turn
//! that fails or times out saves nothing except the cleanup of a stale
//! pending image request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use folio_core::defaults::CHAT_TIMEOUT_SECS;
use folio_core::{
    ChatMessage, ChatRole, Error, ImageRequest, PromptMessage, Result, ThreadState,
    ThreadStateRepository,
};
use folio_inference::{strip_thinking, ModelRegistry, ModelTask};

use crate::context::NotebookContext;
use crate::image::ImageGenerator;
use crate::prompts::{chat_system_prompt, strip_data_uris};

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Upper bound on a whole turn, image rendering included.
    pub turn_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            turn_timeout: Duration::from_secs(CHAT_TIMEOUT_SECS),
        }
    }
}

impl ChatConfig {
    /// Reads `CHAT_TIMEOUT_SECONDS`.
    pub fn from_env() -> Self {
        let secs = std::env::var("CHAT_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(CHAT_TIMEOUT_SECS);
        Self {
            turn_timeout: Duration::from_secs(secs),
        }
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }
}

/// What the user sent this turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnInput {
    Text { message: String },
    Image(ImageRequest),
}

impl TurnInput {
    /// Text recorded as the human message.
    fn human_text(&self) -> &str {
        match self {
            TurnInput::Text { message } => message,
            TurnInput::Image(request) => &request.prompt,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    pub input: TurnInput,
    pub context: Option<NotebookContext>,
    /// Generation model for this turn; remembered on the thread.
    pub model_override: Option<String>,
    /// User the thread belongs to, recorded when the thread has none yet.
    pub owner: Option<Uuid>,
}

impl TurnRequest {
    pub fn text(thread_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            input: TurnInput::Text {
                message: message.into(),
            },
            context: None,
            model_override: None,
            owner: None,
        }
    }

    pub fn image(thread_id: impl Into<String>, request: ImageRequest) -> Self {
        Self {
            thread_id: thread_id.into(),
            input: TurnInput::Image(request),
            context: None,
            model_override: None,
            owner: None,
        }
    }

    pub fn with_context(mut self, context: NotebookContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn with_owner(mut self, owner: Uuid) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Runs conversation turns.
#[derive(Clone)]
pub struct ConversationOrchestrator {
    threads: Arc<dyn ThreadStateRepository>,
    models: ModelRegistry,
    images: ImageGenerator,
    config: ChatConfig,
}

impl ConversationOrchestrator {
    pub fn new(
        threads: Arc<dyn ThreadStateRepository>,
        models: ModelRegistry,
        config: ChatConfig,
    ) -> Self {
        Self {
            threads,
            images: ImageGenerator::new(models.clone()),
            models,
            config,
        }
    }

    /// Full message history of a thread, empty when it does not exist.
    pub async fn history(&self, thread_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .threads
            .load(thread_id)
            .await?
            .map(|s| s.messages)
            .unwrap_or_default())
    }

    /// Remember a generation model for later turns; `None` clears it.
    pub async fn set_model_override(&self, thread_id: &str, model: Option<String>) -> Result<()> {
        let mut state = self.threads.load(thread_id).await?.unwrap_or_default();
        state.model_override = model.filter(|m| !m.trim().is_empty());
        self.threads.save(thread_id, &state).await
    }

    /// Run one turn and return the thread's updated history.
    #[instrument(
        skip(self, request),
        fields(
            subsystem = "chat",
            component = "orchestrator",
            op = "run_turn",
            thread_id = %request.thread_id,
        )
    )]
    pub async fn run_turn(&self, request: TurnRequest) -> Result<Vec<ChatMessage>> {
        let start = Instant::now();
        let loaded = self.threads.load(&request.thread_id).await?.unwrap_or_default();
        let had_pending = loaded.pending_image_request.is_some();

        let mut state = loaded.clone();
        if let Some(stale) = state.pending_image_request.take() {
            warn!(prompt_len = stale.prompt.len(), "Discarding stale image request");
        }
        if let Some(model) = request
            .model_override
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
        {
            state.model_override = Some(model.to_string());
        }
        if state.owner.is_none() {
            state.owner = request.owner;
        }
        if let TurnInput::Image(image) = &request.input {
            state.pending_image_request = Some(image.clone());
        }
        state.messages.push(ChatMessage::human(request.input.human_text()));

        let outcome = tokio::time::timeout(
            self.config.turn_timeout,
            self.respond(&state, &request),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::Timeout(format!(
                "Chat turn exceeded {} seconds",
                self.config.turn_timeout.as_secs()
            )))
        });

        match outcome {
            Ok(reply) => {
                state.pending_image_request = None;
                state.messages.push(reply);
                assign_message_ids(&mut state);
                self.threads.save(&request.thread_id, &state).await?;
                info!(
                    messages = state.messages.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Chat turn completed"
                );
                Ok(state.messages)
            }
            Err(e) => {
                warn!(error = %e, "Chat turn failed");
                if had_pending {
                    let cleared = ThreadState {
                        pending_image_request: None,
                        ..loaded
                    };
                    if let Err(save_err) = self.threads.save(&request.thread_id, &cleared).await {
                        warn!(error = %save_err, "Failed to clear pending image request");
                    }
                }
                Err(e)
            }
        }
    }

    /// Produce the AI message for `state`, whose last message is the human turn.
    async fn respond(&self, state: &ThreadState, request: &TurnRequest) -> Result<ChatMessage> {
        let override_id = state.model_override.as_deref();
        match &request.input {
            TurnInput::Image(image) => {
                self.images
                    .generate(image, request.context.as_ref(), override_id)
                    .await
            }
            TurnInput::Text { .. } => {
                let payload = chat_payload(state, request.context.as_ref());
                let transcript: String = payload.iter().map(|m| m.content.as_str()).collect();
                let model = self.models.resolve(ModelTask::Chat, override_id, &transcript)?;
                debug!(
                    model = model.model_name(),
                    messages = payload.len(),
                    "Requesting chat reply"
                );
                let reply = model.chat(&payload).await?;
                Ok(ChatMessage {
                    id: reply.id,
                    role: ChatRole::Ai,
                    content: strip_thinking(&reply.content),
                })
            }
        }
    }
}

/// System prompt followed by the history, with inline images scrubbed.
fn chat_payload(state: &ThreadState, context: Option<&NotebookContext>) -> Vec<PromptMessage> {
    let mut payload = Vec::with_capacity(state.messages.len() + 1);
    payload.push(PromptMessage::system(chat_system_prompt(context)));
    for message in &state.messages {
        let content = strip_data_uris(&message.content).into_owned();
        payload.push(match message.role {
            ChatRole::Human => PromptMessage::user(content),
            ChatRole::Ai => PromptMessage::assistant(content),
        });
    }
    payload
}

/// Give every message without an id a positional one.
fn assign_message_ids(state: &mut ThreadState) {
    for (idx, message) in state.messages.iter_mut().enumerate() {
        if message.id.is_none() {
            message.id = Some(format!("msg_{}", idx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::ImageModelRef;
    use serde_json::json;

    #[test]
    fn test_turn_input_wire_format() {
        let input: TurnInput = serde_json::from_value(json!({
            "type": "image",
            "image_prompt": "a cat",
            "use_rag": true,
            "image_model": {"id": "m1", "name": "gemini-2.5-flash-image", "provider": "gemini"}
        }))
        .unwrap();
        match &input {
            TurnInput::Image(req) => {
                assert_eq!(req.prompt, "a cat");
                assert!(req.use_rag);
                assert_eq!(
                    req.image_model,
                    ImageModelRef {
                        id: "m1".into(),
                        name: "gemini-2.5-flash-image".into(),
                        provider: "gemini".into(),
                    }
                );
            }
            other => panic!("unexpected input: {:?}", other),
        }
        assert_eq!(input.human_text(), "a cat");

        let text: TurnInput =
            serde_json::from_value(json!({"type": "text", "message": "hi"})).unwrap();
        assert_eq!(text.human_text(), "hi");
    }

    #[test]
    fn test_payload_maps_roles_and_strips_images() {
        let state = ThreadState {
            messages: vec![
                ChatMessage::human("draw it"),
                ChatMessage::ai("![x](data:image/png;base64,AAAA)"),
                ChatMessage::human("thanks"),
            ],
            ..Default::default()
        };
        let payload = chat_payload(&state, None);
        assert_eq!(payload.len(), 4);
        assert_eq!(payload[1], PromptMessage::user("draw it"));
        assert_eq!(payload[2], PromptMessage::assistant("![x]([image omitted])"));
        assert_eq!(payload[3], PromptMessage::user("thanks"));
    }

    #[test]
    fn test_ids_fill_only_missing() {
        let mut state = ThreadState {
            messages: vec![
                ChatMessage::human("a"),
                ChatMessage {
                    id: Some("provider-7".into()),
                    role: ChatRole::Ai,
                    content: "b".into(),
                },
                ChatMessage::human("c"),
            ],
            ..Default::default()
        };
        assign_message_ids(&mut state);
        let ids: Vec<_> = state.messages.iter().map(|m| m.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["msg_0", "provider-7", "msg_2"]);
    }

    #[test]
    fn test_config_builder() {
        let config = ChatConfig::default().with_turn_timeout(Duration::from_secs(5));
        assert_eq!(config.turn_timeout, Duration::from_secs(5));
        assert_eq!(ChatConfig::default().turn_timeout, Duration::from_secs(40));
    }
}
