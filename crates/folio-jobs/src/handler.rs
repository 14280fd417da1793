//! Command handler trait and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::retry::RetryPolicy;

/// Fully qualified command key, `app/command`.
pub fn command_key(app: &str, command: &str) -> String {
    format!("{}/{}", app, command)
}

/// Context passed to a handler for one attempt.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Job id, or an ephemeral id for synchronous execution.
    pub job_id: Uuid,
    pub payload: JsonValue,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Whether `job_id` names a persisted job row.
    pub durable: bool,
}

impl CommandContext {
    pub fn new(job_id: Uuid, payload: JsonValue) -> Self {
        Self {
            job_id,
            payload,
            attempt: 1,
            durable: true,
        }
    }

    pub fn ephemeral(payload: JsonValue) -> Self {
        Self {
            job_id: Uuid::now_v7(),
            payload,
            attempt: 1,
            durable: false,
        }
    }
}

/// Result of executing a command.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Completed, with optional result data.
    Success(Option<JsonValue>),
    /// Terminal failure. `result` carries any structured output.
    Failed {
        error: String,
        result: Option<JsonValue>,
    },
    /// Transient failure; run again if the policy allows.
    Retry(String),
}

impl JobResult {
    pub fn failed(error: impl Into<String>) -> Self {
        JobResult::Failed {
            error: error.into(),
            result: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success(_))
    }

    /// Result payload, for either outcome.
    pub fn output(&self) -> Option<&JsonValue> {
        match self {
            JobResult::Success(result) | JobResult::Failed { result, .. } => result.as_ref(),
            JobResult::Retry(_) => None,
        }
    }
}

/// Trait for command handlers.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Application namespace.
    fn app(&self) -> &str;

    /// Command name within the namespace.
    fn name(&self) -> &str;

    /// Retry policy declared for this command.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    /// Execute one attempt.
    async fn execute(&self, ctx: CommandContext) -> JobResult;

    fn key(&self) -> String {
        command_key(self.app(), self.name())
    }
}

/// Handlers by command key, shared by the queue service and workers.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn CommandHandler>>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Replaces any handler with the same key.
    pub async fn register(&self, handler: Arc<dyn CommandHandler>) {
        let key = handler.key();
        self.handlers.write().await.insert(key.clone(), handler);
        debug!(command = %key, "Registered command handler");
    }

    pub async fn get(&self, app: &str, command: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .read()
            .await
            .get(&command_key(app, command))
            .cloned()
    }

    pub async fn get_by_key(&self, key: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.read().await.get(key).cloned()
    }

    /// Registered command keys.
    pub async fn keys(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }
}
