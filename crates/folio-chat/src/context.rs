//! Notebook material a turn may be grounded in.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use folio_core::{Repositories, Result};

/// Sources and notes selected for a conversation.
///
/// Sources are loaded from the store by [`NotebookContext::for_notebook`].
/// Notes have no store here; callers attach them with
/// [`NotebookContext::with_notes`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookContext {
    #[serde(default)]
    pub sources: Vec<ContextSource>,
    #[serde(default)]
    pub notes: Vec<ContextNote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSource {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub insights: Vec<ContextInsight>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInsight {
    pub insight_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextNote {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
}

impl NotebookContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.notes.is_empty()
    }

    /// Append caller-held notes after any already present.
    pub fn with_notes(mut self, notes: impl IntoIterator<Item = ContextNote>) -> Self {
        self.notes.extend(notes);
        self
    }

    /// Every source of `notebook_id` owned by `owner`, with its insights.
    /// `notes` is left empty.
    ///
    /// Sources belonging to someone else are skipped rather than rejected.
    pub async fn for_notebook(
        repos: &Repositories,
        notebook_id: Uuid,
        owner: Uuid,
    ) -> Result<Self> {
        let mut context = Self::default();
        for source in repos.sources.list_for_notebook(notebook_id).await? {
            if source.owner != owner {
                continue;
            }
            let insights = repos
                .insights
                .list_for_source(source.id)
                .await?
                .into_iter()
                .map(|i| ContextInsight {
                    insight_type: i.insight_type,
                    content: i.content,
                })
                .collect();
            context.sources.push(ContextSource {
                id: source.id.to_string(),
                title: source.title,
                full_text: source.full_text,
                insights,
            });
        }
        debug!(
            subsystem = "chat",
            component = "context",
            %notebook_id,
            sources = context.sources.len(),
            "Built notebook context"
        );
        Ok(context)
    }
}
