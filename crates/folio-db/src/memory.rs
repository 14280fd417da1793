//! In-process record store.
//!
//! Implements every repository trait over hash maps behind one lock, with the
//! same transition guards as the Postgres repositories. Used by tests and by
//! single-process deployments that do not need durability.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use folio_core::{
    EmbeddedChunk, EmbeddingRepository, Error, InsightRepository, Job, JobRepository, JobStatus,
    NewSource, NewTransformation, Notebook, NotebookRepository, Repositories, Result, Source,
    SourceEmbedding, SourceInsight, SourceRepository, ThreadState, ThreadStateRepository,
    Transformation, TransformationRepository,
};

#[derive(Default)]
struct State {
    sources: HashMap<Uuid, Source>,
    notebooks: HashMap<Uuid, Notebook>,
    /// (source, notebook) pairs.
    links: HashSet<(Uuid, Uuid)>,
    transformations: HashMap<Uuid, Transformation>,
    insights: Vec<SourceInsight>,
    embeddings: HashMap<Uuid, Vec<SourceEmbedding>>,
    jobs: HashMap<Uuid, Job>,
    threads: HashMap<String, ThreadState>,
}

struct Inner {
    state: Mutex<State>,
    notify: Arc<Notify>,
    /// Remaining source updates that fail with a write conflict.
    update_conflicts: AtomicUsize,
}

/// Hash-map backed store implementing all repository traits.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Arc::new(Notify::new()),
                update_conflicts: AtomicUsize::new(0),
            }),
        }
    }

    /// Every repository trait backed by this store.
    pub fn repositories(&self) -> Repositories {
        Repositories {
            sources: Arc::new(self.clone()),
            notebooks: Arc::new(self.clone()),
            transformations: Arc::new(self.clone()),
            insights: Arc::new(self.clone()),
            embeddings: Arc::new(self.clone()),
            jobs: Arc::new(self.clone()),
            threads: Arc::new(self.clone()),
        }
    }

    /// Make the next `n` source updates fail with `Error::Conflict`, the way
    /// a concurrent writer would surface in the database.
    pub fn inject_update_conflicts(&self, n: usize) {
        self.inner.update_conflicts.store(n, Ordering::SeqCst);
    }

    /// All jobs, oldest first.
    pub async fn jobs(&self) -> Vec<Job> {
        let state = self.inner.state.lock().await;
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    fn take_injected_conflict(&self) -> bool {
        self.inner
            .update_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SourceRepository for MemoryStore {
    async fn insert(&self, source: NewSource) -> Result<Source> {
        let now = Utc::now();
        let record = Source {
            id: Uuid::now_v7(),
            title: source.title,
            topics: source.topics,
            full_text: None,
            asset: source.asset.filter(|a| !a.is_empty()),
            owner: source.owner,
            command: None,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .state
            .lock()
            .await
            .sources
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Source>> {
        Ok(self.inner.state.lock().await.sources.get(&id).cloned())
    }

    async fn update(&self, source: &Source) -> Result<()> {
        if self.take_injected_conflict() {
            return Err(Error::Conflict(format!("source {} modified concurrently", source.id)));
        }
        let mut state = self.inner.state.lock().await;
        let existing = state
            .sources
            .get_mut(&source.id)
            .ok_or(Error::SourceNotFound(source.id))?;
        existing.title = source.title.clone();
        existing.topics = source.topics.clone();
        existing.full_text = source.full_text.clone();
        existing.asset = source.asset.clone().filter(|a| !a.is_empty());
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn set_command(&self, id: Uuid, job_id: Option<Uuid>) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let existing = state.sources.get_mut(&id).ok_or(Error::SourceNotFound(id))?;
        existing.command = job_id;
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state.sources.remove(&id);
        state.links.retain(|(source_id, _)| *source_id != id);
        state.insights.retain(|i| i.source_id != id);
        state.embeddings.remove(&id);
        Ok(())
    }

    async fn link_notebook(&self, source_id: Uuid, notebook_id: Uuid) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if !state.sources.contains_key(&source_id) {
            return Err(Error::SourceNotFound(source_id));
        }
        if !state.notebooks.contains_key(&notebook_id) {
            return Err(Error::NotFound(format!("Notebook {} not found", notebook_id)));
        }
        state.links.insert((source_id, notebook_id));
        Ok(())
    }

    async fn notebooks_for(&self, source_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.inner.state.lock().await;
        let mut ids: Vec<Uuid> = state
            .links
            .iter()
            .filter(|(s, _)| *s == source_id)
            .map(|(_, n)| *n)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_for_notebook(&self, notebook_id: Uuid) -> Result<Vec<Source>> {
        let state = self.inner.state.lock().await;
        let mut sources: Vec<Source> = state
            .links
            .iter()
            .filter(|(_, n)| *n == notebook_id)
            .filter_map(|(s, _)| state.sources.get(s).cloned())
            .collect();
        sources.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sources)
    }
}

#[async_trait]
impl NotebookRepository for MemoryStore {
    async fn create(&self, owner: Uuid, name: &str, description: Option<&str>) -> Result<Notebook> {
        let now = Utc::now();
        let notebook = Notebook {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: description.map(String::from),
            owner,
            archived: false,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .state
            .lock()
            .await
            .notebooks
            .insert(notebook.id, notebook.clone());
        Ok(notebook)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notebook>> {
        Ok(self.inner.state.lock().await.notebooks.get(&id).cloned())
    }
}

#[async_trait]
impl TransformationRepository for MemoryStore {
    async fn create(&self, transformation: NewTransformation) -> Result<Transformation> {
        let record = Transformation {
            id: Uuid::now_v7(),
            name: transformation.name,
            title: transformation.title,
            description: transformation.description,
            prompt: transformation.prompt,
            apply_default: transformation.apply_default,
            owner: transformation.owner,
            created_at: Utc::now(),
        };
        self.inner
            .state
            .lock()
            .await
            .transformations
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transformation>> {
        Ok(self.inner.state.lock().await.transformations.get(&id).cloned())
    }

    async fn list_defaults(&self, owner: Uuid) -> Result<Vec<Transformation>> {
        let state = self.inner.state.lock().await;
        let mut defaults: Vec<Transformation> = state
            .transformations
            .values()
            .filter(|t| t.apply_default && t.is_accessible_to(owner))
            .cloned()
            .collect();
        defaults.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defaults)
    }
}

#[async_trait]
impl InsightRepository for MemoryStore {
    async fn add(
        &self,
        source_id: Uuid,
        insight_type: &str,
        content: &str,
        owner: Uuid,
    ) -> Result<SourceInsight> {
        let mut state = self.inner.state.lock().await;
        if !state.sources.contains_key(&source_id) {
            return Err(Error::SourceNotFound(source_id));
        }
        let insight = SourceInsight {
            id: Uuid::now_v7(),
            source_id,
            insight_type: insight_type.to_string(),
            content: content.to_string(),
            owner,
            created_at: Utc::now(),
        };
        state.insights.push(insight.clone());
        Ok(insight)
    }

    async fn list_for_source(&self, source_id: Uuid) -> Result<Vec<SourceInsight>> {
        let state = self.inner.state.lock().await;
        Ok(state
            .insights
            .iter()
            .filter(|i| i.source_id == source_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EmbeddingRepository for MemoryStore {
    async fn replace_for_source(
        &self,
        source_id: Uuid,
        owner: Uuid,
        chunks: &[EmbeddedChunk],
    ) -> Result<usize> {
        let now = Utc::now();
        let rows: Vec<SourceEmbedding> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| SourceEmbedding {
                id: Uuid::now_v7(),
                source_id,
                chunk_index: i as i32,
                content: chunk.content.clone(),
                embedding: chunk.vector.clone(),
                owner,
                created_at: now,
            })
            .collect();

        let mut state = self.inner.state.lock().await;
        if rows.is_empty() {
            state.embeddings.remove(&source_id);
        } else {
            state.embeddings.insert(source_id, rows);
        }
        Ok(chunks.len())
    }

    async fn list_for_source(&self, source_id: Uuid) -> Result<Vec<SourceEmbedding>> {
        let state = self.inner.state.lock().await;
        Ok(state.embeddings.get(&source_id).cloned().unwrap_or_default())
    }

    async fn delete_for_source(&self, source_id: Uuid) -> Result<()> {
        self.inner.state.lock().await.embeddings.remove(&source_id);
        Ok(())
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn queue(
        &self,
        app: &str,
        command: &str,
        payload: JsonValue,
        max_attempts: i32,
    ) -> Result<Uuid> {
        let job = Job {
            id: Uuid::now_v7(),
            app: app.to_string(),
            command: command.to_string(),
            payload,
            status: JobStatus::Queued,
            result: None,
            error_message: None,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let id = job.id;
        self.inner.state.lock().await.jobs.insert(id, job);
        self.inner.notify.notify_waiters();
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.inner.state.lock().await.jobs.get(&id).cloned())
    }

    async fn claim_next(&self, commands: &[String]) -> Result<Option<Job>> {
        let mut state = self.inner.state.lock().await;
        let next = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .filter(|j| commands.is_empty() || commands.contains(&j.command_key()))
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            state.jobs.get_mut(&id).map(|job| {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                job.attempts = 1;
                job.clone()
            })
        }))
    }

    async fn begin_retry(&self, id: Uuid, attempt: i32, last_error: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running && job.attempts < attempt => {
                job.attempts = attempt;
                job.error_message = Some(last_error.to_string());
                Ok(())
            }
            _ => Err(Error::Job(format!(
                "Job {} cannot start attempt {}: not running or attempt already recorded",
                id, attempt
            ))),
        }
    }

    async fn complete(&self, id: Uuid, result: Option<JsonValue>) -> Result<()> {
        self.finish(id, JobStatus::Completed, None, result).await
    }

    async fn fail(&self, id: Uuid, error: &str, result: Option<JsonValue>) -> Result<()> {
        self.finish(id, JobStatus::Failed, Some(error), result).await
    }

    async fn cancel(&self, id: Uuid, reason: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                job.error_message = Some(reason.to_string());
                Ok(())
            }
            _ => Err(Error::Job(format!(
                "Job {} is not queued; refusing cancellation",
                id
            ))),
        }
    }

    async fn requeue_stale(&self, started_before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.inner.state.lock().await;
        let mut moved = 0;
        for job in state.jobs.values_mut() {
            let stale = job.status == JobStatus::Running
                && job.started_at.is_some_and(|at| at < started_before);
            if stale {
                job.status = JobStatus::Queued;
                job.started_at = None;
                job.error_message = Some("Requeued after worker lease expired".to_string());
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn pending_count(&self) -> Result<i64> {
        let state = self.inner.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .count() as i64)
    }

    fn job_notify(&self) -> Option<Arc<Notify>> {
        Some(self.inner.notify.clone())
    }
}

impl MemoryStore {
    async fn finish(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<&str>,
        result: Option<JsonValue>,
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = status;
                job.completed_at = Some(Utc::now());
                job.result = result;
                job.error_message = error.map(String::from);
                Ok(())
            }
            _ => Err(Error::Job(format!(
                "Job {} is not running; refusing transition to {}",
                id, status
            ))),
        }
    }
}

#[async_trait]
impl ThreadStateRepository for MemoryStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>> {
        Ok(self.inner.state.lock().await.threads.get(thread_id).cloned())
    }

    async fn save(&self, thread_id: &str, state: &ThreadState) -> Result<()> {
        self.inner
            .state
            .lock()
            .await
            .threads
            .insert(thread_id.to_string(), state.clone());
        Ok(())
    }
}
