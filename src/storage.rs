//! Persistent task store and the serialized-update discipline.
//!
//! The store itself is a dumb read-all/write-all collaborator. Every
//! read-modify-write against it goes through a [`StoreHandle`]: a single
//! owning task consumes commands in FIFO order, so concurrent jobs updating
//! different keys never race on the whole-collection write.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::domain::{Product, ScrapeStatus, Site, TaskRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store worker is gone")]
    Closed,
}

/// External persistent store collaborator.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    async fn read_all(&self) -> Result<Vec<TaskRecord>, StoreError>;
    async fn write_all(&self, tasks: &[TaskRecord]) -> Result<(), StoreError>;
}

/// JSON-file-backed store. A missing file reads as an empty task list.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn read_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, tasks: &[TaskRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(tasks)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

/// In-memory store for tests and the demo binary.
#[derive(Default)]
pub struct MemoryStore {
    tasks: std::sync::Mutex<Vec<TaskRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn read_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self.tasks.lock().map_err(|_| StoreError::Closed)?.clone())
    }

    async fn write_all(&self, tasks: &[TaskRecord]) -> Result<(), StoreError> {
        *self.tasks.lock().map_err(|_| StoreError::Closed)? = tasks.to_vec();
        Ok(())
    }
}

enum StoreCommand {
    UpsertTask(TaskRecord),
    RemoveTask {
        task_id: String,
    },
    UpdateStatus {
        task_id: String,
        site: Site,
        status: ScrapeStatus,
        progress: usize,
        results: Option<Vec<Product>>,
    },
    UpdateProgress {
        task_id: String,
        site: Site,
        progress: usize,
    },
    ReadAll {
        reply: oneshot::Sender<Result<Vec<TaskRecord>, StoreError>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the store-owning task. Cheap to clone.
///
/// Mutating calls are fire-and-forget: they enqueue behind every earlier
/// update and are applied in order, so callers never block on persistence.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl StoreHandle {
    pub fn spawn(store: Arc<dyn TaskStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_store(store, rx));
        Self { tx }
    }

    /// Insert or replace a whole task record.
    pub fn upsert_task(&self, record: TaskRecord) {
        let _ = self.tx.send(StoreCommand::UpsertTask(record));
    }

    pub fn remove_task(&self, task_id: impl Into<String>) {
        let _ = self.tx.send(StoreCommand::RemoveTask {
            task_id: task_id.into(),
        });
    }

    /// Update one site's status and progress; attaches `results` when given.
    /// A task id with no record is skipped.
    pub fn update_status(
        &self,
        task_id: impl Into<String>,
        site: Site,
        status: ScrapeStatus,
        progress: usize,
        results: Option<Vec<Product>>,
    ) {
        let _ = self.tx.send(StoreCommand::UpdateStatus {
            task_id: task_id.into(),
            site,
            status,
            progress,
            results,
        });
    }

    pub fn update_progress(&self, task_id: impl Into<String>, site: Site, progress: usize) {
        let _ = self.tx.send(StoreCommand::UpdateProgress {
            task_id: task_id.into(),
            site,
            progress,
        });
    }

    pub async fn read_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::ReadAll { reply })
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Resolves once every previously enqueued update has been applied.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(StoreCommand::Flush { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_store(store: Arc<dyn TaskStore>, mut rx: mpsc::UnboundedReceiver<StoreCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::UpsertTask(record) => {
                let result = modify(&*store, |tasks| {
                    match tasks.iter_mut().find(|t| t.task_id == record.task_id) {
                        Some(existing) => *existing = record,
                        None => tasks.push(record),
                    }
                })
                .await;
                log_failure("upsert_task", result);
            }
            StoreCommand::RemoveTask { task_id } => {
                let result = modify(&*store, |tasks| {
                    tasks.retain(|t| t.task_id != task_id);
                })
                .await;
                log_failure("remove_task", result);
            }
            StoreCommand::UpdateStatus {
                task_id,
                site,
                status,
                progress,
                results,
            } => {
                let result = modify(&*store, |tasks| {
                    let Some(task) = tasks.iter_mut().find(|t| t.task_id == task_id) else {
                        debug!(task_id, "status update for unknown task skipped");
                        return;
                    };
                    let state = task.site_mut(site);
                    state.status = status;
                    state.progress = progress;
                    if let Some(results) = results {
                        state.results = results;
                    }
                })
                .await;
                log_failure("update_status", result);
            }
            StoreCommand::UpdateProgress {
                task_id,
                site,
                progress,
            } => {
                let result = modify(&*store, |tasks| {
                    if let Some(task) = tasks.iter_mut().find(|t| t.task_id == task_id) {
                        task.site_mut(site).progress = progress;
                    }
                })
                .await;
                log_failure("update_progress", result);
            }
            StoreCommand::ReadAll { reply } => {
                let _ = reply.send(store.read_all().await);
            }
            StoreCommand::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

async fn modify<F>(store: &dyn TaskStore, f: F) -> Result<(), StoreError>
where
    F: FnOnce(&mut Vec<TaskRecord>),
{
    let mut tasks = store.read_all().await?;
    f(&mut tasks);
    store.write_all(&tasks).await
}

fn log_failure(op: &str, result: Result<(), StoreError>) {
    if let Err(e) = result {
        warn!(op, error = %e, "task store update failed");
    }
}
