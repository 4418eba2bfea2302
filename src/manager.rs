//! Task Manager: the controller-side orchestration engine.
//!
//! One long-lived manager task owns the table of active jobs, one job per
//! `(task_id, site)` pair. Everything it does is event-driven: launch and
//! cancel requests, context-ready notifications, inbound worker messages,
//! disconnects and safety-timer fires all arrive as [`ManagerEvent`]s on a
//! single mpsc queue and are processed to completion one at a time, so the
//! jobs table needs no locking.
//!
//! Lifecycle per job:
//!
//! ```text
//! idle --launch--> running --(target reached)---------> done
//!                  running --(error, zero items)------> error
//!                  running --(error, items > 0)-------> done
//!                  running --(cancel request)---------> cancelled
//!                  running --(stalled, safety timer)--> done
//! ```
//!
//! Terminal transitions are one-shot and idempotent; a second terminal
//! signal for an already-removed job is a no-op. The safety timer is the
//! backstop against a worker that reports results and then wedges: without
//! it a stalled job would leak forever.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::{BrowserHost, ContextId, ControllerChannel, ReadyReceiver};
use crate::config::ManagerConfig;
use crate::domain::{Product, ScrapeStatus, Site};
use crate::protocol::{ControllerMessage, WorkerMessage};
use crate::storage::StoreHandle;

/// Channel name workers listen on inside their context.
const CHANNEL_NAME: &str = "scraper";

/// Identity of one active job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub task_id: String,
    pub site: Site,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.task_id, self.site)
    }
}

/// One active scraping run, owned exclusively by the manager loop.
struct Job {
    task_id: String,
    site: Site,
    query: String,
    context_id: ContextId,
    /// Items collected so far, deduplicated by URL, insertion order kept.
    accumulated: Vec<Product>,
    target_count: usize,
    channel: Option<ControllerChannel>,
    /// Guards against concurrent channel-establishment attempts.
    connecting: bool,
    /// Set exactly once; the linearization point for termination.
    complete: bool,
    timer: Option<JoinHandle<()>>,
    /// Increments on every re-arm so a stale timer fire is ignored.
    timer_generation: u64,
}

impl Job {
    fn key(&self) -> JobKey {
        JobKey {
            task_id: self.task_id.clone(),
            site: self.site,
        }
    }
}

enum ManagerEvent {
    Launch {
        task_id: String,
        site: Site,
        query: String,
    },
    Cancel {
        task_id: String,
        site: Site,
    },
    ContextReady(ContextId),
    Worker {
        key: JobKey,
        msg: WorkerMessage,
    },
    Disconnected {
        key: JobKey,
    },
    SafetyTimeout {
        key: JobKey,
        generation: u64,
    },
    Inspect {
        reply: oneshot::Sender<Vec<JobKey>>,
    },
    Shutdown,
}

/// Handle to the manager task. Cheap to clone; this is the launcher surface
/// the UI collaborator talks to.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<ManagerEvent>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl ManagerHandle {
    pub fn request_launch(
        &self,
        task_id: impl Into<String>,
        site: Site,
        query: impl Into<String>,
    ) {
        let _ = self.tx.send(ManagerEvent::Launch {
            task_id: task_id.into(),
            site,
            query: query.into(),
        });
    }

    pub fn request_cancel(&self, task_id: impl Into<String>, site: Site) {
        let _ = self.tx.send(ManagerEvent::Cancel {
            task_id: task_id.into(),
            site,
        });
    }

    /// Keys of the currently active jobs, in insertion order.
    ///
    /// Doubles as a barrier: the reply proves every earlier event on the
    /// manager queue has been processed.
    pub async fn active_jobs(&self) -> Vec<JobKey> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ManagerEvent::Inspect { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Cancel every active job and stop the manager task.
    pub async fn shutdown(self) {
        let _ = self.tx.send(ManagerEvent::Shutdown);
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

pub struct ScrapeManager {
    host: Arc<dyn BrowserHost>,
    store: StoreHandle,
    config: ManagerConfig,
    jobs: Vec<Job>,
    events_tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl ScrapeManager {
    /// Spawn the manager loop. `ready_rx` is the host's context-ready event
    /// stream; each event may trigger at most one connection attempt.
    pub fn spawn(
        host: Arc<dyn BrowserHost>,
        mut ready_rx: ReadyReceiver,
        store: StoreHandle,
        config: ManagerConfig,
    ) -> ManagerHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let ready_pump = tx.clone();
        tokio::spawn(async move {
            while let Some(id) = ready_rx.recv().await {
                if ready_pump.send(ManagerEvent::ContextReady(id)).is_err() {
                    break;
                }
            }
        });

        let manager = Self {
            host,
            store,
            config,
            jobs: Vec::new(),
            events_tx: tx.clone(),
        };
        let task = tokio::spawn(manager.run(rx));

        ManagerHandle {
            tx,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ManagerEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                ManagerEvent::Launch {
                    task_id,
                    site,
                    query,
                } => self.launch(task_id, site, query).await,
                ManagerEvent::Cancel { task_id, site } => self.cancel(&task_id, site).await,
                ManagerEvent::ContextReady(id) => self.on_context_ready(id).await,
                ManagerEvent::Worker { key, msg } => self.on_worker_message(key, msg).await,
                ManagerEvent::Disconnected { key } => self.on_disconnected(&key),
                ManagerEvent::SafetyTimeout { key, generation } => {
                    self.on_safety_timeout(key, generation).await;
                }
                ManagerEvent::Inspect { reply } => {
                    let _ = reply.send(self.jobs.iter().map(Job::key).collect());
                }
                ManagerEvent::Shutdown => {
                    let keys: Vec<JobKey> = self.jobs.iter().map(Job::key).collect();
                    for key in keys {
                        self.finish(&key, ScrapeStatus::Cancelled).await;
                    }
                    break;
                }
            }
        }
    }

    /// Start a job unless one already exists for the key.
    async fn launch(&mut self, task_id: String, site: Site, query: String) {
        if self
            .jobs
            .iter()
            .any(|j| j.task_id == task_id && j.site == site)
        {
            debug!(task_id, %site, "duplicate launch ignored");
            return;
        }

        self.store
            .update_status(&task_id, site, ScrapeStatus::Running, 0, None);

        let url = site.search_url(&query);
        match self.host.create(&url).await {
            Ok(context_id) => {
                info!(task_id, %site, %context_id, query, "job launched");
                self.jobs.push(Job {
                    target_count: self.config.target_counts.for_site(site),
                    task_id,
                    site,
                    query,
                    context_id,
                    accumulated: Vec::new(),
                    channel: None,
                    connecting: false,
                    complete: false,
                    timer: None,
                    timer_generation: 0,
                });
            }
            Err(e) => {
                warn!(task_id, %site, error = %e, "browser context creation failed");
                self.store
                    .update_status(&task_id, site, ScrapeStatus::Error, 0, None);
            }
        }
    }

    /// A tracked context finished loading (possibly a reload). Linear scan in
    /// insertion order; the first matching unconnected job gets the one
    /// connection attempt for this event.
    async fn on_context_ready(&mut self, context_id: ContextId) {
        let Some(index) = self.jobs.iter().position(|j| {
            j.context_id == context_id && !j.complete && j.channel.is_none() && !j.connecting
        }) else {
            return;
        };
        self.connect(index).await;
    }

    async fn connect(&mut self, index: usize) {
        let (key, context_id, start) = {
            let job = &mut self.jobs[index];
            job.connecting = true;
            (
                job.key(),
                job.context_id,
                ControllerMessage::Start {
                    query: job.query.clone(),
                    site: job.site,
                    target_count: job.target_count,
                },
            )
        };

        match self.host.open_channel(context_id, CHANNEL_NAME).await {
            Ok(mut channel) => {
                if let Some(mut msg_rx) = channel.take_receiver() {
                    let events = self.events_tx.clone();
                    let pump_key = key.clone();
                    tokio::spawn(async move {
                        while let Some(msg) = msg_rx.recv().await {
                            let event = ManagerEvent::Worker {
                                key: pump_key.clone(),
                                msg,
                            };
                            if events.send(event).is_err() {
                                return;
                            }
                        }
                        let _ = events.send(ManagerEvent::Disconnected { key: pump_key });
                    });
                }

                if let Err(e) = channel.send(start) {
                    // worker side already gone; the pump will report the
                    // disconnect and a later ready event retries
                    warn!(%key, error = %e, "start message lost");
                }
                if let Some(job) = self.job_mut(&key) {
                    job.channel = Some(channel);
                    job.connecting = false;
                }
                debug!(%key, "channel established");
            }
            Err(e) => {
                // job stays running; a later ready event (page reload)
                // retries the connection
                warn!(%key, error = %e, "channel open failed, will retry on next ready event");
                if let Some(job) = self.job_mut(&key) {
                    job.channel = None;
                    job.connecting = false;
                }
            }
        }
    }

    async fn on_worker_message(&mut self, key: JobKey, msg: WorkerMessage) {
        let Some(job) = self
            .jobs
            .iter_mut()
            .find(|j| !j.complete && j.key() == key)
        else {
            debug!(%key, "message for inactive job dropped");
            return;
        };

        let mut terminal: Option<ScrapeStatus> = None;
        let mut rearm_timer = false;

        match msg {
            WorkerMessage::Progress { count } => {
                // estimate: the worker's running count on top of what is
                // already merged
                let estimate = job.accumulated.len() + count;
                self.store.update_progress(&job.task_id, job.site, estimate);
            }
            WorkerMessage::Result { items } => {
                for item in items {
                    if !job.accumulated.iter().any(|p| p.url == item.url) {
                        job.accumulated.push(item);
                    }
                }
                let merged = job.accumulated.len();
                self.store.update_progress(&job.task_id, job.site, merged);
                if merged >= job.target_count {
                    terminal = Some(ScrapeStatus::Done);
                } else {
                    rearm_timer = true;
                }
            }
            WorkerMessage::Error { message } => {
                warn!(%key, message, "worker reported extraction failure");
                terminal = Some(if job.accumulated.is_empty() {
                    ScrapeStatus::Error
                } else {
                    ScrapeStatus::Done
                });
            }
            WorkerMessage::Cancel => {
                terminal = Some(ScrapeStatus::Cancelled);
            }
        }

        if let Some(status) = terminal {
            self.finish(&key, status).await;
        } else if rearm_timer {
            self.arm_safety_timer(&key);
        }
    }

    /// The channel dropped without a terminal message. The job keeps running:
    /// the context may reload and reconnect, and the safety timer still
    /// guarantees termination.
    fn on_disconnected(&mut self, key: &JobKey) {
        if let Some(job) = self.job_mut(key) {
            debug!(%key, "channel disconnected, awaiting reconnect or timeout");
            job.channel = None;
            job.connecting = false;
        }
    }

    async fn on_safety_timeout(&mut self, key: JobKey, generation: u64) {
        let stale = self
            .job_mut(&key)
            .map_or(true, |job| job.timer_generation != generation);
        if stale {
            return;
        }
        info!(%key, "no progress within safety window, forcing completion");
        self.finish(&key, ScrapeStatus::Done).await;
    }

    /// Best-effort cancel: try to tell the worker, then terminate locally
    /// regardless of whether the send went through.
    async fn cancel(&mut self, task_id: &str, site: Site) {
        let Some(job) = self
            .jobs
            .iter()
            .find(|j| j.task_id == task_id && j.site == site)
        else {
            debug!(task_id, %site, "cancel for unknown job ignored");
            return;
        };
        if let Some(channel) = &job.channel {
            let _ = channel.send(ControllerMessage::Cancel);
        }
        let key = job.key();
        self.finish(&key, ScrapeStatus::Cancelled).await;
    }

    /// (Re)arm the safety timer: any pending fire is superseded by bumping
    /// the generation, and the old sleep task is aborted.
    fn arm_safety_timer(&mut self, key: &JobKey) {
        let timeout = self.config.safety_timeout();
        let events = self.events_tx.clone();
        let Some(job) = self.job_mut(key) else {
            return;
        };

        if let Some(old) = job.timer.take() {
            old.abort();
        }
        job.timer_generation += 1;
        let generation = job.timer_generation;
        let timer_key = key.clone();
        job.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(ManagerEvent::SafetyTimeout {
                key: timer_key,
                generation,
            });
        }));
    }

    /// One-shot terminal transition: mark complete, release timer, channel
    /// and context, drop the job from the table, persist the final record.
    async fn finish(&mut self, key: &JobKey, status: ScrapeStatus) {
        let Some(index) = self.jobs.iter().position(|j| j.key() == *key) else {
            return;
        };
        if self.jobs[index].complete {
            return;
        }
        self.jobs[index].complete = true;

        let mut job = self.jobs.remove(index);
        if let Some(timer) = job.timer.take() {
            timer.abort();
        }
        // closing the channel and destroying the context are best-effort
        drop(job.channel.take());
        if let Err(e) = self.host.destroy(job.context_id).await {
            debug!(%key, error = %e, "context teardown failed");
        }

        let count = job.accumulated.len();
        let results = (!job.accumulated.is_empty()).then_some(job.accumulated);
        self.store
            .update_status(&job.task_id, job.site, status, count, results);
        info!(%key, ?status, count, "job finished");
    }

    fn job_mut(&mut self, key: &JobKey) -> Option<&mut Job> {
        self.jobs
            .iter_mut()
            .find(|j| j.task_id == key.task_id && j.site == key.site)
    }
}
