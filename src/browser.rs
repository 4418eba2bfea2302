//! Browser host seam: isolated execution contexts and the Job Channel.
//!
//! The controller never touches a rendered page directly. It asks a
//! [`BrowserHost`] to create a context navigated to a URL, hears about
//! finished page loads through a ready-event stream, and opens at most one
//! [`ControllerChannel`] per job to talk to the worker runtime inside that
//! context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{ControllerMessage, WorkerMessage};

/// Opaque handle to one isolated page-rendering context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", &self.0.to_string()[..8])
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to create browser context: {0}")]
    Create(String),
    #[error("no such browser context: {0}")]
    UnknownContext(ContextId),
    #[error("failed to open channel to context {0}: {1}")]
    OpenChannel(ContextId, String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel disconnected")]
    Disconnected,
}

/// Controller-side half of a Job Channel.
///
/// The inbound receiver is taken once by the manager and pumped into its
/// event loop; dropping the whole struct closes the channel.
#[derive(Debug)]
pub struct ControllerChannel {
    tx: mpsc::UnboundedSender<ControllerMessage>,
    rx: Option<mpsc::UnboundedReceiver<WorkerMessage>>,
}

impl ControllerChannel {
    pub fn send(&self, msg: ControllerMessage) -> Result<(), ChannelError> {
        self.tx.send(msg).map_err(|_| ChannelError::Disconnected)
    }

    /// Take the inbound message stream. Returns `None` if already taken.
    pub fn take_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<WorkerMessage>> {
        self.rx.take()
    }
}

/// Worker-side half of a Job Channel.
#[derive(Debug)]
pub struct WorkerChannel {
    tx: mpsc::UnboundedSender<WorkerMessage>,
    rx: mpsc::UnboundedReceiver<ControllerMessage>,
}

impl WorkerChannel {
    pub fn send(&self, msg: WorkerMessage) -> Result<(), ChannelError> {
        self.tx.send(msg).map_err(|_| ChannelError::Disconnected)
    }

    /// Clone of the outbound sender, for strategy tasks reporting progress.
    pub fn sender(&self) -> mpsc::UnboundedSender<WorkerMessage> {
        self.tx.clone()
    }

    /// Next controller message; `None` once the controller side is gone.
    pub async fn recv(&mut self) -> Option<ControllerMessage> {
        self.rx.recv().await
    }
}

/// Build a connected controller/worker channel pair.
pub fn channel_pair() -> (ControllerChannel, WorkerChannel) {
    let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
    let (wrk_tx, wrk_rx) = mpsc::unbounded_channel();
    (
        ControllerChannel {
            tx: ctl_tx,
            rx: Some(wrk_rx),
        },
        WorkerChannel {
            tx: wrk_tx,
            rx: ctl_rx,
        },
    )
}

/// Stream of context-ready events, fed to the manager at spawn time.
pub type ReadyReceiver = mpsc::UnboundedReceiver<ContextId>;
pub type ReadySender = mpsc::UnboundedSender<ContextId>;

/// The execution-context collaborator.
///
/// Ready events are delivered out of band (see [`ReadyReceiver`]): a host
/// fires one whenever any tracked context finishes loading, including
/// reloads of an already-ready page.
#[async_trait]
pub trait BrowserHost: Send + Sync + 'static {
    /// Create a context navigated to `url`.
    async fn create(&self, url: &str) -> Result<ContextId, HostError>;

    /// Tear down a context. Callers treat failures as best-effort cleanup.
    async fn destroy(&self, id: ContextId) -> Result<(), HostError>;

    /// Open a named channel to the worker runtime inside a context.
    async fn open_channel(
        &self,
        id: ContextId,
        name: &str,
    ) -> Result<ControllerChannel, HostError>;
}
