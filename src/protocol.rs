//! Job Channel protocol: the message types exchanged between the controller
//! and one worker over its channel.
//!
//! Both directions are closed tagged enums so an unhandled message kind is a
//! compile-time gap, not a silent drop. Messages are JSON-serializable; a
//! channel delivers them in send order, and a channel may disconnect silently
//! at any time.

use serde::{Deserialize, Serialize};

use crate::domain::{Product, Site};

/// Controller → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    /// Begin extraction, replacing any run already in progress.
    Start {
        query: String,
        site: Site,
        target_count: usize,
    },
    /// Stop the active run cooperatively.
    Cancel,
}

/// Worker → controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Interim item count for the current run, not yet merged controller-side.
    Progress { count: usize },
    /// Final batch of items for this run.
    Result { items: Vec<Product> },
    /// Fatal extraction failure.
    Error { message: String },
    /// The worker acknowledges a cancellation.
    Cancel,
}
