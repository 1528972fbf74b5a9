//! Error types for sync event submission and delivery.

use thiserror::Error;

use super::SyncEventType;

/// Returned by [`SyncEngine::submit`](super::SyncEngine::submit) when nothing was queued.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{event_type} rejected: {}", .errors.join("; "))]
    Invalid {
        event_type: SyncEventType,
        errors: Vec<String>,
    },
}

/// A listener could not handle an event; the engine will retry it.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(msg: impl Into<String>) -> Self {
        ListenerError(msg.into())
    }
}
