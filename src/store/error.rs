//! Error types for durable storage.

use thiserror::Error;

/// Failure reported by a [`Medium`](super::Medium).
#[derive(Debug, Error)]
pub enum MediumError {
    #[error("quota exceeded writing '{key}' ({needed} bytes)")]
    QuotaExceeded { key: String, needed: usize },

    #[error("medium i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a save did not reach the medium.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Medium(#[from] MediumError),

    #[error("failed to encode collection: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the failure is the medium running out of space.
    pub fn is_quota(&self) -> bool {
        matches!(self, StoreError::Medium(MediumError::QuotaExceeded { .. }))
    }
}
