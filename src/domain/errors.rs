//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these. Download-path errors carry
//! a kind so workers can decide between retry, refresh, and giving up without
//! inspecting error text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Telegram gateway error: {0}")]
    TgGateway(String),

    #[error("Repository error: {0}")]
    Repo(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Media download failed: {0}")]
    Media(String),

    /// FloodWait error: the rate gate must be held for `seconds` before any
    /// further request is admitted. Does not consume a retry attempt.
    #[error("FloodWait: retry after {seconds} seconds")]
    FloodWait { seconds: u64 },

    /// The access reference for a file has aged out; refresh it from the
    /// owning message and retry the same chunk.
    #[error("file reference expired")]
    ReferenceExpired,

    /// Recoverable transport failure (timeout, reset, reconnect in flight).
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Unrecoverable per-item failure (message deleted, access denied,
    /// unsupported media). The item fails; the job continues.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Unrecoverable per-job failure (session revoked, invalid credentials).
    #[error("fatal session error: {0}")]
    Fatal(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A concurrent control call already holds this job's lock.
    #[error("job busy: {0}")]
    Busy(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Stable per-item error classification surfaced through the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    Transient,
    RateLimited,
    StaleReference,
    Permanent,
    /// Delegated-downloader batch exited non-zero.
    Batch,
}

/// Structured error attached to a failed media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ItemErrorKind,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: ItemErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&DomainError> for ItemError {
    fn from(err: &DomainError) -> Self {
        let kind = match err {
            DomainError::FloodWait { .. } => ItemErrorKind::RateLimited,
            DomainError::ReferenceExpired => ItemErrorKind::StaleReference,
            DomainError::Transient(_) | DomainError::TgGateway(_) => ItemErrorKind::Transient,
            _ => ItemErrorKind::Permanent,
        };
        Self::new(kind, err.to_string())
    }
}
