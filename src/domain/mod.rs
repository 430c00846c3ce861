//! Core domain layer. No external I/O dependencies.
//!
//! Entities and business rules live here. Dependencies flow inward.

pub mod entities;
pub mod errors;
pub mod job;
pub mod queue;

pub use entities::{
    media_file_name, sanitize, Chat, ChatType, EntityKind, EntitySpan, MediaNote, MediaRef,
    MediaRefKind, MediaType, MessageRecord, ScannedMedia, ScannedMessage,
};
pub use errors::{DomainError, ItemError, ItemErrorKind};
pub use job::{ExportFilter, ExportFormat, ExportJob, FilterMode, JobStatus};
pub use queue::{transition_allowed, DownloadStatus, MediaItem, QueueCounts, QueueView};
