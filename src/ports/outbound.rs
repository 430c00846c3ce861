//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{
    Chat, DomainError, ExportJob, MediaItem, MediaRef, MessageRecord, ScannedMessage,
};

/// Telegram API gateway: one authenticated session against the messaging
/// service, shared by every job of the user. All outbound calls pass through
/// the adapter's rate gate.
#[async_trait::async_trait]
pub trait TgGateway: Send + Sync {
    /// Numeric id of the authenticated user ("only my messages" filter).
    async fn me(&self) -> Result<i64, DomainError>;

    /// Fetch all dialogs (chats) the user participates in. Finite; the
    /// adapter pages to completion.
    async fn get_dialogs(&self) -> Result<Vec<Chat>, DomainError>;

    /// Resolve a single chat by its normalised numeric id.
    async fn resolve_chat(&self, chat_id: i64) -> Result<Chat, DomainError>;

    /// One page of history in ascending id order, containing only messages
    /// with `id > after_id`. An empty page means the chat's current head has
    /// been reached. Callers rely on monotonicity: successive pages never
    /// repeat or reorder ids.
    async fn history_page(
        &self,
        chat_id: i64,
        after_id: i32,
        limit: i32,
    ) -> Result<Vec<ScannedMessage>, DomainError>;

    /// Fetch `limit` bytes of a file at `offset`.
    ///
    /// # Errors
    /// - [`DomainError::ReferenceExpired`]: refresh the reference and retry.
    /// - [`DomainError::FloodWait`]: the gate is already held; retry the
    ///   same offset without consuming an attempt.
    /// - [`DomainError::Transient`]: back off and retry.
    /// - [`DomainError::Permanent`]: give up on this item.
    async fn download_chunk(
        &self,
        media: &MediaRef,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<u8>, DomainError>;

    /// Re-fetch the owning message and return a fresh access reference.
    async fn refresh_reference(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<MediaRef, DomainError>;
}

/// Append-only archive of message records, one log per chat per job.
#[async_trait::async_trait]
pub trait MessageLogPort: Send + Sync {
    /// Append records in scan order. Replays after a crash may re-append the
    /// unpersisted tail; readers deduplicate by message id.
    async fn append(
        &self,
        job_id: &str,
        chat_id: i64,
        records: &[MessageRecord],
    ) -> Result<(), DomainError>;
}

/// Crash-safe persistence of job descriptors, queue snapshots, and per-chat
/// scan cursors. All structured writes are atomic (write-temp-then-rename).
#[async_trait::async_trait]
pub trait ResumeStorePort: Send + Sync {
    async fn save_job(&self, job: &ExportJob) -> Result<(), DomainError>;

    async fn save_queue(&self, job_id: &str, items: &[MediaItem]) -> Result<(), DomainError>;

    /// Persist the highest durably-logged message id for one chat.
    async fn save_cursor(
        &self,
        job_id: &str,
        chat_id: i64,
        message_id: i32,
    ) -> Result<(), DomainError>;

    /// Rehydrate every stored job with its queue. Items found downloading
    /// revert to waiting; their `.partial` length decides the resume offset.
    async fn load_jobs(&self) -> Result<Vec<(ExportJob, Vec<MediaItem>)>, DomainError>;

    /// Remove the job's metadata directory.
    async fn delete_job(&self, job_id: &str) -> Result<(), DomainError>;
}

/// One media item handed to the external downloader process.
#[derive(Debug, Clone)]
pub struct DelegatedItem {
    pub item_id: String,
    pub chat_id: i64,
    pub message_id: i32,
    pub file_name: String,
    pub size: u64,
}

/// Progress tick parsed from the external downloader's output.
#[derive(Debug, Clone)]
pub struct DelegatedProgress {
    pub item_id: String,
    pub downloaded: u64,
    pub total: u64,
}

/// Adapter for the external high-throughput downloader process.
#[async_trait::async_trait]
pub trait DelegatedDownloaderPort: Send + Sync {
    /// Run one batch: invoke the process for `items` into `target_dir`,
    /// streaming progress ticks through `progress`.
    ///
    /// Returns `Ok(())` only when the process exits zero; any non-zero exit
    /// is an error and the caller fails the whole batch; progress ticks
    /// alone never complete an item.
    async fn download_batch(
        &self,
        items: &[DelegatedItem],
        target_dir: &std::path::Path,
        progress: tokio::sync::mpsc::Sender<DelegatedProgress>,
    ) -> Result<(), DomainError>;
}
