//! Inbound port. The HTTP adapter calls into the application.

use crate::domain::{DomainError, ExportFilter, ExportJob, QueueView};

/// Control surface for export jobs. Implemented by the engine; every
/// operation that mutates a job takes that job's exclusive control lock and
/// returns [`DomainError::Busy`] if a concurrent call already holds it.
#[async_trait::async_trait]
pub trait ExportControlPort: Send + Sync {
    /// Create a job in `pending`; returns its descriptor.
    async fn create_job(&self, name: &str, filter: ExportFilter)
        -> Result<ExportJob, DomainError>;

    /// `pending → extracting`; spawns the resolve/scan/download pipeline.
    async fn start(&self, job_id: &str) -> Result<(), DomainError>;

    /// `running|extracting → paused`; workers release after their current
    /// chunk, the scanner suspends at the next message boundary.
    async fn pause(&self, job_id: &str) -> Result<(), DomainError>;

    /// `paused → running`; wakes workers, scanner resumes from cursors.
    async fn resume(&self, job_id: &str) -> Result<(), DomainError>;

    /// Any live state `→ cancelled`; partials are retained.
    async fn cancel(&self, job_id: &str) -> Result<(), DomainError>;

    /// Remove the job's metadata directory. The exported media tree is
    /// removed only when `remove_files` is set.
    async fn delete(&self, job_id: &str, remove_files: bool) -> Result<(), DomainError>;

    /// Move every failed item back to waiting; returns how many moved.
    async fn retry_failed(&self, job_id: &str) -> Result<usize, DomainError>;

    /// Move one item back to waiting (forced for completed items).
    async fn retry_item(&self, job_id: &str, item_id: &str) -> Result<(), DomainError>;

    async fn pause_item(&self, job_id: &str, item_id: &str) -> Result<(), DomainError>;
    async fn resume_item(&self, job_id: &str, item_id: &str) -> Result<(), DomainError>;

    /// Skip one item; a partially-written `.partial` is kept for later retry.
    async fn cancel_item(&self, job_id: &str, item_id: &str) -> Result<(), DomainError>;

    /// Walk completed/failed items, compare on-disk length to the announced
    /// size, and force-requeue mismatches.
    async fn verify(&self, job_id: &str) -> Result<(), DomainError>;

    /// Rescan message history; `full` ignores saved cursors.
    async fn rescan(&self, job_id: &str, full: bool) -> Result<(), DomainError>;

    /// Mutate the worker bound (and optionally the parallel-chunk flag) of a
    /// running job.
    async fn set_concurrency(
        &self,
        job_id: &str,
        max_concurrent: usize,
        parallel_chunk: Option<bool>,
    ) -> Result<(), DomainError>;

    /// Toggle the delegated external downloader for subsequent drains.
    async fn set_delegated(&self, job_id: &str, enabled: bool) -> Result<(), DomainError>;

    /// Descriptor + aggregates snapshot.
    async fn snapshot(&self, job_id: &str) -> Result<ExportJob, DomainError>;

    /// Snapshots of every known job.
    async fn snapshots(&self) -> Vec<ExportJob>;

    /// Queue projection lists for the UI.
    async fn queue_view(
        &self,
        job_id: &str,
        limit: usize,
        reversed: bool,
    ) -> Result<QueueView, DomainError>;
}
