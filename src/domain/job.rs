//! Export job descriptor: filter, policies, state machine, aggregates.
//!
//! Closed record types only: the recognised option set is enumerated here,
//! and `JobStatus` transitions are driven exclusively by the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hard bound on the worker pool size.
pub const MAX_CONCURRENT_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Extracting,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// A job in one of these states holds no live scanner or workers.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Html,
    Json,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// No per-message filtering.
    None,
    /// Skip the listed message ids.
    Skip,
    /// Download only the listed message ids.
    Specify,
}

/// Everything the operator chooses when creating a job. Missing keys take
/// defaults, matching the API's partial-body behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportFilter {
    // Chat-type mask.
    pub private_chats: bool,
    pub bot_chats: bool,
    pub private_groups: bool,
    pub private_channels: bool,
    pub public_groups: bool,
    pub public_channels: bool,
    /// Explicit chat ids; when non-empty the type mask is ignored.
    pub specific_chats: Vec<i64>,
    pub only_my_messages: bool,

    // Message-id range. `message_to = 0` means "current head".
    pub message_from: i32,
    pub message_to: i32,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,

    // Media-type mask.
    pub photos: bool,
    pub videos: bool,
    pub voice_messages: bool,
    pub video_messages: bool,
    pub audio_files: bool,
    pub documents: bool,
    pub stickers: bool,
    pub animations: bool,

    // Per-message include/skip list.
    pub filter_mode: FilterMode,
    pub filter_messages: Vec<i32>,

    // Output policy.
    pub export_format: ExportFormat,
    /// Output root override; defaults to the configured export root.
    pub export_path: Option<String>,

    // Performance policy.
    pub max_concurrent_downloads: usize,
    /// When on, large files are fetched over 3 connections instead of 1.
    pub parallel_chunk: bool,
    pub proxy_url: Option<String>,
    /// Delegate media transfer to the external downloader process.
    pub tdl_mode: bool,

    // Retry policy.
    pub max_download_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for ExportFilter {
    fn default() -> Self {
        Self {
            private_chats: true,
            bot_chats: false,
            private_groups: true,
            private_channels: true,
            public_groups: false,
            public_channels: false,
            specific_chats: Vec::new(),
            only_my_messages: false,
            message_from: 1,
            message_to: 0,
            date_from: None,
            date_to: None,
            photos: true,
            videos: true,
            voice_messages: true,
            video_messages: true,
            audio_files: true,
            documents: true,
            stickers: false,
            animations: true,
            filter_mode: FilterMode::None,
            filter_messages: Vec::new(),
            export_format: ExportFormat::Html,
            export_path: None,
            max_concurrent_downloads: 5,
            parallel_chunk: false,
            proxy_url: None,
            tdl_mode: false,
            max_download_retries: 5,
            retry_delay_secs: 2,
        }
    }
}

impl ExportFilter {
    /// Worker bound clamped to the allowed range.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_downloads.clamp(1, MAX_CONCURRENT_LIMIT)
    }

    /// Connections used for a single large file: 1, or 3 with parallel_chunk.
    pub fn chunk_connections(&self) -> usize {
        if self.parallel_chunk {
            3
        } else {
            1
        }
    }

    pub fn wants_media_type(&self, media_type: crate::domain::MediaType) -> bool {
        use crate::domain::MediaType::*;
        match media_type {
            Photo => self.photos,
            Video => self.videos,
            Voice => self.voice_messages,
            VideoNote => self.video_messages,
            Audio => self.audio_files,
            Document => self.documents,
            Sticker => self.stickers,
            Animation => self.animations,
        }
    }

    /// Applies the explicit include/skip list.
    pub fn wants_message(&self, message_id: i32) -> bool {
        match self.filter_mode {
            FilterMode::None => true,
            FilterMode::Skip => !self.filter_messages.contains(&message_id),
            FilterMode::Specify => self.filter_messages.contains(&message_id),
        }
    }
}

/// One export job: identity, filter, state, aggregates, resume cursors.
///
/// Persisted to `jobs/<id>/job.json` on every transition and periodically
/// while running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub filter: ExportFilter,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    // Aggregates. `processed ≤ total` for each pair once the total is known.
    pub total_chats: usize,
    pub processed_chats: usize,
    pub total_messages: u64,
    pub processed_messages: u64,
    pub total_media: u64,
    pub downloaded_media: u64,
    pub failed_media: u64,
    pub total_size: u64,
    pub downloaded_size: u64,

    /// Instantaneous download speed, bytes/s.
    pub download_speed: f64,
    pub error: Option<String>,
    pub verify_summary: Option<String>,
    #[serde(default)]
    pub verifying: bool,

    /// Label and message id of the chat currently being scanned.
    pub current_chat: Option<String>,
    #[serde(default)]
    pub current_message_id: i32,

    /// Per-chat highest message id durably persisted.
    #[serde(default)]
    pub cursors: HashMap<i64, i32>,
}

impl ExportJob {
    pub fn new(id: String, name: String, filter: ExportFilter) -> Self {
        Self {
            id,
            name,
            status: JobStatus::Pending,
            filter,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            total_chats: 0,
            processed_chats: 0,
            total_messages: 0,
            processed_messages: 0,
            total_media: 0,
            downloaded_media: 0,
            failed_media: 0,
            total_size: 0,
            downloaded_size: 0,
            download_speed: 0.0,
            error: None,
            verify_summary: None,
            verifying: false,
            current_chat: None,
            current_message_id: 0,
            cursors: HashMap::new(),
        }
    }

    /// Overall progress in percent, phase-aware: chat resolution while
    /// extracting, then media (or message) counts.
    pub fn progress(&self) -> f64 {
        if self.status == JobStatus::Extracting {
            if self.total_chats == 0 {
                return 0.0;
            }
            return self.processed_chats as f64 / self.total_chats as f64 * 100.0;
        }
        if self.total_media == 0 {
            if self.total_messages == 0 {
                return 0.0;
            }
            return self.processed_messages as f64 / self.total_messages as f64 * 100.0;
        }
        self.downloaded_media as f64 / self.total_media as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_defaults_match_documented_values() {
        let f = ExportFilter::default();
        assert_eq!(f.message_from, 1);
        assert_eq!(f.message_to, 0);
        assert!(f.private_chats && f.private_channels);
        assert!(!f.public_channels && !f.stickers);
        assert_eq!(f.concurrency(), 5);
        assert_eq!(f.chunk_connections(), 1);
    }

    #[test]
    fn concurrency_is_clamped() {
        let mut f = ExportFilter {
            max_concurrent_downloads: 99,
            ..Default::default()
        };
        assert_eq!(f.concurrency(), MAX_CONCURRENT_LIMIT);
        f.max_concurrent_downloads = 0;
        assert_eq!(f.concurrency(), 1);
    }

    #[test]
    fn message_filter_modes() {
        let mut f = ExportFilter {
            filter_mode: FilterMode::Skip,
            filter_messages: vec![10, 20],
            ..Default::default()
        };
        assert!(!f.wants_message(10));
        assert!(f.wants_message(11));
        f.filter_mode = FilterMode::Specify;
        assert!(f.wants_message(20));
        assert!(!f.wants_message(21));
    }

    #[test]
    fn progress_by_phase() {
        let mut job = ExportJob::new("j".into(), "n".into(), ExportFilter::default());
        job.status = JobStatus::Extracting;
        job.total_chats = 4;
        job.processed_chats = 1;
        assert_eq!(job.progress(), 25.0);
        job.status = JobStatus::Running;
        job.total_media = 10;
        job.downloaded_media = 5;
        assert_eq!(job.progress(), 50.0);
    }
}
