//! Media items and the download-status transition table.
//!
//! The table is the single authority on legal status moves; the queue and the
//! workers consult it and never mutate status ad hoc. `Pause` on a
//! downloading item releases its worker slot; there is no state that keeps a
//! slot while stopped.

use crate::domain::entities::{MediaRef, MediaType};
use crate::domain::errors::ItemError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Waiting,
    Downloading,
    Paused,
    Completed,
    Failed,
    Skipped,
}

impl DownloadStatus {
    /// The item needs no further work.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Skipped
        )
    }
}

/// Legal transitions, rows = from, columns = to. `Completed → Waiting` exists
/// only for forced re-download (verify mismatch / explicit retry).
pub fn transition_allowed(from: DownloadStatus, to: DownloadStatus) -> bool {
    use DownloadStatus::*;
    matches!(
        (from, to),
        (Waiting, Downloading)
            | (Waiting, Paused)
            | (Waiting, Skipped)
            | (Downloading, Waiting)
            | (Downloading, Paused)
            | (Downloading, Completed)
            | (Downloading, Failed)
            | (Downloading, Skipped)
            | (Paused, Waiting)
            | (Paused, Skipped)
            | (Failed, Waiting)
            | (Completed, Waiting)
            | (Skipped, Waiting)
    )
}

/// One downloadable media object, uniquely identified within its job by
/// `(chat id, message id, slot)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub chat_id: i64,
    pub message_id: i32,
    pub slot: u8,
    pub media_type: MediaType,
    pub file_name: String,
    /// Path relative to the job's export root: `<chatId>/<mediaType>/<name>`.
    pub file_path: String,
    /// Announced size in bytes.
    pub size: u64,
    /// Bytes durably on disk; `downloaded ≤ size` always, and the `.partial`
    /// sibling's length is authoritative on resume.
    pub downloaded: u64,
    pub status: DownloadStatus,
    pub attempts: u32,
    pub error: Option<ItemError>,
    /// Access reference for chunk requests; refreshed when expired.
    pub media_ref: Option<MediaRef>,
    /// Set by the per-item pause control; such items are not refilled
    /// automatically on job resume.
    #[serde(default)]
    pub manually_paused: bool,

    // Runtime-only control flags, not persisted.
    #[serde(skip)]
    pub pause_requested: bool,
    #[serde(skip)]
    pub cancel_requested: bool,
}

impl MediaItem {
    pub fn item_id(chat_id: i64, message_id: i32, slot: u8) -> String {
        format!("{}_{}_{}", chat_id, message_id, slot)
    }

    pub fn new(
        chat_id: i64,
        message_id: i32,
        slot: u8,
        media_type: MediaType,
        file_name: String,
        file_path: String,
        size: u64,
        media_ref: MediaRef,
    ) -> Self {
        Self {
            id: Self::item_id(chat_id, message_id, slot),
            chat_id,
            message_id,
            slot,
            media_type,
            file_name,
            file_path,
            size,
            downloaded: 0,
            status: DownloadStatus::Waiting,
            attempts: 0,
            error: None,
            media_ref: Some(media_ref),
            manually_paused: false,
            pause_requested: false,
            cancel_requested: false,
        }
    }

    pub fn progress(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.downloaded as f64 / self.size as f64 * 100.0
    }
}

/// Queue projection served to the UI: four status lists plus bucket counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueView {
    pub downloading: Vec<MediaItem>,
    pub waiting: Vec<MediaItem>,
    pub failed: Vec<MediaItem>,
    pub completed: Vec<MediaItem>,
    pub counts: QueueCounts,
    pub current_concurrency: usize,
    /// Items actually holding a worker slot right now.
    pub active_threads: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub active: usize,
    pub waiting: usize,
    pub failed: usize,
    pub completed: usize,
}

#[cfg(test)]
mod tests {
    use super::DownloadStatus::*;
    use super::*;

    #[test]
    fn downloading_can_settle_or_release() {
        for to in [Waiting, Paused, Completed, Failed, Skipped] {
            assert!(transition_allowed(Downloading, to), "downloading -> {to:?}");
        }
    }

    #[test]
    fn settled_states_only_reopen_to_waiting() {
        for from in [Completed, Failed, Skipped] {
            assert!(transition_allowed(from, Waiting));
            for to in [Downloading, Paused, Completed, Failed, Skipped] {
                if to != from {
                    assert!(!transition_allowed(from, to), "{from:?} -> {to:?}");
                }
            }
        }
    }

    #[test]
    fn paused_never_goes_straight_to_downloading() {
        assert!(!transition_allowed(Paused, Downloading));
        assert!(transition_allowed(Paused, Waiting));
        assert!(transition_allowed(Paused, Skipped));
    }

    #[test]
    fn waiting_cannot_settle_without_a_worker() {
        assert!(!transition_allowed(Waiting, Completed));
        assert!(!transition_allowed(Waiting, Failed));
    }
}
