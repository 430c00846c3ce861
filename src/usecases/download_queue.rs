//! Per-job download queue: one mutex-protected container of media items,
//! partitioned by status, with O(1) claim and status-bucket projections.
//!
//! The scanner enqueues with backpressure (soft cap on the waiting bucket);
//! workers claim from the head; the controller drives the per-item control
//! operations. Status moves always go through the domain transition table.

use crate::domain::queue::{transition_allowed, DownloadStatus, MediaItem, QueueCounts, QueueView};
use crate::domain::ItemError;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::debug;

/// Waiting-bucket depth at which the scanner blocks on enqueue, throttling
/// history iteration on media-heavy chats.
pub const QUEUE_SOFT_CAP: usize = 4096;

/// Aggregate counters derived from the queue, mirrored into the job
/// descriptor after every settle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total: u64,
    pub done: u64,
    pub failed: u64,
    pub total_size: u64,
    pub done_size: u64,
}

struct QueueInner {
    items: HashMap<String, MediaItem>,
    /// Claim order for the waiting bucket; ids here always have status
    /// `Waiting`.
    waiting: VecDeque<String>,
    paused_global: bool,
}

pub struct DownloadQueue {
    inner: Mutex<QueueInner>,
    /// Signalled when waiting work appears or global pause lifts.
    ready: Notify,
    /// Signalled when the waiting bucket shrinks below the soft cap.
    space: Notify,
    soft_cap: usize,
}

impl Default for DownloadQueue {
    fn default() -> Self {
        Self::new(QUEUE_SOFT_CAP)
    }
}

impl DownloadQueue {
    pub fn new(soft_cap: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: HashMap::new(),
                waiting: VecDeque::new(),
                paused_global: false,
            }),
            ready: Notify::new(),
            space: Notify::new(),
            soft_cap,
        }
    }

    /// Rebuild a queue from persisted items. Items left `downloading` by a
    /// crash have already been demoted to `waiting` by the store.
    pub fn from_items(items: Vec<MediaItem>) -> Self {
        let queue = Self::default();
        {
            let mut q = queue.inner.lock().unwrap();
            let mut waiting: Vec<&MediaItem> = items
                .iter()
                .filter(|i| i.status == DownloadStatus::Waiting)
                .collect();
            waiting.sort_by_key(|i| (i.chat_id, i.message_id, i.slot));
            for item in &waiting {
                q.waiting.push_back(item.id.clone());
            }
            for item in items {
                q.items.insert(item.id.clone(), item);
            }
        }
        queue
    }

    /// Append a new item to the waiting bucket, blocking while the bucket is
    /// at the soft cap. Returns false if the id is already known (rescan).
    pub async fn enqueue(&self, item: MediaItem) -> bool {
        loop {
            let space = self.space.notified();
            {
                let mut q = self.inner.lock().unwrap();
                if q.items.contains_key(&item.id) {
                    return false;
                }
                if q.waiting.len() < self.soft_cap {
                    q.waiting.push_back(item.id.clone());
                    q.items.insert(item.id.clone(), item);
                    drop(q);
                    self.ready.notify_one();
                    return true;
                }
            }
            space.await;
        }
    }

    /// Future that resolves when waiting work may be available. Obtain it
    /// *before* a failed [`claim_next`] to avoid lost wakeups.
    pub fn ready_signal(&self) -> Notified<'_> {
        self.ready.notified()
    }

    /// Atomically move the head of waiting to downloading. Returns `None`
    /// when the bucket is empty or global pause is asserted.
    pub fn claim_next(&self) -> Option<MediaItem> {
        let mut q = self.inner.lock().unwrap();
        if q.paused_global {
            return None;
        }
        while let Some(id) = q.waiting.pop_front() {
            let Some(item) = q.items.get_mut(&id) else {
                continue;
            };
            if item.status != DownloadStatus::Waiting {
                continue;
            }
            item.status = DownloadStatus::Downloading;
            item.pause_requested = false;
            item.cancel_requested = false;
            let claimed = item.clone();
            drop(q);
            self.space.notify_one();
            return Some(claimed);
        }
        None
    }

    /// Global pause: while asserted, no new claims succeed. Lifting it wakes
    /// every idle worker.
    pub fn set_global_pause(&self, paused: bool) {
        {
            let mut q = self.inner.lock().unwrap();
            q.paused_global = paused;
        }
        if !paused {
            self.ready.notify_waiters();
        }
    }

    fn apply(
        q: &mut QueueInner,
        id: &str,
        to: DownloadStatus,
        f: impl FnOnce(&mut MediaItem),
    ) -> bool {
        let Some(item) = q.items.get_mut(id) else {
            return false;
        };
        if !transition_allowed(item.status, to) {
            debug!(item = id, from = ?item.status, ?to, "transition rejected");
            return false;
        }
        if item.status == DownloadStatus::Waiting {
            q.waiting.retain(|w| w != id);
        }
        let item = q.items.get_mut(id).unwrap();
        item.status = to;
        f(item);
        true
    }

    fn push_waiting(&self, q: &mut QueueInner, id: &str, front: bool) {
        if front {
            q.waiting.push_front(id.to_string());
        } else {
            q.waiting.push_back(id.to_string());
        }
        self.ready.notify_one();
    }

    /// Worker outcome: all bytes on disk, `.partial` renamed.
    pub fn complete(&self, id: &str) -> bool {
        let mut q = self.inner.lock().unwrap();
        Self::apply(&mut q, id, DownloadStatus::Completed, |item| {
            item.downloaded = item.size;
            item.error = None;
            item.pause_requested = false;
            item.cancel_requested = false;
        })
    }

    /// Worker outcome: attempts exhausted or permanent error.
    pub fn fail(&self, id: &str, downloaded: u64, error: ItemError) -> bool {
        let mut q = self.inner.lock().unwrap();
        Self::apply(&mut q, id, DownloadStatus::Failed, |item| {
            item.downloaded = downloaded;
            item.error = Some(error);
        })
    }

    /// Worker checkpoint honoured a pause request (or the job paused):
    /// release the slot, keep the partial.
    pub fn mark_paused(&self, id: &str, downloaded: u64) -> bool {
        let mut q = self.inner.lock().unwrap();
        Self::apply(&mut q, id, DownloadStatus::Paused, |item| {
            item.downloaded = downloaded;
            item.pause_requested = false;
        })
    }

    /// Worker checkpoint honoured a cancel request.
    pub fn mark_skipped(&self, id: &str, downloaded: u64) -> bool {
        let mut q = self.inner.lock().unwrap();
        Self::apply(&mut q, id, DownloadStatus::Skipped, |item| {
            item.downloaded = downloaded;
            item.cancel_requested = false;
        })
    }

    /// Return a claimed item to the head of waiting (global pause, worker
    /// resize exit). Progress is kept.
    pub fn release(&self, id: &str, downloaded: u64) -> bool {
        let mut q = self.inner.lock().unwrap();
        let ok = Self::apply(&mut q, id, DownloadStatus::Waiting, |item| {
            item.downloaded = downloaded;
            item.pause_requested = false;
        });
        if ok {
            self.push_waiting(&mut q, id, true);
        }
        ok
    }

    /// Per-item pause control. A waiting item pauses immediately; a
    /// downloading one is flagged and pauses at its next chunk checkpoint.
    pub fn pause_item(&self, id: &str) -> bool {
        let mut q = self.inner.lock().unwrap();
        match q.items.get(id).map(|i| i.status) {
            Some(DownloadStatus::Downloading) => {
                let item = q.items.get_mut(id).unwrap();
                item.pause_requested = true;
                item.manually_paused = true;
                true
            }
            Some(DownloadStatus::Waiting) => Self::apply(&mut q, id, DownloadStatus::Paused, |item| {
                item.manually_paused = true;
            }),
            _ => false,
        }
    }

    /// Per-item resume: paused → waiting.
    pub fn resume_item(&self, id: &str) -> bool {
        let mut q = self.inner.lock().unwrap();
        let ok = Self::apply(&mut q, id, DownloadStatus::Waiting, |item| {
            item.manually_paused = false;
        });
        if ok {
            self.push_waiting(&mut q, id, false);
        }
        ok
    }

    /// Per-item cancel (skip). Downloading items are flagged and skip at the
    /// next checkpoint; their `.partial` is retained.
    pub fn cancel_item(&self, id: &str) -> bool {
        let mut q = self.inner.lock().unwrap();
        match q.items.get(id).map(|i| i.status) {
            Some(DownloadStatus::Downloading) => {
                q.items.get_mut(id).unwrap().cancel_requested = true;
                true
            }
            Some(DownloadStatus::Waiting) | Some(DownloadStatus::Paused) => {
                Self::apply(&mut q, id, DownloadStatus::Skipped, |_| {})
            }
            _ => false,
        }
    }

    /// Retry: failed/skipped (or completed, when forced) back to waiting with
    /// the attempt counter reset. Downloaded bytes are kept: the `.partial`
    /// length decides the resume offset.
    pub fn retry_item(&self, id: &str, force: bool) -> bool {
        let mut q = self.inner.lock().unwrap();
        let from = match q.items.get(id).map(|i| i.status) {
            Some(s) => s,
            None => return false,
        };
        if from == DownloadStatus::Completed && !force {
            return false;
        }
        if !from.is_settled() {
            return false;
        }
        let ok = Self::apply(&mut q, id, DownloadStatus::Waiting, |item| {
            item.attempts = 0;
            item.error = None;
            item.manually_paused = false;
            if from == DownloadStatus::Completed {
                item.downloaded = 0;
            }
        });
        if ok {
            self.push_waiting(&mut q, id, false);
        }
        ok
    }

    /// Move every failed item back to waiting; returns how many moved.
    pub fn retry_failed(&self) -> usize {
        let failed: Vec<String> = {
            let q = self.inner.lock().unwrap();
            q.items
                .values()
                .filter(|i| i.status == DownloadStatus::Failed)
                .map(|i| i.id.clone())
                .collect()
        };
        failed
            .iter()
            .filter(|id| self.retry_item(id, false))
            .count()
    }

    /// Refill the waiting bucket from paused items on job resume, except
    /// those the operator paused individually.
    pub fn refill_paused(&self) -> usize {
        let paused: Vec<String> = {
            let q = self.inner.lock().unwrap();
            let mut ids: Vec<&MediaItem> = q
                .items
                .values()
                .filter(|i| i.status == DownloadStatus::Paused && !i.manually_paused)
                .collect();
            ids.sort_by_key(|i| (i.chat_id, i.message_id, i.slot));
            ids.iter().map(|i| i.id.clone()).collect()
        };
        paused
            .iter()
            .filter(|id| self.resume_item(id))
            .count()
    }

    /// A confirmed on-disk file of the announced size settles the item
    /// (startup disk sync and worker dedup). Walks the legal transition path.
    pub fn confirm_completed(&self, id: &str) -> bool {
        let mut q = self.inner.lock().unwrap();
        let Some(status) = q.items.get(id).map(|i| i.status) else {
            return false;
        };
        match status {
            DownloadStatus::Completed => return true,
            DownloadStatus::Failed | DownloadStatus::Skipped | DownloadStatus::Paused => {
                if !Self::apply(&mut q, id, DownloadStatus::Waiting, |item| {
                    item.attempts = 0;
                    item.error = None;
                }) {
                    return false;
                }
                q.waiting.retain(|w| w != id);
            }
            _ => {}
        }
        Self::apply(&mut q, id, DownloadStatus::Downloading, |_| {})
            && Self::apply(&mut q, id, DownloadStatus::Completed, |item| {
                item.downloaded = item.size;
                item.error = None;
            })
    }

    /// Progress tick from a worker; keeps `downloaded ≤ size`.
    pub fn update_progress(&self, id: &str, downloaded: u64) {
        let mut q = self.inner.lock().unwrap();
        if let Some(item) = q.items.get_mut(id) {
            item.downloaded = if item.size > 0 {
                downloaded.min(item.size)
            } else {
                downloaded
            };
        }
    }

    /// Fix an item's size once the end of an unknown-length file is reached.
    pub fn finalize_size(&self, id: &str, size: u64) {
        let mut q = self.inner.lock().unwrap();
        if let Some(item) = q.items.get_mut(id) {
            if item.size == 0 {
                item.size = size;
            }
        }
    }

    /// Control flags polled by the worker between chunks:
    /// `(pause_requested, cancel_requested)`.
    pub fn control_flags(&self, id: &str) -> (bool, bool) {
        let q = self.inner.lock().unwrap();
        q.items
            .get(id)
            .map(|i| (i.pause_requested, i.cancel_requested))
            .unwrap_or((false, false))
    }

    pub fn get(&self, id: &str) -> Option<MediaItem> {
        self.inner.lock().unwrap().items.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing waiting and nothing in flight. Paused/failed items may remain;
    /// the controller decides whether that finalises as completed or paused.
    pub fn is_idle(&self) -> bool {
        let q = self.inner.lock().unwrap();
        q.waiting.is_empty()
            && !q
                .items
                .values()
                .any(|i| i.status == DownloadStatus::Downloading)
    }

    /// Full item list for persistence snapshots.
    pub fn snapshot_items(&self) -> Vec<MediaItem> {
        let q = self.inner.lock().unwrap();
        let mut items: Vec<MediaItem> = q.items.values().cloned().collect();
        items.sort_by_key(|i| (i.chat_id, i.message_id, i.slot));
        items
    }

    /// Ids of items in a given status (verification, delegated batching).
    pub fn ids_in_status(&self, status: DownloadStatus) -> Vec<String> {
        let q = self.inner.lock().unwrap();
        let mut items: Vec<&MediaItem> =
            q.items.values().filter(|i| i.status == status).collect();
        items.sort_by_key(|i| (i.chat_id, i.message_id, i.slot));
        items.iter().map(|i| i.id.clone()).collect()
    }

    pub fn stats(&self) -> QueueStats {
        let q = self.inner.lock().unwrap();
        let mut stats = QueueStats::default();
        for item in q.items.values() {
            stats.total += 1;
            stats.total_size += item.size;
            match item.status {
                DownloadStatus::Completed | DownloadStatus::Skipped => {
                    stats.done += 1;
                    stats.done_size += item.size;
                }
                DownloadStatus::Failed => stats.failed += 1,
                _ => {}
            }
        }
        stats
    }

    /// Status-bucket projection lists. Active combines downloading, paused,
    /// and waiting-with-progress items; `limit = 0` means unlimited.
    pub fn view(&self, limit: usize, reversed: bool, concurrency: usize) -> QueueView {
        let q = self.inner.lock().unwrap();
        let mut downloading = Vec::new();
        let mut waiting = Vec::new();
        let mut failed = Vec::new();
        let mut completed = Vec::new();
        for item in q.items.values() {
            match item.status {
                DownloadStatus::Downloading | DownloadStatus::Paused => {
                    downloading.push(item.clone())
                }
                DownloadStatus::Waiting if item.downloaded > 0 => downloading.push(item.clone()),
                DownloadStatus::Waiting => waiting.push(item.clone()),
                DownloadStatus::Failed => failed.push(item.clone()),
                DownloadStatus::Completed | DownloadStatus::Skipped => {
                    completed.push(item.clone())
                }
            }
        }
        let active_threads = downloading
            .iter()
            .filter(|i| i.status == DownloadStatus::Downloading)
            .count();
        let counts = QueueCounts {
            active: downloading.len(),
            waiting: waiting.len(),
            failed: failed.len(),
            completed: completed.len(),
        };
        for bucket in [&mut downloading, &mut waiting, &mut failed, &mut completed] {
            bucket.sort_by_key(|i| (i.chat_id, i.message_id, i.slot));
            if reversed {
                bucket.reverse();
            }
            if limit > 0 {
                bucket.truncate(limit);
            }
        }
        QueueView {
            downloading,
            waiting,
            failed,
            completed,
            counts,
            current_concurrency: concurrency,
            active_threads,
        }
    }
}
