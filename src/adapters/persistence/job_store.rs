//! Resume store: directory-based, one directory per job.
//!
//! Layout under the data root:
//!
//! ```text
//! jobs/<jobId>/job.json          descriptor + aggregates
//! jobs/<jobId>/queue.json        media items
//! jobs/<jobId>/cursor/<chatId>   last durably-logged message id
//! jobs/<jobId>/messages/<chatId>.ndjson (written by the message log)
//! ```
//!
//! Structured writes use write-to-temp-then-rename with sync_all, so a crash
//! after any rename leaves a consistent snapshot. Writes are serialised per
//! job; reads work on immutable snapshots.

use crate::domain::{DomainError, DownloadStatus, ExportJob, MediaItem};
use crate::ports::outbound::ResumeStorePort;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct JobStore {
    root: PathBuf,
    /// One write lock per job id.
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JobStore {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            root: data_root.as_ref().join("jobs"),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    fn lock_for(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(job_id.to_string()).or_default())
    }

    /// Atomic write: temp file, flush, sync, rename over the target.
    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DomainError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::State(format!("create dir: {e}")))?;
        }
        let temp = path.with_extension("tmp");
        let mut f = fs::File::create(&temp)
            .await
            .map_err(|e| DomainError::State(format!("create temp file: {e}")))?;
        f.write_all(bytes)
            .await
            .map_err(|e| DomainError::State(format!("write temp file: {e}")))?;
        f.sync_all()
            .await
            .map_err(|e| DomainError::State(format!("sync temp file: {e}")))?;
        drop(f);
        fs::rename(&temp, path)
            .await
            .map_err(|e| DomainError::State(format!("atomic rename failed: {e}")))?;
        Ok(())
    }

    async fn read_job(&self, dir: &Path) -> Option<(ExportJob, Vec<MediaItem>)> {
        let job_raw = fs::read_to_string(dir.join("job.json")).await.ok()?;
        let mut job: ExportJob = match serde_json::from_str(&job_raw) {
            Ok(job) => job,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "unreadable job.json, skipping");
                return None;
            }
        };
        let mut items: Vec<MediaItem> = match fs::read_to_string(dir.join("queue.json")).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        // Items caught mid-flight by a crash go back to waiting; their
        // `.partial` length decides the resume offset.
        for item in &mut items {
            if item.status == DownloadStatus::Downloading {
                item.status = DownloadStatus::Waiting;
            }
        }
        // Cursor files are the scan-progress source of truth; job.json may
        // be a few seconds staler.
        if let Ok(mut entries) = fs::read_dir(dir.join("cursor")).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let Some(chat_id) = entry
                    .file_name()
                    .to_str()
                    .and_then(|n| n.parse::<i64>().ok())
                else {
                    continue;
                };
                if let Ok(raw) = fs::read_to_string(entry.path()).await {
                    if let Ok(message_id) = raw.trim().parse::<i32>() {
                        let known = job.cursors.entry(chat_id).or_insert(0);
                        if message_id > *known {
                            *known = message_id;
                        }
                    }
                }
            }
        }
        Some((job, items))
    }
}

#[async_trait::async_trait]
impl ResumeStorePort for JobStore {
    async fn save_job(&self, job: &ExportJob) -> Result<(), DomainError> {
        let lock = self.lock_for(&job.id);
        let _guard = lock.lock().await;
        let json =
            serde_json::to_vec_pretty(job).map_err(|e| DomainError::State(e.to_string()))?;
        Self::write_atomic(&self.job_dir(&job.id).join("job.json"), &json).await
    }

    async fn save_queue(&self, job_id: &str, items: &[MediaItem]) -> Result<(), DomainError> {
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;
        let json =
            serde_json::to_vec(items).map_err(|e| DomainError::State(e.to_string()))?;
        Self::write_atomic(&self.job_dir(job_id).join("queue.json"), &json).await
    }

    async fn save_cursor(
        &self,
        job_id: &str,
        chat_id: i64,
        message_id: i32,
    ) -> Result<(), DomainError> {
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;
        let path = self
            .job_dir(job_id)
            .join("cursor")
            .join(chat_id.to_string());
        Self::write_atomic(&path, message_id.to_string().as_bytes()).await
    }

    async fn load_jobs(&self) -> Result<Vec<(ExportJob, Vec<MediaItem>)>, DomainError> {
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            // First run: nothing stored yet.
            Err(_) => return Ok(out),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            if let Some(loaded) = self.read_job(&dir).await {
                out.push(loaded);
            }
        }
        info!(count = out.len(), path = %self.root.display(), "resume store loaded");
        Ok(out)
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), DomainError> {
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;
        let dir = self.job_dir(job_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DomainError::State(format!("remove job dir: {e}"))),
        }
    }
}
