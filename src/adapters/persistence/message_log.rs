//! Append-only message log: one NDJSON file per chat per job
//! (`jobs/<jobId>/messages/<chatId>.ndjson`, one JSON object per line).
//!
//! The scanner flushes in cursor order, so the log is ascending by message
//! id in normal operation. A crash between a flush and its cursor write may
//! re-append a short tail on the next run; readers deduplicate by id and
//! keep the last occurrence.

use crate::domain::{DomainError, MessageRecord};
use crate::ports::outbound::MessageLogPort;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct MessageLog {
    root: PathBuf,
}

impl MessageLog {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            root: data_root.as_ref().join("jobs"),
        }
    }

    fn chat_path(&self, job_id: &str, chat_id: i64) -> PathBuf {
        self.root
            .join(job_id)
            .join("messages")
            .join(format!("{chat_id}.ndjson"))
    }
}

#[async_trait::async_trait]
impl MessageLogPort for MessageLog {
    async fn append(
        &self,
        job_id: &str,
        chat_id: i64,
        records: &[MessageRecord],
    ) -> Result<(), DomainError> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.chat_path(job_id, chat_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::Repo(e.to_string()))?;
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| DomainError::Repo(e.to_string()))?;
        let mut buf = Vec::with_capacity(records.len() * 256);
        for record in records {
            serde_json::to_writer(&mut buf, record)
                .map_err(|e| DomainError::Repo(e.to_string()))?;
            buf.push(b'\n');
        }
        f.write_all(&buf)
            .await
            .map_err(|e| DomainError::Repo(e.to_string()))?;
        f.flush()
            .await
            .map_err(|e| DomainError::Repo(e.to_string()))?;
        debug!(job_id, chat_id, count = records.len(), "message records appended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: i32) -> MessageRecord {
        MessageRecord {
            id,
            chat_id: -1001,
            date: 1_700_000_000 + id as i64,
            from_user_id: Some(42),
            reply_to_msg_id: None,
            text: format!("message {id}"),
            entities: Vec::new(),
            service: false,
            media: None,
        }
    }

    #[tokio::test]
    async fn appends_one_json_object_per_line() {
        let dir = tempdir().unwrap();
        let log = MessageLog::new(dir.path());
        log.append("j1", -1001, &[record(1), record(2)])
            .await
            .unwrap();
        log.append("j1", -1001, &[record(3)]).await.unwrap();
        let raw = tokio::fs::read_to_string(log.chat_path("j1", -1001))
            .await
            .unwrap();
        let ids: Vec<i32> = raw
            .lines()
            .map(|l| serde_json::from_str::<MessageRecord>(l).unwrap().id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_append_is_a_noop() {
        let dir = tempdir().unwrap();
        let log = MessageLog::new(dir.path());
        log.append("j1", -1001, &[]).await.unwrap();
        assert!(!log.chat_path("j1", -1001).exists());
    }
}
