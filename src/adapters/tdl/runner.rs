//! Delegated-downloader adapter: invokes the external high-throughput
//! downloader process for a batch of message links and ingests its progress
//! output line by line.
//!
//! Invocation contract: session credentials come from a bind-mounted session
//! file; stdin is unused; stdout emits one `itemId downloaded total` line
//! per tick; stderr is logged; exit code 0 means every item in the batch
//! succeeded and any non-zero exit fails the whole batch. A one-permit
//! semaphore serialises invocations so the shared session is never logged in
//! twice.

use crate::domain::DomainError;
use crate::ports::outbound::{DelegatedDownloaderPort, DelegatedItem, DelegatedProgress};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TdlConfig {
    /// Executable (or container entry wrapper) to invoke.
    pub binary: String,
    /// Session file shared with the in-process client via bind mount.
    pub session_path: PathBuf,
    pub proxy_url: Option<String>,
}

pub struct TdlRunner {
    config: TdlConfig,
    /// One concurrent invocation per authenticated session.
    permit: Arc<Semaphore>,
}

impl TdlRunner {
    pub fn new(config: TdlConfig) -> Self {
        Self {
            config,
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Message link in the form the external downloader resolves:
    /// `t.me/c/<channel>/<id>` for channels and supergroups, `t.me/<chat>/<id>`
    /// otherwise.
    fn message_link(chat_id: i64, message_id: i32) -> String {
        if chat_id <= -1_000_000_000_000 {
            let bare = -chat_id - 1_000_000_000_000;
            format!("https://t.me/c/{bare}/{message_id}")
        } else {
            format!("https://t.me/{}/{}", chat_id.unsigned_abs(), message_id)
        }
    }

    /// `itemId downloaded total`, whitespace-separated.
    fn parse_progress_line(line: &str) -> Option<DelegatedProgress> {
        let mut parts = line.split_whitespace();
        let item_id = parts.next()?.to_string();
        let downloaded = parts.next()?.parse().ok()?;
        let total = parts.next()?.parse().ok()?;
        Some(DelegatedProgress {
            item_id,
            downloaded,
            total,
        })
    }
}

#[async_trait::async_trait]
impl DelegatedDownloaderPort for TdlRunner {
    async fn download_batch(
        &self,
        items: &[DelegatedItem],
        target_dir: &Path,
        progress: mpsc::Sender<DelegatedProgress>,
    ) -> Result<(), DomainError> {
        let _permit = self
            .permit
            .acquire()
            .await
            .map_err(|_| DomainError::State("delegated downloader shut down".into()))?;

        let mut command = Command::new(&self.config.binary);
        command
            .arg("--session")
            .arg(&self.config.session_path)
            .arg("--dir")
            .arg(target_dir)
            .arg("--template")
            .arg("{messageId}-{chatId}-{fileName}")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(proxy) = &self.config.proxy_url {
            command.arg("--proxy").arg(proxy);
        }
        for item in items {
            command
                .arg("--url")
                .arg(Self::message_link(item.chat_id, item.message_id));
        }

        info!(
            count = items.len(),
            dir = %target_dir.display(),
            "delegated downloader invoked"
        );
        let mut child = command
            .spawn()
            .map_err(|e| DomainError::State(format!("spawn delegated downloader: {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let progress_task = stdout.map(|out| {
            let progress = progress.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match TdlRunner::parse_progress_line(&line) {
                        Some(tick) => {
                            let _ = progress.send(tick).await;
                        }
                        None => debug!(line = %line, "unparsed downloader output"),
                    }
                }
            })
        });
        let stderr_task = stderr.map(|err| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(line = %line, "delegated downloader stderr");
                }
            })
        });

        let status = child
            .wait()
            .await
            .map_err(|e| DomainError::State(format!("wait for delegated downloader: {e}")))?;
        if let Some(task) = progress_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        if status.success() {
            Ok(())
        } else {
            Err(DomainError::Media(format!(
                "delegated downloader exited with status {}",
                status.code().unwrap_or(-1)
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_links_strip_the_wire_prefix() {
        assert_eq!(
            TdlRunner::message_link(-1001234567890, 77),
            "https://t.me/c/1234567890/77"
        );
    }

    #[test]
    fn non_channel_links_use_the_plain_form() {
        assert_eq!(
            TdlRunner::message_link(777000, 5),
            "https://t.me/777000/5"
        );
    }

    #[test]
    fn progress_lines_parse() {
        let tick = TdlRunner::parse_progress_line("-1001_77_0 1048576 10485760").unwrap();
        assert_eq!(tick.item_id, "-1001_77_0");
        assert_eq!(tick.downloaded, 1_048_576);
        assert_eq!(tick.total, 10_485_760);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        assert!(TdlRunner::parse_progress_line("downloading...").is_none());
        assert!(TdlRunner::parse_progress_line("").is_none());
    }
}
