//! End-to-end engine tests against a scripted in-memory gateway.
//!
//! The mock serves a fixed chat history and byte content per media object,
//! and can inject a sequence of errors per item to exercise the worker's
//! recovery ladder.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

use tg_export::adapters::persistence::{JobStore, MessageLog};
use tg_export::domain::{
    media_file_name, sanitize, Chat, ChatType, DomainError, DownloadStatus, ExportFilter,
    ItemErrorKind, JobStatus, MediaNote, MediaRef, MediaRefKind, MediaType, MessageRecord,
    ScannedMedia, ScannedMessage,
};
use tg_export::ports::inbound::ExportControlPort;
use tg_export::ports::outbound::{
    DelegatedDownloaderPort, DelegatedItem, DelegatedProgress, TgGateway,
};
use tg_export::usecases::ExportEngine;

const CHAT_ID: i64 = -1001234567890;

struct MockGateway {
    chats: Vec<Chat>,
    history: HashMap<i64, Vec<ScannedMessage>>,
    /// Byte content per media id.
    files: HashMap<i64, Vec<u8>>,
    /// Scripted errors popped before each successful chunk, per media id.
    fail_plan: Mutex<HashMap<i64, VecDeque<DomainError>>>,
    /// Every chunk request observed: (media id, offset).
    chunk_log: Mutex<Vec<(i64, u64)>>,
    chunk_delay: Duration,
}

impl MockGateway {
    fn new(chats: Vec<Chat>) -> Self {
        Self {
            chats,
            history: HashMap::new(),
            files: HashMap::new(),
            fail_plan: Mutex::new(HashMap::new()),
            chunk_log: Mutex::new(Vec::new()),
            chunk_delay: Duration::ZERO,
        }
    }

    fn push_message(&mut self, chat_id: i64, id: i32, media: Option<(i64, usize, MediaType)>) {
        let media = media.map(|(media_id, size, media_type)| {
            let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            self.files.insert(media_id, content);
            ScannedMedia {
                slot: 0,
                media_type,
                size: size as u64,
                file_name: None,
                media_ref: MediaRef {
                    kind: MediaRefKind::Document,
                    id: media_id,
                    access_hash: 7,
                    file_reference: vec![1, 2, 3],
                    thumb_size: String::new(),
                },
            }
        });
        let record = MessageRecord {
            id,
            chat_id,
            date: 1_700_000_000 + id as i64,
            from_user_id: Some(1),
            reply_to_msg_id: None,
            text: format!("message {id}"),
            entities: Vec::new(),
            service: false,
            media: media.as_ref().map(|m| MediaNote {
                media_type: m.media_type,
                file_name: None,
                size: m.size,
            }),
        };
        self.history.entry(chat_id).or_default().push(ScannedMessage {
            record,
            media: media.into_iter().collect(),
        });
    }

    fn script_errors(&self, media_id: i64, errors: Vec<DomainError>) {
        self.fail_plan
            .lock()
            .unwrap()
            .insert(media_id, errors.into());
    }

    fn offsets_for(&self, media_id: i64) -> Vec<u64> {
        self.chunk_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == media_id)
            .map(|(_, offset)| *offset)
            .collect()
    }
}

#[async_trait::async_trait]
impl TgGateway for MockGateway {
    async fn me(&self) -> Result<i64, DomainError> {
        Ok(1)
    }

    async fn get_dialogs(&self) -> Result<Vec<Chat>, DomainError> {
        Ok(self.chats.clone())
    }

    async fn resolve_chat(&self, chat_id: i64) -> Result<Chat, DomainError> {
        self.chats
            .iter()
            .find(|c| c.id == chat_id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("chat {chat_id}")))
    }

    async fn history_page(
        &self,
        chat_id: i64,
        after_id: i32,
        limit: i32,
    ) -> Result<Vec<ScannedMessage>, DomainError> {
        let mut page: Vec<ScannedMessage> = self
            .history
            .get(&chat_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.record.id > after_id)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        page.sort_by_key(|m| m.record.id);
        Ok(page)
    }

    async fn download_chunk(
        &self,
        media: &MediaRef,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<u8>, DomainError> {
        if !self.chunk_delay.is_zero() {
            tokio::time::sleep(self.chunk_delay).await;
        }
        self.chunk_log.lock().unwrap().push((media.id, offset));
        if let Some(err) = self
            .fail_plan
            .lock()
            .unwrap()
            .get_mut(&media.id)
            .and_then(|q| q.pop_front())
        {
            return Err(err);
        }
        let content = self
            .files
            .get(&media.id)
            .ok_or_else(|| DomainError::Permanent("unknown media".into()))?;
        let start = offset as usize;
        if start >= content.len() {
            return Ok(Vec::new());
        }
        let end = (start + limit as usize).min(content.len());
        Ok(content[start..end].to_vec())
    }

    async fn refresh_reference(
        &self,
        _chat_id: i64,
        message_id: i32,
    ) -> Result<MediaRef, DomainError> {
        Ok(MediaRef {
            kind: MediaRefKind::Document,
            id: message_id as i64,
            access_hash: 7,
            file_reference: vec![9, 9, 9],
            thumb_size: String::new(),
        })
    }
}

fn channel_chat() -> Chat {
    Chat {
        id: CHAT_ID,
        title: "archive target".into(),
        username: None,
        kind: ChatType::Channel,
        approx_message_count: None,
    }
}

struct Harness {
    engine: ExportEngine,
    gateway: Arc<MockGateway>,
    export_root: PathBuf,
    _data: tempfile::TempDir,
    _export: tempfile::TempDir,
}

fn harness(gateway: MockGateway) -> Harness {
    let data = tempdir().unwrap();
    let export = tempdir().unwrap();
    let gateway = Arc::new(gateway);
    let engine = ExportEngine::new(
        Arc::clone(&gateway) as Arc<dyn TgGateway>,
        Arc::new(JobStore::new(data.path())),
        Arc::new(MessageLog::new(data.path())),
        None,
        export.path().to_path_buf(),
    );
    Harness {
        engine,
        gateway,
        export_root: export.path().to_path_buf(),
        _data: data,
        _export: export,
    }
}

fn channel_filter() -> ExportFilter {
    ExportFilter {
        specific_chats: vec![CHAT_ID],
        max_concurrent_downloads: 2,
        ..Default::default()
    }
}

async fn wait_for_status(engine: &ExportEngine, job_id: &str, wanted: JobStatus) -> JobStatus {
    for _ in 0..200 {
        let job = engine.snapshot(job_id).await.unwrap();
        if job.status == wanted {
            return job.status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    engine.snapshot(job_id).await.unwrap().status
}

fn media_path(export_root: &Path, job_name: &str, message_id: i32, media_type: MediaType) -> PathBuf {
    let file_name = media_file_name(message_id, CHAT_ID, None, media_type);
    export_root
        .join(sanitize(job_name))
        .join(CHAT_ID.unsigned_abs().to_string())
        .join(media_type.dir_name())
        .join(file_name)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_export_downloads_every_file() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.push_message(CHAT_ID, 1, None);
    gw.push_message(CHAT_ID, 2, Some((200, 3_000, MediaType::Document)));
    gw.push_message(CHAT_ID, 3, None);
    gw.push_message(CHAT_ID, 4, Some((400, 5_000, MediaType::Video)));
    let h = harness(gw);

    let job = h.engine.create_job("backup", channel_filter()).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    let status = wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;
    assert_eq!(status, JobStatus::Completed);

    let snap = h.engine.snapshot(&job.id).await.unwrap();
    assert_eq!(snap.total_messages, 4);
    assert_eq!(snap.processed_messages, snap.total_messages);
    assert_eq!(snap.total_media, 2);
    assert_eq!(snap.downloaded_media, 2);
    assert_eq!(snap.cursors.get(&CHAT_ID), Some(&4));

    for (id, media_type, size) in [(2, MediaType::Document, 3_000), (4, MediaType::Video, 5_000)] {
        let path = media_path(&h.export_root, "backup", id, media_type);
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), size as u64, "{path:?}");
        assert!(!tg_export::usecases::worker_pool::partial_path(&path).exists());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn boundary_range_scans_exactly_one_message() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    for id in 1..=5 {
        gw.push_message(CHAT_ID, id, None);
    }
    let h = harness(gw);

    let filter = ExportFilter {
        message_from: 3,
        message_to: 3,
        ..channel_filter()
    };
    let job = h.engine.create_job("one", filter).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;

    let snap = h.engine.snapshot(&job.id).await.unwrap();
    assert_eq!(snap.total_messages, 1);
    assert_eq!(snap.cursors.get(&CHAT_ID), Some(&3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_continues_from_partial_length() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.push_message(CHAT_ID, 2, Some((200, 4_000, MediaType::Document)));
    let h = harness(gw);

    // A previous run left 1000 bytes in the partial before being killed.
    let target = media_path(&h.export_root, "resume", 2, MediaType::Document);
    let partial = tg_export::usecases::worker_pool::partial_path(&target);
    std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
    let prefix: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
    std::fs::write(&partial, &prefix).unwrap();

    let job = h.engine.create_job("resume", channel_filter()).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;

    let offsets = h.gateway.offsets_for(200);
    assert!(!offsets.is_empty());
    assert_eq!(offsets[0], 1000, "first chunk must start at the partial length");
    assert_eq!(std::fs::metadata(&target).unwrap().len(), 4_000);
    assert!(!partial.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_already_on_disk_is_not_downloaded_again() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.push_message(CHAT_ID, 2, Some((200, 2_000, MediaType::Document)));
    let h = harness(gw);

    let target = media_path(&h.export_root, "dedup", 2, MediaType::Document);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(&target, vec![0u8; 2_000]).unwrap();

    let job = h.engine.create_job("dedup", channel_filter()).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;

    assert!(h.gateway.offsets_for(200).is_empty(), "no chunks requested");
    let snap = h.engine.snapshot(&job.id).await.unwrap();
    assert_eq!(snap.downloaded_media, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flood_wait_consumes_no_attempt() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.push_message(CHAT_ID, 2, Some((200, 2_000, MediaType::Document)));
    gw.script_errors(200, vec![DomainError::FloodWait { seconds: 0 }]);
    let h = harness(gw);

    let job = h.engine.create_job("flood", channel_filter()).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;

    let view = h.engine.queue_view(&job.id, 0, false).await.unwrap();
    let item = &view.completed[0];
    assert_eq!(item.status, DownloadStatus::Completed);
    assert_eq!(item.attempts, 0);
    // The same offset was retried after the cooldown.
    let offsets = h.gateway.offsets_for(200);
    assert_eq!(offsets, vec![0, 0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_errors_retry_then_succeed() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.push_message(CHAT_ID, 2, Some((200, 2_000, MediaType::Document)));
    gw.script_errors(
        200,
        vec![
            DomainError::Transient("reset".into()),
            DomainError::Transient("reset".into()),
        ],
    );
    let h = harness(gw);

    let filter = ExportFilter {
        retry_delay_secs: 1,
        ..channel_filter()
    };
    let job = h.engine.create_job("retry", filter).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    let status = wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;
    assert_eq!(status, JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_reference_is_refreshed_and_download_finishes() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.push_message(CHAT_ID, 2, Some((2, 2_000, MediaType::Document)));
    gw.script_errors(2, vec![DomainError::ReferenceExpired]);
    let h = harness(gw);

    let job = h.engine.create_job("stale", channel_filter()).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    let status = wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;
    // refresh_reference hands back a reference whose media id is the
    // message id, which the mock also serves.
    assert_eq!(status, JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn permanent_error_fails_item_but_not_job() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.push_message(CHAT_ID, 2, Some((200, 2_000, MediaType::Document)));
    gw.push_message(CHAT_ID, 3, Some((300, 2_000, MediaType::Document)));
    gw.script_errors(200, vec![DomainError::Permanent("message deleted".into())]);
    let h = harness(gw);

    let job = h.engine.create_job("perm", channel_filter()).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    let status = wait_for_status(&h.engine, &job.id, JobStatus::Paused).await;
    // One item failed, so the drain parks the job as paused, not failed.
    assert_eq!(status, JobStatus::Paused);

    let view = h.engine.queue_view(&job.id, 0, false).await.unwrap();
    assert_eq!(view.counts.failed, 1);
    assert_eq!(view.counts.completed, 1);
    assert!(view.failed[0].error.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn double_start_is_rejected_as_busy() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.chunk_delay = Duration::from_millis(50);
    for id in 1..=20 {
        gw.push_message(CHAT_ID, id, Some((1000 + id as i64, 2_000, MediaType::Document)));
    }
    let h = harness(gw);

    let job = h.engine.create_job("busy", channel_filter()).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    let second = h.engine.start(&job.id).await;
    assert!(matches!(second, Err(DomainError::Busy(_))));
    wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_under_load_retains_partials() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.chunk_delay = Duration::from_millis(40);
    for id in 1..=10 {
        // Several chunks each so downloads are in flight when cancel lands.
        gw.push_message(
            CHAT_ID,
            id,
            Some((1000 + id as i64, 3 * 1024 * 1024, MediaType::Document)),
        );
    }
    let h = harness(gw);

    let filter = ExportFilter {
        max_concurrent_downloads: 4,
        ..channel_filter()
    };
    let job = h.engine.create_job("cancel", filter).await.unwrap();
    h.engine.start(&job.id).await.unwrap();

    // Let a few downloads get going, then cancel.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.engine.cancel(&job.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let snap = h.engine.snapshot(&job.id).await.unwrap();
    assert_eq!(snap.status, JobStatus::Cancelled);
    let view = h.engine.queue_view(&job.id, 0, false).await.unwrap();
    assert_eq!(view.active_threads, 0, "no worker may still be downloading");
    for item in h
        .engine
        .queue_view(&job.id, 0, false)
        .await
        .unwrap()
        .downloading
    {
        assert!(
            matches!(item.status, DownloadStatus::Paused | DownloadStatus::Skipped),
            "in-flight item settled as {:?}",
            item.status
        );
        let target = media_path(&h.export_root, "cancel", item.message_id, MediaType::Document);
        let partial = tg_export::usecases::worker_pool::partial_path(&target);
        if item.downloaded > 0 {
            assert_eq!(
                std::fs::metadata(&partial).unwrap().len(),
                item.downloaded,
                "partial length must equal recorded progress"
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn verify_on_intact_job_requeues_nothing() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.push_message(CHAT_ID, 2, Some((200, 2_000, MediaType::Document)));
    let h = harness(gw);

    let job = h.engine.create_job("verify", channel_filter()).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;

    h.engine.verify(&job.id).await.unwrap();
    let snap = h.engine.snapshot(&job.id).await.unwrap();
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(
        snap.verify_summary.as_deref(),
        Some("verified 1 items, 0 queued for re-download")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn verify_requeues_truncated_file() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.push_message(CHAT_ID, 2, Some((200, 2_000, MediaType::Document)));
    let h = harness(gw);

    let job = h.engine.create_job("truncated", channel_filter()).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;

    // Corrupt the file behind the engine's back.
    let target = media_path(&h.export_root, "truncated", 2, MediaType::Document);
    std::fs::write(&target, b"stub").unwrap();
    h.engine.verify(&job.id).await.unwrap();
    let snap = h.engine.snapshot(&job.id).await.unwrap();
    assert_eq!(
        snap.verify_summary.as_deref(),
        Some("verified 1 items, 1 queued for re-download")
    );

    // The forced re-download runs to completion again.
    for _ in 0..200 {
        if std::fs::metadata(&target).map(|m| m.len()).unwrap_or(0) == 2_000 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(std::fs::metadata(&target).unwrap().len(), 2_000);
    let status = wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;
    assert_eq!(status, JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_with_no_failures_is_a_noop() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.push_message(CHAT_ID, 2, Some((200, 1_000, MediaType::Document)));
    let h = harness(gw);

    let job = h.engine.create_job("noop", channel_filter()).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;

    assert_eq!(h.engine.retry_failed(&job.id).await.unwrap(), 0);
    let snap = h.engine.snapshot(&job.id).await.unwrap();
    assert_eq!(snap.status, JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rehydration_restores_job_and_queue() {
    let data = tempdir().unwrap();
    let export = tempdir().unwrap();
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.push_message(CHAT_ID, 2, Some((200, 2_000, MediaType::Document)));
    let gateway = Arc::new(gw);

    let job_id = {
        let engine = ExportEngine::new(
            Arc::clone(&gateway) as Arc<dyn TgGateway>,
            Arc::new(JobStore::new(data.path())),
            Arc::new(MessageLog::new(data.path())),
            None,
            export.path().to_path_buf(),
        );
        let job = engine.create_job("restore", channel_filter()).await.unwrap();
        engine.start(&job.id).await.unwrap();
        wait_for_status(&engine, &job.id, JobStatus::Completed).await;
        job.id
    };

    // A fresh engine over the same data root sees the finished job.
    let engine = ExportEngine::new(
        Arc::clone(&gateway) as Arc<dyn TgGateway>,
        Arc::new(JobStore::new(data.path())),
        Arc::new(MessageLog::new(data.path())),
        None,
        export.path().to_path_buf(),
    );
    assert_eq!(engine.rehydrate().await.unwrap(), 1);
    let snap = engine.snapshot(&job_id).await.unwrap();
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.cursors.get(&CHAT_ID), Some(&2));
    let view = engine.queue_view(&job_id, 0, false).await.unwrap();
    assert_eq!(view.counts.completed, 1);
}

/// Delegated downloader that prints some progress, then dies with a
/// non-zero exit.
struct CrashingDelegated {
    progress_items: usize,
}

#[async_trait::async_trait]
impl DelegatedDownloaderPort for CrashingDelegated {
    async fn download_batch(
        &self,
        items: &[DelegatedItem],
        _target_dir: &Path,
        progress: tokio::sync::mpsc::Sender<DelegatedProgress>,
    ) -> Result<(), DomainError> {
        for item in items.iter().take(self.progress_items) {
            let _ = progress
                .send(DelegatedProgress {
                    item_id: item.item_id.clone(),
                    downloaded: item.size / 2,
                    total: item.size,
                })
                .await;
        }
        Err(DomainError::Media(
            "delegated downloader exited with status 1".into(),
        ))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delegated_batch_failure_fails_every_item() {
    let data = tempdir().unwrap();
    let export = tempdir().unwrap();
    let mut gw = MockGateway::new(vec![channel_chat()]);
    for id in 1..=20 {
        gw.push_message(CHAT_ID, id, Some((1000 + id as i64, 4_096, MediaType::Document)));
    }
    let engine = ExportEngine::new(
        Arc::new(gw) as Arc<dyn TgGateway>,
        Arc::new(JobStore::new(data.path())),
        Arc::new(MessageLog::new(data.path())),
        Some(Arc::new(CrashingDelegated { progress_items: 8 })),
        export.path().to_path_buf(),
    );

    let filter = ExportFilter {
        tdl_mode: true,
        ..channel_filter()
    };
    let job = engine.create_job("tdl", filter).await.unwrap();
    engine.start(&job.id).await.unwrap();
    let status = wait_for_status(&engine, &job.id, JobStatus::Paused).await;
    assert_eq!(status, JobStatus::Paused);

    let view = engine.queue_view(&job.id, 0, false).await.unwrap();
    assert_eq!(view.counts.failed, 20, "every item of the batch must fail");
    assert_eq!(view.counts.completed, 0, "progress lines alone complete nothing");
    for item in &view.failed {
        let err = item.error.as_ref().unwrap();
        assert_eq!(err.kind, ItemErrorKind::Batch);
        assert!(err.message.contains("exited with status"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lowering_concurrency_sheds_surplus_workers() {
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.chunk_delay = Duration::from_millis(100);
    for id in 1..=40 {
        gw.push_message(
            CHAT_ID,
            id,
            Some((1000 + id as i64, 2 * 1024 * 1024, MediaType::Document)),
        );
    }
    let h = harness(gw);

    let filter = ExportFilter {
        max_concurrent_downloads: 10,
        ..channel_filter()
    };
    let job = h.engine.create_job("resize", filter).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;

    h.engine.set_concurrency(&job.id, 3, None).await.unwrap();
    // Surplus workers finish their current item, then exit.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    for _ in 0..10 {
        let view = h.engine.queue_view(&job.id, 0, false).await.unwrap();
        assert!(
            view.active_threads <= 3,
            "active {} after resize",
            view.active_threads
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    h.engine.cancel(&job.id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_then_resume_finishes_the_job()
{
    let mut gw = MockGateway::new(vec![channel_chat()]);
    gw.chunk_delay = Duration::from_millis(30);
    for id in 1..=6 {
        gw.push_message(
            CHAT_ID,
            id,
            Some((1000 + id as i64, 2 * 1024 * 1024, MediaType::Document)),
        );
    }
    let h = harness(gw);

    let job = h.engine.create_job("pausing", channel_filter()).await.unwrap();
    h.engine.start(&job.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    h.engine.pause(&job.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;

    let view = h.engine.queue_view(&job.id, 0, false).await.unwrap();
    assert_eq!(view.active_threads, 0, "paused job may not hold worker slots");

    h.engine.resume(&job.id).await.unwrap();
    let status = wait_for_status(&h.engine, &job.id, JobStatus::Completed).await;
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(h.engine.snapshot(&job.id).await.unwrap().downloaded_media, 6);
}
