//! Message scanner: walks one chat's history in strictly ascending id order,
//! appends message records, and feeds media items to the download queue.
//!
//! Resume correctness hinges on the ordering: the durable cursor only
//! advances once a message is fully handled (record buffered, media
//! enqueued), so restarting at `cursor + 1` loses nothing and duplicates
//! nothing. Scanning and downloading run concurrently; enqueue backpressure
//! is the only coupling.

use crate::domain::{
    media_file_name, Chat, DomainError, ExportFilter, ExportJob, MediaItem, MessageRecord,
};
use crate::ports::outbound::{MessageLogPort, ResumeStorePort, TgGateway};
use crate::usecases::download_queue::DownloadQueue;
use crate::usecases::engine::JobControl;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Messages fetched per history page.
const PAGE_SIZE: i32 = 100;

/// Flush the record buffer and persist the cursor every this many messages
/// (and always at a chat boundary or suspension point).
const FLUSH_EVERY: usize = 50;

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanOutcome {
    pub new_messages: u64,
    pub enqueued: u64,
    pub cancelled: bool,
}

pub struct MessageScanner {
    gateway: Arc<dyn TgGateway>,
    log: Arc<dyn MessageLogPort>,
    store: Arc<dyn ResumeStorePort>,
}

impl MessageScanner {
    pub fn new(
        gateway: Arc<dyn TgGateway>,
        log: Arc<dyn MessageLogPort>,
        store: Arc<dyn ResumeStorePort>,
    ) -> Self {
        Self { gateway, log, store }
    }

    /// Scan every chat in turn. Returns early (flagged, not an error) on
    /// cancellation; suspends in place while the job is paused.
    pub async fn scan_chats(
        &self,
        job: &Mutex<ExportJob>,
        queue: &DownloadQueue,
        chats: &[Chat],
        full: bool,
        control: &mut watch::Receiver<JobControl>,
    ) -> Result<ScanOutcome, DomainError> {
        let mut outcome = ScanOutcome::default();
        for chat in chats {
            {
                let mut j = job.lock().unwrap();
                j.current_chat = Some(chat.title.clone());
            }
            let chat_outcome = self.scan_chat(job, queue, chat, full, control).await?;
            outcome.new_messages += chat_outcome.new_messages;
            outcome.enqueued += chat_outcome.enqueued;
            {
                let mut j = job.lock().unwrap();
                j.processed_chats += 1;
            }
            if chat_outcome.cancelled {
                outcome.cancelled = true;
                break;
            }
        }
        {
            let mut j = job.lock().unwrap();
            j.current_chat = None;
        }
        Ok(outcome)
    }

    async fn scan_chat(
        &self,
        job: &Mutex<ExportJob>,
        queue: &DownloadQueue,
        chat: &Chat,
        full: bool,
        control: &mut watch::Receiver<JobControl>,
    ) -> Result<ScanOutcome, DomainError> {
        let (job_id, filter, saved_cursor) = {
            let j = job.lock().unwrap();
            let cursor = if full {
                0
            } else {
                j.cursors.get(&chat.id).copied().unwrap_or(0)
            };
            (j.id.clone(), j.filter.clone(), cursor)
        };

        let me = if filter.only_my_messages {
            Some(self.gateway.me().await?)
        } else {
            None
        };

        // `after` is both the pagination offset and the durable cursor: it
        // only moves past a message once that message is fully handled.
        let mut after = saved_cursor.max(filter.message_from.saturating_sub(1));
        let mut records: Vec<MessageRecord> = Vec::with_capacity(FLUSH_EVERY);
        let mut outcome = ScanOutcome::default();
        info!(chat_id = chat.id, from_id = after + 1, "scanning chat history");

        'outer: loop {
            let state = *control.borrow();
            match state {
                JobControl::Cancel => {
                    outcome.cancelled = true;
                    break;
                }
                JobControl::Pause => {
                    self.flush(&job_id, job, chat.id, after, &mut records).await?;
                    debug!(chat_id = chat.id, "scanner suspended");
                    while *control.borrow() == JobControl::Pause {
                        if control.changed().await.is_err() {
                            outcome.cancelled = true;
                            break 'outer;
                        }
                    }
                    continue;
                }
                JobControl::Run => {}
            }

            let page = self.gateway.history_page(chat.id, after, PAGE_SIZE).await?;
            if page.is_empty() {
                break;
            }

            for scanned in page {
                let msg = &scanned.record;
                // Client-side boundary enforcement: never trust the API to
                // honour the requested range.
                if msg.id <= after {
                    continue;
                }
                if filter.message_to > 0 && msg.id > filter.message_to {
                    break 'outer;
                }
                if !Self::passes_filters(&filter, me, msg) {
                    after = msg.id;
                    continue;
                }

                if filter.wants_message(msg.id) {
                    for media in &scanned.media {
                        if !filter.wants_media_type(media.media_type) {
                            continue;
                        }
                        let file_name = media_file_name(
                            msg.id,
                            chat.id,
                            media.file_name.as_deref(),
                            media.media_type,
                        );
                        let file_path = format!(
                            "{}/{}/{}",
                            chat.id.unsigned_abs(),
                            media.media_type.dir_name(),
                            file_name
                        );
                        let item = MediaItem::new(
                            chat.id,
                            msg.id,
                            media.slot,
                            media.media_type,
                            file_name,
                            file_path,
                            media.size,
                            media.media_ref.clone(),
                        );
                        // Backpressure point: the queue's soft cap throttles
                        // history iteration here. Stay responsive to control
                        // changes; an interrupted insert is re-scanned after
                        // resume because the cursor has not moved yet.
                        let inserted = tokio::select! {
                            inserted = queue.enqueue(item) => inserted,
                            _ = control.changed() => {
                                self.flush(&job_id, job, chat.id, after, &mut records).await?;
                                continue 'outer;
                            }
                        };
                        if inserted {
                            outcome.enqueued += 1;
                            let mut j = job.lock().unwrap();
                            j.total_media += 1;
                            j.total_size += media.size;
                        }
                    }
                }

                records.push(msg.clone());
                after = msg.id;
                outcome.new_messages += 1;
                {
                    let mut j = job.lock().unwrap();
                    j.total_messages += 1;
                    j.processed_messages += 1;
                    j.current_message_id = msg.id;
                }
                if records.len() >= FLUSH_EVERY {
                    self.flush(&job_id, job, chat.id, after, &mut records).await?;
                }
            }
        }

        self.flush(&job_id, job, chat.id, after, &mut records).await?;
        if outcome.new_messages > 0 {
            info!(
                chat_id = chat.id,
                count = outcome.new_messages,
                media = outcome.enqueued,
                cursor = after,
                "chat scan finished"
            );
        }
        Ok(outcome)
    }

    fn passes_filters(filter: &ExportFilter, me: Option<i64>, msg: &MessageRecord) -> bool {
        if let Some(from) = filter.date_from {
            if msg.date < from.timestamp() {
                return false;
            }
        }
        if let Some(to) = filter.date_to {
            if msg.date > to.timestamp() {
                return false;
            }
        }
        if let Some(me_id) = me {
            if msg.from_user_id != Some(me_id) {
                return false;
            }
        }
        true
    }

    /// Append buffered records and persist the cursor, in that order, so a
    /// persisted cursor always covers durably logged messages.
    async fn flush(
        &self,
        job_id: &str,
        job: &Mutex<ExportJob>,
        chat_id: i64,
        cursor: i32,
        records: &mut Vec<MessageRecord>,
    ) -> Result<(), DomainError> {
        if !records.is_empty() {
            if let Err(e) = self.log.append(job_id, chat_id, records).await {
                warn!(chat_id, error = %e, "message log append failed");
                return Err(e);
            }
            records.clear();
        }
        let prev = {
            let mut j = job.lock().unwrap();
            let prev = j.cursors.get(&chat_id).copied().unwrap_or(0);
            if cursor > prev {
                j.cursors.insert(chat_id, cursor);
            }
            prev
        };
        if cursor > prev {
            self.store.save_cursor(job_id, chat_id, cursor).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ChatType, ExportJob, FilterMode, MediaItem, MediaNote, MediaRef, MediaRefKind, MediaType,
        ScannedMedia, ScannedMessage,
    };
    use std::collections::HashMap;

    struct FakeGateway {
        messages: Vec<ScannedMessage>,
    }

    #[async_trait::async_trait]
    impl TgGateway for FakeGateway {
        async fn me(&self) -> Result<i64, DomainError> {
            Ok(1)
        }
        async fn get_dialogs(&self) -> Result<Vec<Chat>, DomainError> {
            Ok(vec![])
        }
        async fn resolve_chat(&self, chat_id: i64) -> Result<Chat, DomainError> {
            Err(DomainError::NotFound(chat_id.to_string()))
        }
        async fn history_page(
            &self,
            _chat_id: i64,
            after_id: i32,
            limit: i32,
        ) -> Result<Vec<ScannedMessage>, DomainError> {
            Ok(self
                .messages
                .iter()
                .filter(|m| m.record.id > after_id)
                .take(limit as usize)
                .cloned()
                .collect())
        }
        async fn download_chunk(
            &self,
            _media: &crate::domain::MediaRef,
            _offset: u64,
            _limit: u32,
        ) -> Result<Vec<u8>, DomainError> {
            Err(DomainError::Permanent("not a download test".into()))
        }
        async fn refresh_reference(
            &self,
            _chat_id: i64,
            _message_id: i32,
        ) -> Result<crate::domain::MediaRef, DomainError> {
            Err(DomainError::Permanent("not a download test".into()))
        }
    }

    #[derive(Default)]
    struct MemLog {
        records: Mutex<Vec<MessageRecord>>,
    }

    #[async_trait::async_trait]
    impl MessageLogPort for MemLog {
        async fn append(
            &self,
            _job_id: &str,
            _chat_id: i64,
            records: &[MessageRecord],
        ) -> Result<(), DomainError> {
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemStore {
        cursor_writes: Mutex<Vec<(i64, i32)>>,
    }

    #[async_trait::async_trait]
    impl ResumeStorePort for MemStore {
        async fn save_job(&self, _job: &ExportJob) -> Result<(), DomainError> {
            Ok(())
        }
        async fn save_queue(
            &self,
            _job_id: &str,
            _items: &[MediaItem],
        ) -> Result<(), DomainError> {
            Ok(())
        }
        async fn save_cursor(
            &self,
            _job_id: &str,
            chat_id: i64,
            message_id: i32,
        ) -> Result<(), DomainError> {
            self.cursor_writes.lock().unwrap().push((chat_id, message_id));
            Ok(())
        }
        async fn load_jobs(&self) -> Result<Vec<(ExportJob, Vec<MediaItem>)>, DomainError> {
            Ok(vec![])
        }
        async fn delete_job(&self, _job_id: &str) -> Result<(), DomainError> {
            Ok(())
        }
    }

    fn message(id: i32, from: i64, with_media: bool) -> ScannedMessage {
        let media = with_media.then(|| ScannedMedia {
            slot: 0,
            media_type: MediaType::Photo,
            size: 100,
            file_name: None,
            media_ref: MediaRef {
                kind: MediaRefKind::Photo,
                id: id as i64,
                access_hash: 0,
                file_reference: vec![],
                thumb_size: "x".into(),
            },
        });
        ScannedMessage {
            record: MessageRecord {
                id,
                chat_id: -1001,
                date: 1_700_000_000 + id as i64,
                from_user_id: Some(from),
                reply_to_msg_id: None,
                text: format!("m{id}"),
                entities: vec![],
                service: false,
                media: media.as_ref().map(|m| MediaNote {
                    media_type: m.media_type,
                    file_name: None,
                    size: m.size,
                }),
            },
            media: media.into_iter().collect(),
        }
    }

    struct Fixture {
        scanner: MessageScanner,
        log: Arc<MemLog>,
        store: Arc<MemStore>,
        queue: DownloadQueue,
        job: Mutex<ExportJob>,
        control: watch::Sender<JobControl>,
    }

    fn fixture(messages: Vec<ScannedMessage>, filter: crate::domain::ExportFilter) -> Fixture {
        let log = Arc::new(MemLog::default());
        let store = Arc::new(MemStore::default());
        let scanner = MessageScanner::new(
            Arc::new(FakeGateway { messages }),
            Arc::clone(&log) as Arc<dyn MessageLogPort>,
            Arc::clone(&store) as Arc<dyn ResumeStorePort>,
        );
        let job = Mutex::new(ExportJob::new("j1".into(), "scan".into(), filter));
        let (control, _) = watch::channel(JobControl::Run);
        Fixture {
            scanner,
            log,
            store,
            queue: DownloadQueue::default(),
            job,
            control,
        }
    }

    fn chat() -> Chat {
        Chat {
            id: -1001,
            title: "c".into(),
            username: None,
            kind: ChatType::Channel,
            approx_message_count: None,
        }
    }

    async fn run(fx: &Fixture, full: bool) -> ScanOutcome {
        let mut rx = fx.control.subscribe();
        fx.scanner
            .scan_chats(&fx.job, &fx.queue, &[chat()], full, &mut rx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn emits_strictly_ascending_ids_and_counts() {
        let msgs = (1..=7).map(|id| message(id, 2, id % 2 == 0)).collect();
        let fx = fixture(msgs, Default::default());
        let outcome = run(&fx, false).await;
        assert_eq!(outcome.new_messages, 7);
        assert_eq!(outcome.enqueued, 3);
        let logged = fx.log.records.lock().unwrap();
        let ids: Vec<i32> = logged.iter().map(|r| r.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(ids, sorted, "log must be ascending without duplicates");
        // Media items claim in message order too.
        assert_eq!(fx.queue.claim_next().unwrap().message_id, 2);
        assert_eq!(fx.queue.claim_next().unwrap().message_id, 4);
    }

    #[tokio::test]
    async fn resumes_after_saved_cursor_without_duplicates() {
        let msgs = (1..=10).map(|id| message(id, 2, false)).collect();
        let fx = fixture(msgs, Default::default());
        fx.job.lock().unwrap().cursors.insert(-1001, 6);
        let outcome = run(&fx, false).await;
        assert_eq!(outcome.new_messages, 4);
        let logged = fx.log.records.lock().unwrap();
        assert_eq!(logged.first().map(|r| r.id), Some(7));
    }

    #[tokio::test]
    async fn full_scan_ignores_cursor_but_queue_deduplicates() {
        let msgs = (1..=4).map(|id| message(id, 2, true)).collect();
        let fx = fixture(msgs, Default::default());
        run(&fx, false).await;
        let outcome = run(&fx, true).await;
        assert_eq!(outcome.new_messages, 4, "full scan re-reads everything");
        assert_eq!(outcome.enqueued, 0, "known items are not enqueued twice");
        assert_eq!(fx.queue.len(), 4);
    }

    #[tokio::test]
    async fn message_range_is_inclusive_on_both_ends() {
        let msgs = (1..=10).map(|id| message(id, 2, false)).collect();
        let filter = crate::domain::ExportFilter {
            message_from: 4,
            message_to: 6,
            ..Default::default()
        };
        let fx = fixture(msgs, filter);
        let outcome = run(&fx, false).await;
        assert_eq!(outcome.new_messages, 3);
        let logged = fx.log.records.lock().unwrap();
        let ids: Vec<i32> = logged.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 5, 6]);
        assert_eq!(fx.job.lock().unwrap().cursors.get(&-1001), Some(&6));
    }

    #[tokio::test]
    async fn skip_list_drops_media_but_keeps_the_record() {
        let msgs = vec![message(1, 2, true), message(2, 2, true)];
        let filter = crate::domain::ExportFilter {
            filter_mode: FilterMode::Skip,
            filter_messages: vec![1],
            ..Default::default()
        };
        let fx = fixture(msgs, filter);
        let outcome = run(&fx, false).await;
        assert_eq!(outcome.new_messages, 2);
        assert_eq!(outcome.enqueued, 1);
        assert_eq!(fx.queue.claim_next().unwrap().message_id, 2);
    }

    #[tokio::test]
    async fn only_my_messages_filters_by_sender() {
        let msgs = vec![message(1, 1, false), message(2, 2, false), message(3, 1, false)];
        let filter = crate::domain::ExportFilter {
            only_my_messages: true,
            ..Default::default()
        };
        let fx = fixture(msgs, filter);
        let outcome = run(&fx, false).await;
        assert_eq!(outcome.new_messages, 2);
        let logged = fx.log.records.lock().unwrap();
        assert!(logged.iter().all(|r| r.from_user_id == Some(1)));
    }

    #[tokio::test]
    async fn cursor_persisted_mid_chat_and_at_boundary() {
        let msgs = (1..=120).map(|id| message(id, 2, false)).collect();
        let fx = fixture(msgs, Default::default());
        run(&fx, false).await;
        let writes = fx.store.cursor_writes.lock().unwrap();
        assert!(writes.len() >= 2, "expected mid-chat checkpoints, got {writes:?}");
        assert_eq!(writes.last(), Some(&(-1001, 120)));
        let counts: HashMap<i64, usize> =
            writes
                .iter()
                .fold(HashMap::new(), |mut acc, (chat_id, _)| {
                    *acc.entry(*chat_id).or_default() += 1;
                    acc
                });
        assert_eq!(counts.len(), 1);
    }

    #[tokio::test]
    async fn cancel_stops_the_walk_early() {
        let msgs = (1..=500).map(|id| message(id, 2, false)).collect();
        let fx = fixture(msgs, Default::default());
        fx.control.send_replace(JobControl::Cancel);
        let outcome = run(&fx, false).await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.new_messages, 0);
    }
}
