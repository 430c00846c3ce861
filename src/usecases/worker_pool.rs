//! Worker pool: a resizable set of indexed worker tasks draining the
//! download queue through the shared gateway.
//!
//! Lowering the bound makes workers with `index >= bound` exit after their
//! current item; raising it spawns the missing indices. Each worker runs the
//! per-file protocol: resume from the `.partial` length, fetch fixed-size
//! chunks, honour pause/cancel between chunks, refresh expired references,
//! back off on transient failures, and finish with fsync + atomic rename.

use crate::domain::queue::MediaItem;
use crate::domain::{DomainError, ExportJob, ItemError, ItemErrorKind, MediaRef};
use crate::ports::outbound::{ResumeStorePort, TgGateway};
use crate::usecases::download_queue::DownloadQueue;
use crate::usecases::engine::JobControl;
use crate::usecases::progress::ProgressReporter;
use rand::Rng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// MTProto chunk size: 1 MiB, the largest the wire protocol allows.
pub const CHUNK_SIZE: u32 = 1024 * 1024;

/// Files at or above this size are eligible for parallel-chunk mode.
const MIN_PARALLEL_SIZE: u64 = 10 * 1024 * 1024;

/// Connections used when parallel-chunk mode is on.
const PARALLEL_SLOTS: u64 = 3;

/// Reference refreshes allowed per item before giving up.
const MAX_REF_REFRESHES: u32 = 3;

/// Persist the queue snapshot every this many chunks per worker.
const PERSIST_EVERY_CHUNKS: u32 = 8;

/// Per-chunk request deadline; exceeding it counts as a transient failure.
const CHUNK_DEADLINE: Duration = Duration::from_secs(60);

/// Append `.partial` to the final file name.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

enum DlOutcome {
    /// Item settled (completed, failed, or skipped); transition applied.
    Settled,
    /// Slot released back to waiting (global pause / resize).
    Released,
    /// Session-level failure; the whole job must stop.
    Fatal(String),
}

struct PoolCtx {
    job_id: String,
    job: Arc<Mutex<ExportJob>>,
    gateway: Arc<dyn TgGateway>,
    queue: Arc<DownloadQueue>,
    store: Arc<dyn ResumeStorePort>,
    reporter: Arc<ProgressReporter>,
    export_dir: PathBuf,
    control: watch::Receiver<JobControl>,
    bound: watch::Sender<usize>,
    active_indices: Mutex<HashSet<usize>>,
    parallel_chunk: std::sync::atomic::AtomicBool,
    max_attempts: u32,
    base_delay_secs: u64,
    fatal: Mutex<Option<String>>,
}

pub struct WorkerPool {
    ctx: Arc<PoolCtx>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: String,
        job: Arc<Mutex<ExportJob>>,
        gateway: Arc<dyn TgGateway>,
        queue: Arc<DownloadQueue>,
        store: Arc<dyn ResumeStorePort>,
        reporter: Arc<ProgressReporter>,
        export_dir: PathBuf,
        control: watch::Receiver<JobControl>,
        concurrency: usize,
        parallel_chunk: bool,
        max_attempts: u32,
        base_delay_secs: u64,
    ) -> Self {
        let (bound, _) = watch::channel(concurrency);
        Self {
            ctx: Arc::new(PoolCtx {
                job_id,
                job,
                gateway,
                queue,
                store,
                reporter,
                export_dir,
                control,
                bound,
                active_indices: Mutex::new(HashSet::new()),
                parallel_chunk: std::sync::atomic::AtomicBool::new(parallel_chunk),
                max_attempts,
                base_delay_secs,
                fatal: Mutex::new(None),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn workers up to the current bound.
    pub fn start(&self) {
        let n = *self.ctx.bound.borrow();
        self.spawn_missing(n);
        info!(job_id = %self.ctx.job_id, workers = n, "worker pool started");
    }

    /// Mutate the worker bound at runtime. Surplus workers exit after their
    /// current item; missing indices are spawned.
    pub fn resize(&self, n: usize) {
        self.ctx.bound.send_replace(n);
        self.spawn_missing(n);
        info!(job_id = %self.ctx.job_id, bound = n, "worker bound changed");
    }

    pub fn set_parallel_chunk(&self, enabled: bool) {
        self.ctx
            .parallel_chunk
            .store(enabled, std::sync::atomic::Ordering::Relaxed);
    }

    /// Session-level error raised by a worker, if any.
    pub fn fatal(&self) -> Option<String> {
        self.ctx.fatal.lock().unwrap().clone()
    }

    fn spawn_missing(&self, bound: usize) {
        let mut handles = self.handles.lock().unwrap();
        let active = self.ctx.active_indices.lock().unwrap().clone();
        for index in 0..bound {
            if active.contains(&index) {
                continue;
            }
            self.ctx.active_indices.lock().unwrap().insert(index);
            let ctx = Arc::clone(&self.ctx);
            handles.push(tokio::spawn(worker_loop(ctx, index)));
        }
    }

    /// Wait for every worker task to finish (after cancel or drain).
    pub async fn join(&self) {
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(ctx: Arc<PoolCtx>, index: usize) {
    let mut control = ctx.control.clone();
    let mut bound = ctx.bound.subscribe();

    // Smooth start: stagger first requests instead of bursting the gate.
    let stagger = index as u64 * 700 + rand::thread_rng().gen_range(0..300);
    tokio::time::sleep(Duration::from_millis(stagger)).await;
    debug!(job_id = %ctx.job_id, index, "worker started");

    loop {
        if *bound.borrow() <= index {
            break;
        }
        if ctx.fatal.lock().unwrap().is_some() {
            break;
        }
        let state = *control.borrow();
        match state {
            JobControl::Cancel => break,
            JobControl::Pause => {
                if control.changed().await.is_err() {
                    break;
                }
                continue;
            }
            JobControl::Run => {}
        }

        let ready = ctx.queue.ready_signal();
        let Some(item) = ctx.queue.claim_next() else {
            tokio::select! {
                _ = ready => {}
                _ = control.changed() => {}
                _ = bound.changed() => {}
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
            }
            continue;
        };

        let item_id = item.id.clone();
        match download_item(&ctx, &mut control, item).await {
            DlOutcome::Settled | DlOutcome::Released => {
                sync_job_stats(&ctx);
            }
            DlOutcome::Fatal(message) => {
                error!(job_id = %ctx.job_id, item = %item_id, error = %message, "fatal session error");
                ctx.queue.release(&item_id, 0);
                *ctx.fatal.lock().unwrap() = Some(message);
                break;
            }
        }

        // Cooldown jitter between items keeps the request pattern organic.
        let pause = rand::thread_rng().gen_range(100..300);
        tokio::time::sleep(Duration::from_millis(pause)).await;
    }

    ctx.active_indices.lock().unwrap().remove(&index);
    debug!(job_id = %ctx.job_id, index, "worker exited");
}

/// Mirror queue aggregates into the job descriptor after each settle.
fn sync_job_stats(ctx: &PoolCtx) {
    let stats = ctx.queue.stats();
    let mut job = ctx.job.lock().unwrap();
    job.downloaded_media = stats.done;
    job.failed_media = stats.failed;
    job.downloaded_size = stats.done_size;
    job.download_speed = ctx.reporter.speed();
}

async fn persist_queue(ctx: &PoolCtx) {
    let items = ctx.queue.snapshot_items();
    if let Err(e) = ctx.store.save_queue(&ctx.job_id, &items).await {
        warn!(job_id = %ctx.job_id, error = %e, "queue snapshot failed");
    }
}

async fn download_item(
    ctx: &PoolCtx,
    control: &mut watch::Receiver<JobControl>,
    item: MediaItem,
) -> DlOutcome {
    let target = ctx.export_dir.join(&item.file_path);
    if let Some(parent) = target.parent() {
        if let Err(e) = fs::create_dir_all(parent).await {
            ctx.queue.fail(
                &item.id,
                item.downloaded,
                ItemError::new(ItemErrorKind::Permanent, format!("create dir: {e}")),
            );
            return DlOutcome::Settled;
        }
    }

    // De-dup: a final file of exactly the announced size is already done.
    if item.size > 0 {
        if let Ok(meta) = fs::metadata(&target).await {
            if meta.len() == item.size {
                debug!(item = %item.id, path = %target.display(), "already on disk, skipping download");
                let _ = fs::remove_file(partial_path(&target)).await;
                ctx.queue.complete(&item.id);
                return DlOutcome::Settled;
            }
        }
    }

    let Some(media_ref) = item.media_ref.clone() else {
        ctx.queue.fail(
            &item.id,
            item.downloaded,
            ItemError::new(ItemErrorKind::Permanent, "item has no access reference"),
        );
        return DlOutcome::Settled;
    };

    let parallel = ctx
        .parallel_chunk
        .load(std::sync::atomic::Ordering::Relaxed)
        && item.size >= MIN_PARALLEL_SIZE;

    let outcome = if parallel {
        download_parallel(ctx, control, &item, media_ref, &target).await
    } else {
        download_serial(ctx, control, &item, media_ref, &target).await
    };
    persist_queue(ctx).await;
    outcome
}

/// Single-connection protocol: append to `.partial` from its current length.
async fn download_serial(
    ctx: &PoolCtx,
    control: &mut watch::Receiver<JobControl>,
    item: &MediaItem,
    mut media_ref: MediaRef,
    target: &Path,
) -> DlOutcome {
    let partial = partial_path(target);
    let mut file = match fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&partial)
        .await
    {
        Ok(f) => f,
        Err(e) => {
            ctx.queue.fail(
                &item.id,
                item.downloaded,
                ItemError::new(ItemErrorKind::Permanent, format!("open partial: {e}")),
            );
            return DlOutcome::Settled;
        }
    };
    // The partial's length is authoritative for the resume offset.
    let mut offset = match file.metadata().await {
        Ok(m) => m.len(),
        Err(_) => 0,
    };
    if item.size > 0 && offset > item.size {
        // A stale partial longer than the announced size cannot be trusted.
        warn!(item = %item.id, offset, size = item.size, "partial longer than announced size, restarting");
        if file.set_len(0).await.is_err() {
            ctx.queue.fail(
                &item.id,
                0,
                ItemError::new(ItemErrorKind::Permanent, "cannot truncate partial"),
            );
            return DlOutcome::Settled;
        }
        offset = 0;
    }
    ctx.queue.update_progress(&item.id, offset);

    let mut attempts: u32 = 0;
    let mut refreshes: u32 = 0;
    let mut chunks_since_persist: u32 = 0;

    loop {
        if item.size > 0 && offset >= item.size {
            break;
        }

        // Checkpoint: job-level and per-item control between chunks.
        let state = *control.borrow();
        match state {
            JobControl::Pause => {
                let _ = file.flush().await;
                let _ = file.sync_all().await;
                ctx.queue.release(&item.id, offset);
                debug!(item = %item.id, offset, "released on job pause");
                return DlOutcome::Released;
            }
            JobControl::Cancel => {
                let _ = file.flush().await;
                let _ = file.sync_all().await;
                ctx.queue.mark_paused(&item.id, offset);
                debug!(item = %item.id, offset, "paused on job cancel, partial retained");
                return DlOutcome::Settled;
            }
            JobControl::Run => {}
        }
        let (pause_req, cancel_req) = ctx.queue.control_flags(&item.id);
        if pause_req || cancel_req {
            let _ = file.flush().await;
            let _ = file.sync_all().await;
            if cancel_req {
                ctx.queue.mark_skipped(&item.id, offset);
            } else {
                ctx.queue.mark_paused(&item.id, offset);
            }
            return DlOutcome::Settled;
        }

        let request = ctx.gateway.download_chunk(&media_ref, offset, CHUNK_SIZE);
        let result = match tokio::time::timeout(CHUNK_DEADLINE, request).await {
            Ok(r) => r,
            Err(_) => Err(DomainError::Transient("chunk deadline exceeded".into())),
        };

        match result {
            Ok(bytes) => {
                if bytes.is_empty() {
                    if item.size == 0 {
                        // Unknown announced size: an empty chunk is the end.
                        ctx.queue.finalize_size(&item.id, offset);
                        break;
                    }
                    attempts += 1;
                    if attempts >= ctx.max_attempts {
                        ctx.queue.fail(
                            &item.id,
                            offset,
                            ItemError::new(ItemErrorKind::Transient, "empty chunk before end of file"),
                        );
                        return DlOutcome::Settled;
                    }
                    continue;
                }
                if let Err(e) = file.write_all(&bytes).await {
                    ctx.queue.fail(
                        &item.id,
                        offset,
                        ItemError::new(ItemErrorKind::Permanent, format!("write partial: {e}")),
                    );
                    return DlOutcome::Settled;
                }
                offset += bytes.len() as u64;
                ctx.queue.update_progress(&item.id, offset);
                ctx.reporter.add_bytes(bytes.len() as u64);
                attempts = 0;
                chunks_since_persist += 1;
                if chunks_since_persist >= PERSIST_EVERY_CHUNKS {
                    chunks_since_persist = 0;
                    persist_queue(ctx).await;
                }
            }
            Err(DomainError::FloodWait { seconds }) => {
                // The gateway's rate gate is already held; the next request
                // waits there. No attempt is consumed.
                debug!(item = %item.id, seconds, "flood wait, retrying same offset");
            }
            Err(DomainError::ReferenceExpired) => {
                refreshes += 1;
                if refreshes > MAX_REF_REFRESHES {
                    ctx.queue.fail(
                        &item.id,
                        offset,
                        ItemError::new(ItemErrorKind::StaleReference, "reference refresh limit reached"),
                    );
                    return DlOutcome::Settled;
                }
                match ctx
                    .gateway
                    .refresh_reference(item.chat_id, item.message_id)
                    .await
                {
                    Ok(fresh) => {
                        debug!(item = %item.id, "access reference refreshed");
                        media_ref = fresh;
                    }
                    Err(e) => {
                        ctx.queue.fail(&item.id, offset, ItemError::from(&e));
                        return DlOutcome::Settled;
                    }
                }
            }
            Err(DomainError::Transient(message)) | Err(DomainError::TgGateway(message)) => {
                attempts += 1;
                if attempts >= ctx.max_attempts {
                    ctx.queue.fail(
                        &item.id,
                        offset,
                        ItemError::new(ItemErrorKind::Transient, message),
                    );
                    return DlOutcome::Settled;
                }
                let backoff = backoff_delay(ctx.base_delay_secs, attempts);
                debug!(item = %item.id, attempt = attempts, delay_secs = backoff.as_secs(), "transient error, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = control.changed() => {}
                }
            }
            Err(DomainError::Fatal(message)) => {
                let _ = file.flush().await;
                return DlOutcome::Fatal(message);
            }
            Err(e) => {
                ctx.queue.fail(&item.id, offset, ItemError::from(&e));
                return DlOutcome::Settled;
            }
        }
    }

    finalize_file(ctx, item, file, &partial, target, offset).await
}

/// Exponential backoff capped at 60 s, with jitter.
fn backoff_delay(base_secs: u64, attempt: u32) -> Duration {
    let exp = base_secs.saturating_mul(1u64 << attempt.min(6).saturating_sub(1));
    let capped = exp.min(60);
    let jitter_ms = rand::thread_rng().gen_range(0..500);
    Duration::from_millis(capped * 1000 + jitter_ms)
}

async fn finalize_file(
    ctx: &PoolCtx,
    item: &MediaItem,
    mut file: fs::File,
    partial: &Path,
    target: &Path,
    offset: u64,
) -> DlOutcome {
    if let Err(e) = file.flush().await {
        ctx.queue.fail(
            &item.id,
            offset,
            ItemError::new(ItemErrorKind::Permanent, format!("flush: {e}")),
        );
        return DlOutcome::Settled;
    }
    if let Err(e) = file.sync_all().await {
        ctx.queue.fail(
            &item.id,
            offset,
            ItemError::new(ItemErrorKind::Permanent, format!("fsync: {e}")),
        );
        return DlOutcome::Settled;
    }
    drop(file);
    if let Err(e) = fs::rename(partial, target).await {
        ctx.queue.fail(
            &item.id,
            offset,
            ItemError::new(ItemErrorKind::Permanent, format!("rename: {e}")),
        );
        return DlOutcome::Settled;
    }
    ctx.queue.complete(&item.id);
    info!(item = %item.id, path = %target.display(), bytes = offset, "download complete");
    DlOutcome::Settled
}

/// Parallel-chunk protocol: the byte range is split into pre-sized slots
/// written at absolute offsets; the rename is deferred until every slot has
/// flushed. Slots are not individually resumable; an interrupted parallel
/// download restarts from zero on its next claim.
async fn download_parallel(
    ctx: &PoolCtx,
    control: &mut watch::Receiver<JobControl>,
    item: &MediaItem,
    media_ref: MediaRef,
    target: &Path,
) -> DlOutcome {
    let partial = partial_path(target);
    let file = match std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .open(&partial)
    {
        Ok(f) => f,
        Err(e) => {
            ctx.queue.fail(
                &item.id,
                0,
                ItemError::new(ItemErrorKind::Permanent, format!("open partial: {e}")),
            );
            return DlOutcome::Settled;
        }
    };
    if file.set_len(item.size).is_err() {
        ctx.queue.fail(
            &item.id,
            0,
            ItemError::new(ItemErrorKind::Permanent, "cannot pre-size partial"),
        );
        return DlOutcome::Settled;
    }
    let file = Arc::new(file);
    let ranges = split_ranges(item.size, PARALLEL_SLOTS);
    debug!(item = %item.id, slots = ranges.len(), size = item.size, "parallel download started");

    let mut tasks = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        let gateway = Arc::clone(&ctx.gateway);
        let file = Arc::clone(&file);
        let media_ref = media_ref.clone();
        let queue = Arc::clone(&ctx.queue);
        let reporter = Arc::clone(&ctx.reporter);
        let item_id = item.id.clone();
        let chat_id = item.chat_id;
        let message_id = item.message_id;
        let max_attempts = ctx.max_attempts;
        let base_delay = ctx.base_delay_secs;
        let control = control.clone();
        tasks.push(tokio::spawn(async move {
            fetch_range(
                gateway,
                file,
                media_ref,
                queue,
                reporter,
                item_id,
                chat_id,
                message_id,
                start,
                end,
                max_attempts,
                base_delay,
                control,
            )
            .await
        }));
    }

    let mut failure: Option<DomainError> = None;
    let mut interrupted = false;
    for task in tasks {
        match task.await {
            Ok(Ok(RangeEnd::Done)) => {}
            Ok(Ok(RangeEnd::Interrupted)) => interrupted = true,
            Ok(Err(e)) => failure = Some(e),
            Err(e) => failure = Some(DomainError::Transient(format!("slot task: {e}"))),
        }
    }

    if let Some(e) = failure {
        if matches!(e, DomainError::Fatal(_)) {
            return DlOutcome::Fatal(e.to_string());
        }
        // Pre-sized slots cannot resume; reset so the retry restarts clean.
        let _ = file.set_len(0);
        ctx.queue.fail(&item.id, 0, ItemError::from(&e));
        return DlOutcome::Settled;
    }
    if interrupted {
        let _ = file.set_len(0);
        let state = *control.borrow();
        match state {
            JobControl::Cancel => {
                ctx.queue.mark_paused(&item.id, 0);
                DlOutcome::Settled
            }
            _ => {
                let (_, cancel_req) = ctx.queue.control_flags(&item.id);
                if cancel_req {
                    ctx.queue.mark_skipped(&item.id, 0);
                    DlOutcome::Settled
                } else {
                    ctx.queue.release(&item.id, 0);
                    DlOutcome::Released
                }
            }
        }
    } else {
        if let Err(e) = file.sync_all() {
            ctx.queue.fail(
                &item.id,
                0,
                ItemError::new(ItemErrorKind::Permanent, format!("fsync: {e}")),
            );
            return DlOutcome::Settled;
        }
        drop(file);
        if let Err(e) = std::fs::rename(&partial, target) {
            ctx.queue.fail(
                &item.id,
                0,
                ItemError::new(ItemErrorKind::Permanent, format!("rename: {e}")),
            );
            return DlOutcome::Settled;
        }
        ctx.queue.complete(&item.id);
        info!(item = %item.id, path = %target.display(), "parallel download complete");
        DlOutcome::Settled
    }
}

enum RangeEnd {
    Done,
    Interrupted,
}

/// Contiguous sub-ranges `[start, end)` of roughly equal size, aligned to
/// the chunk size as the wire protocol requires.
fn split_ranges(size: u64, slots: u64) -> Vec<(u64, u64)> {
    let chunk = CHUNK_SIZE as u64;
    let per_slot = size.div_ceil(slots).div_ceil(chunk) * chunk;
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < size {
        let end = (start + per_slot).min(size);
        ranges.push((start, end));
        start = end;
    }
    ranges
}

#[allow(clippy::too_many_arguments)]
async fn fetch_range(
    gateway: Arc<dyn TgGateway>,
    file: Arc<std::fs::File>,
    mut media_ref: MediaRef,
    queue: Arc<DownloadQueue>,
    reporter: Arc<ProgressReporter>,
    item_id: String,
    chat_id: i64,
    message_id: i32,
    start: u64,
    end: u64,
    max_attempts: u32,
    base_delay_secs: u64,
    control: watch::Receiver<JobControl>,
) -> Result<RangeEnd, DomainError> {
    let mut offset = start;
    let mut attempts: u32 = 0;
    let mut refreshes: u32 = 0;
    while offset < end {
        if *control.borrow() != JobControl::Run {
            return Ok(RangeEnd::Interrupted);
        }
        let (pause_req, cancel_req) = queue.control_flags(&item_id);
        if pause_req || cancel_req {
            return Ok(RangeEnd::Interrupted);
        }
        let want = ((end - offset).min(CHUNK_SIZE as u64)) as u32;
        let request = gateway.download_chunk(&media_ref, offset, want);
        let result = match tokio::time::timeout(CHUNK_DEADLINE, request).await {
            Ok(r) => r,
            Err(_) => Err(DomainError::Transient("chunk deadline exceeded".into())),
        };
        match result {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return Err(DomainError::Transient("empty chunk inside range".into()));
                }
                write_at_all(&file, offset, &bytes)
                    .map_err(|e| DomainError::Permanent(format!("write slot: {e}")))?;
                offset += bytes.len() as u64;
                reporter.add_bytes(bytes.len() as u64);
                attempts = 0;
            }
            Err(DomainError::FloodWait { .. }) => {}
            Err(DomainError::ReferenceExpired) => {
                refreshes += 1;
                if refreshes > MAX_REF_REFRESHES {
                    return Err(DomainError::ReferenceExpired);
                }
                media_ref = gateway.refresh_reference(chat_id, message_id).await?;
            }
            Err(DomainError::Transient(message)) | Err(DomainError::TgGateway(message)) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(DomainError::Transient(message));
                }
                tokio::time::sleep(backoff_delay(base_delay_secs, attempts)).await;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(RangeEnd::Done)
}

/// Positioned write without seeking the shared handle.
fn write_at_all(file: &std::fs::File, offset: u64, buf: &[u8]) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.write_all_at(buf, offset)
    }
    #[cfg(not(unix))]
    {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = file;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_path_appends_suffix() {
        let p = partial_path(Path::new("/x/1001/photos/9-1001-media.jpg"));
        assert_eq!(
            p,
            PathBuf::from("/x/1001/photos/9-1001-media.jpg.partial")
        );
    }

    #[test]
    fn split_ranges_cover_everything_once() {
        let size = 25 * 1024 * 1024 + 17;
        let ranges = split_ranges(size, 3);
        assert_eq!(ranges.first().unwrap().0, 0);
        assert_eq!(ranges.last().unwrap().1, size);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        // Interior boundaries stay chunk-aligned.
        for &(start, _) in &ranges[1..] {
            assert_eq!(start % CHUNK_SIZE as u64, 0);
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let d1 = backoff_delay(2, 1);
        let d3 = backoff_delay(2, 3);
        let d9 = backoff_delay(2, 9);
        assert!(d1 < d3);
        assert!(d9 <= Duration::from_millis(60_500));
    }
}
