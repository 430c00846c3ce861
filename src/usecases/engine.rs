//! Export engine: job registry and per-job controller.
//!
//! The engine owns every job's queue, scanner, and worker pool for the job's
//! lifetime. Control operations take a per-job exclusive lock; a concurrent
//! second call returns `Busy` instead of spawning a parallel controller;
//! that is the guard that prevents duplicate worker pools from a double
//! start. State is persisted on every transition and every few seconds while
//! running, so interruption is always resumable.

use crate::domain::{
    sanitize, DomainError, DownloadStatus, ExportFilter, ExportJob, ItemError, ItemErrorKind,
    JobStatus, MediaItem, QueueView,
};
use crate::ports::inbound::ExportControlPort;
use crate::ports::outbound::{
    DelegatedDownloaderPort, DelegatedItem, MessageLogPort, ResumeStorePort, TgGateway,
};
use crate::usecases::download_queue::DownloadQueue;
use crate::usecases::progress::ProgressReporter;
use crate::usecases::resolver::ChatResolver;
use crate::usecases::scanner::MessageScanner;
use crate::usecases::worker_pool::WorkerPool;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{error, info, warn};

/// Runtime control signal shared by the scanner and every worker of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobControl {
    Run,
    Pause,
    Cancel,
}

/// Persist cadence while a job is running.
const PERSIST_INTERVAL: Duration = Duration::from_secs(10);

struct JobHandle {
    job: Arc<Mutex<ExportJob>>,
    queue: Arc<DownloadQueue>,
    reporter: Arc<ProgressReporter>,
    control: watch::Sender<JobControl>,
    /// Re-entrancy guard for control operations.
    ctl_gate: Arc<tokio::sync::Mutex<()>>,
    pool: Mutex<Option<Arc<WorkerPool>>>,
    run_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    scan_done: Arc<AtomicBool>,
}

impl JobHandle {
    fn new(job: ExportJob, items: Vec<MediaItem>) -> Arc<Self> {
        let queue = Arc::new(DownloadQueue::from_items(items));
        let reporter = Arc::new(ProgressReporter::new());
        reporter.seed(job.downloaded_size);
        let (control, _) = watch::channel(JobControl::Run);
        Arc::new(Self {
            job: Arc::new(Mutex::new(job)),
            queue,
            reporter,
            control,
            ctl_gate: Arc::new(tokio::sync::Mutex::new(())),
            pool: Mutex::new(None),
            run_task: Mutex::new(None),
            scan_done: Arc::new(AtomicBool::new(false)),
        })
    }

    fn status(&self) -> JobStatus {
        self.job.lock().unwrap().status
    }

    fn set_status(&self, status: JobStatus) {
        let mut job = self.job.lock().unwrap();
        job.status = status;
        if status == JobStatus::Completed {
            job.completed_at = Some(Utc::now());
        }
    }

    fn pipeline_alive(&self) -> bool {
        self.run_task
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

struct EngineInner {
    gateway: Arc<dyn TgGateway>,
    store: Arc<dyn ResumeStorePort>,
    log: Arc<dyn MessageLogPort>,
    delegated: Option<Arc<dyn DelegatedDownloaderPort>>,
    export_root: PathBuf,
    jobs: RwLock<HashMap<String, Arc<JobHandle>>>,
}

/// The engine object: holds the shared client session, the resume store, and
/// the job registry. The process may host several engines for testing.
#[derive(Clone)]
pub struct ExportEngine {
    inner: Arc<EngineInner>,
}

impl ExportEngine {
    pub fn new(
        gateway: Arc<dyn TgGateway>,
        store: Arc<dyn ResumeStorePort>,
        log: Arc<dyn MessageLogPort>,
        delegated: Option<Arc<dyn DelegatedDownloaderPort>>,
        export_root: PathBuf,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                gateway,
                store,
                log,
                delegated,
                export_root,
                jobs: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Rebuild every stored job. Jobs that were live at the last persistence
    /// are re-entered automatically; paused jobs stay paused until resumed.
    pub async fn rehydrate(&self) -> Result<usize, DomainError> {
        let stored = self.inner.store.load_jobs().await?;
        let count = stored.len();
        for (job, items) in stored {
            let was_live = matches!(job.status, JobStatus::Running | JobStatus::Extracting);
            let id = job.id.clone();
            let handle = JobHandle::new(job, items);
            self.inner
                .jobs
                .write()
                .await
                .insert(id.clone(), Arc::clone(&handle));
            if was_live {
                info!(job_id = %id, "re-entering job that was live at shutdown");
                self.spawn_pipeline(&handle, false);
            }
        }
        info!(count, "jobs rehydrated");
        Ok(count)
    }

    async fn handle(&self, job_id: &str) -> Result<Arc<JobHandle>, DomainError> {
        self.inner
            .jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("job {job_id}")))
    }

    /// `<export root>/<job name>`; same-name jobs silently reuse the
    /// directory and de-duplicate by on-disk file length.
    fn export_dir(&self, job: &ExportJob) -> PathBuf {
        let root = job
            .filter
            .export_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.inner.export_root.clone());
        root.join(sanitize(&job.name))
    }

    async fn persist(&self, handle: &JobHandle) {
        let job = handle.job.lock().unwrap().clone();
        if let Err(e) = self.inner.store.save_job(&job).await {
            warn!(job_id = %job.id, error = %e, "job persist failed");
        }
        let items = handle.queue.snapshot_items();
        if let Err(e) = self.inner.store.save_queue(&job.id, &items).await {
            warn!(job_id = %job.id, error = %e, "queue persist failed");
        }
    }

    fn sync_stats(handle: &JobHandle) {
        let stats = handle.queue.stats();
        let mut job = handle.job.lock().unwrap();
        job.downloaded_media = stats.done;
        job.failed_media = stats.failed;
        job.downloaded_size = stats.done_size;
        job.download_speed = handle.reporter.speed();
    }

    /// Reconcile queue items against files already on disk: a final file of
    /// the announced length settles its item without a download.
    async fn sync_with_disk(&self, handle: &JobHandle) {
        let export_dir = {
            let job = handle.job.lock().unwrap();
            self.export_dir(&job)
        };
        let mut confirmed = 0usize;
        for item in handle.queue.snapshot_items() {
            if item.status == DownloadStatus::Completed || item.size == 0 {
                continue;
            }
            let target = export_dir.join(&item.file_path);
            if let Ok(meta) = tokio::fs::metadata(&target).await {
                if meta.len() == item.size && handle.queue.confirm_completed(&item.id) {
                    let _ = tokio::fs::remove_file(
                        crate::usecases::worker_pool::partial_path(&target),
                    )
                    .await;
                    confirmed += 1;
                }
            }
        }
        if confirmed > 0 {
            info!(count = confirmed, "items confirmed complete from disk");
            Self::sync_stats(handle);
        }
    }

    /// Idempotent: a live pipeline is never replaced, whichever control path
    /// asks for one.
    fn spawn_pipeline(&self, handle: &Arc<JobHandle>, full_scan: bool) {
        let mut slot = handle.run_task.lock().unwrap();
        if slot.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let engine = self.clone();
        let handle_arc = Arc::clone(handle);
        *slot = Some(tokio::spawn(async move {
            engine.run_pipeline(handle_arc, full_scan).await;
        }));
    }

    /// The whole job lifecycle: resolve → scan ∥ download → finalise.
    async fn run_pipeline(self, handle: Arc<JobHandle>, full_scan: bool) {
        let job_id = {
            let mut job = handle.job.lock().unwrap();
            job.status = JobStatus::Extracting;
            job.started_at = Some(Utc::now());
            job.error = None;
            job.id.clone()
        };
        handle.scan_done.store(false, Ordering::SeqCst);
        handle.control.send_replace(JobControl::Run);
        handle.queue.set_global_pause(false);
        self.persist(&handle).await;
        info!(job_id = %job_id, full_scan, "export pipeline started");

        let filter = handle.job.lock().unwrap().filter.clone();
        let resolver = ChatResolver::new(Arc::clone(&self.inner.gateway));
        let chats = match resolver.resolve(&filter).await {
            Ok(chats) => chats,
            Err(e) => {
                self.fail_job(&handle, e).await;
                return;
            }
        };
        {
            let mut job = handle.job.lock().unwrap();
            job.total_chats = chats.len();
            job.processed_chats = 0;
        }
        if chats.is_empty() && handle.queue.is_empty() {
            info!(job_id = %job_id, "no chats matched the filter");
            handle.set_status(JobStatus::Completed);
            self.persist(&handle).await;
            return;
        }

        self.sync_with_disk(&handle).await;

        // Scanner runs concurrently with the drain: downloading starts as
        // soon as the first media item is enqueued.
        let scanner = MessageScanner::new(
            Arc::clone(&self.inner.gateway),
            Arc::clone(&self.inner.log),
            Arc::clone(&self.inner.store),
        );
        let scan_job = Arc::clone(&handle.job);
        let scan_queue = Arc::clone(&handle.queue);
        let scan_done = Arc::clone(&handle.scan_done);
        let mut scan_control = handle.control.subscribe();
        let scan_task = tokio::spawn(async move {
            let result = scanner
                .scan_chats(&scan_job, &scan_queue, &chats, full_scan, &mut scan_control)
                .await;
            scan_done.store(true, Ordering::SeqCst);
            result
        });

        // Extracting → running on the first ready item (or scan end).
        loop {
            if *handle.control.borrow() == JobControl::Cancel {
                break;
            }
            if !handle.queue.is_empty() || handle.scan_done.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        if *handle.control.borrow() != JobControl::Cancel {
            if handle.status() == JobStatus::Extracting {
                handle.set_status(JobStatus::Running);
            }
            self.persist(&handle).await;
        }

        let use_delegated = filter.tdl_mode && self.inner.delegated.is_some();
        if use_delegated {
            let delegated = Arc::clone(self.inner.delegated.as_ref().unwrap());
            self.drain_delegated(&handle, delegated).await;
        } else {
            self.drain_with_pool(&handle, &filter).await;
        }

        let scan_result = match scan_task.await {
            Ok(r) => r,
            Err(e) => Err(DomainError::State(format!("scanner task: {e}"))),
        };

        // Finalise.
        Self::sync_stats(&handle);
        let fatal = handle
            .pool
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|p| p.fatal());
        *handle.pool.lock().unwrap() = None;
        if let Err(e) = scan_result {
            self.fail_job(&handle, e).await;
            return;
        }
        if let Some(message) = fatal {
            self.fail_job(&handle, DomainError::Fatal(message)).await;
            return;
        }
        if *handle.control.borrow() == JobControl::Cancel {
            // Status was already set by cancel(); just persist the wind-down.
            self.persist(&handle).await;
            info!(job_id = %job_id, "pipeline wound down after cancel");
            return;
        }
        let (done, total) = {
            let job = handle.job.lock().unwrap();
            (job.downloaded_media, job.total_media)
        };
        if done >= total {
            handle.set_status(JobStatus::Completed);
            info!(job_id = %job_id, media = done, "export completed");
        } else {
            // Failed or individually-paused items remain; the operator can
            // retry or resume them.
            handle.set_status(JobStatus::Paused);
            info!(job_id = %job_id, done, total, "export drained with leftovers, paused");
        }
        self.persist(&handle).await;
    }

    async fn drain_with_pool(&self, handle: &Arc<JobHandle>, filter: &ExportFilter) {
        let (job_id, export_dir) = {
            let job = handle.job.lock().unwrap();
            (job.id.clone(), self.export_dir(&job))
        };
        let pool = Arc::new(WorkerPool::new(
            job_id,
            Arc::clone(&handle.job),
            Arc::clone(&self.inner.gateway),
            Arc::clone(&handle.queue),
            Arc::clone(&self.inner.store),
            Arc::clone(&handle.reporter),
            export_dir,
            handle.control.subscribe(),
            filter.concurrency(),
            filter.parallel_chunk,
            filter.max_download_retries.max(1),
            filter.retry_delay_secs.max(1),
        ));
        pool.start();
        *handle.pool.lock().unwrap() = Some(Arc::clone(&pool));

        let mut last_persist = Instant::now();
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let control = *handle.control.borrow();
            if control == JobControl::Cancel {
                break;
            }
            if pool.fatal().is_some() {
                break;
            }
            if control == JobControl::Run
                && handle.scan_done.load(Ordering::SeqCst)
                && handle.queue.is_idle()
            {
                break;
            }
            if last_persist.elapsed() >= PERSIST_INTERVAL {
                last_persist = Instant::now();
                Self::sync_stats(handle);
                self.persist(handle).await;
            }
        }
        // Wind the pool down and wait for the workers to drop their slots.
        pool.resize(0);
        pool.join().await;
    }

    /// Delegated drain: batches of waiting items grouped by target
    /// subdirectory are handed to the external downloader; a non-zero exit
    /// fails the whole batch.
    async fn drain_delegated(
        &self,
        handle: &Arc<JobHandle>,
        delegated: Arc<dyn DelegatedDownloaderPort>,
    ) {
        let export_dir = {
            let job = handle.job.lock().unwrap();
            self.export_dir(&job)
        };
        let mut last_persist = Instant::now();
        loop {
            let state = *handle.control.borrow();
            match state {
                JobControl::Cancel => break,
                JobControl::Pause => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
                JobControl::Run => {}
            }
            if handle.scan_done.load(Ordering::SeqCst) && handle.queue.is_idle() {
                break;
            }

            let mut batch = Vec::new();
            while let Some(item) = handle.queue.claim_next() {
                batch.push(item);
            }
            if batch.is_empty() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }

            let mut groups: HashMap<PathBuf, Vec<MediaItem>> = HashMap::new();
            for item in batch {
                let dir = export_dir
                    .join(&item.file_path)
                    .parent()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| export_dir.clone());
                groups.entry(dir).or_default().push(item);
            }

            for (dir, items) in groups {
                if *handle.control.borrow() == JobControl::Cancel {
                    for item in &items {
                        handle.queue.mark_paused(&item.id, item.downloaded);
                    }
                    break;
                }
                if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                    for item in &items {
                        handle.queue.fail(
                            &item.id,
                            item.downloaded,
                            ItemError::new(ItemErrorKind::Permanent, format!("create dir: {e}")),
                        );
                    }
                    continue;
                }
                self.run_delegated_group(handle, &delegated, &dir, items).await;
                Self::sync_stats(handle);
                if last_persist.elapsed() >= PERSIST_INTERVAL {
                    last_persist = Instant::now();
                    self.persist(handle).await;
                }
            }
        }
        self.persist(handle).await;
    }

    async fn run_delegated_group(
        &self,
        handle: &Arc<JobHandle>,
        delegated: &Arc<dyn DelegatedDownloaderPort>,
        dir: &PathBuf,
        items: Vec<MediaItem>,
    ) {
        let delegated_items: Vec<DelegatedItem> = items
            .iter()
            .map(|i| DelegatedItem {
                item_id: i.id.clone(),
                chat_id: i.chat_id,
                message_id: i.message_id,
                file_name: i.file_name.clone(),
                size: i.size,
            })
            .collect();

        let (tx, mut rx) = mpsc::channel::<crate::ports::outbound::DelegatedProgress>(64);
        let queue = Arc::clone(&handle.queue);
        let reporter = Arc::clone(&handle.reporter);
        let apply = tokio::spawn(async move {
            let mut last: HashMap<String, u64> = HashMap::new();
            while let Some(tick) = rx.recv().await {
                let prev = last.get(&tick.item_id).copied().unwrap_or(0);
                if tick.downloaded > prev {
                    reporter.add_bytes(tick.downloaded - prev);
                    last.insert(tick.item_id.clone(), tick.downloaded);
                }
                queue.update_progress(&tick.item_id, tick.downloaded);
            }
        });

        let result = delegated.download_batch(&delegated_items, dir, tx).await;
        let _ = apply.await;

        match result {
            Ok(()) => {
                // Exit code zero claims full success; confirm each file on
                // disk before settling; progress lines alone prove nothing.
                for item in &items {
                    let target = dir.join(&item.file_name);
                    let on_disk = tokio::fs::metadata(&target)
                        .await
                        .map(|m| item.size == 0 || m.len() == item.size)
                        .unwrap_or(false);
                    if on_disk {
                        handle.queue.finalize_size(
                            &item.id,
                            tokio::fs::metadata(&target)
                                .await
                                .map(|m| m.len())
                                .unwrap_or(item.size),
                        );
                        handle.queue.complete(&item.id);
                    } else {
                        handle.queue.fail(
                            &item.id,
                            item.downloaded,
                            ItemError::new(
                                ItemErrorKind::Batch,
                                "file missing after delegated batch",
                            ),
                        );
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, count = items.len(), "delegated batch failed");
                for item in &items {
                    handle.queue.fail(
                        &item.id,
                        item.downloaded,
                        ItemError::new(ItemErrorKind::Batch, e.to_string()),
                    );
                }
            }
        }
    }

    async fn fail_job(&self, handle: &JobHandle, err: DomainError) {
        error!(error = %err, "job failed");
        {
            let mut job = handle.job.lock().unwrap();
            job.status = JobStatus::Failed;
            job.error = Some(err.to_string());
        }
        self.persist(handle).await;
    }

    /// Respawn the pipeline when a retry/resume reopens work on a job whose
    /// run task has already wound down.
    fn respawn_if_idle(&self, handle: &Arc<JobHandle>) {
        if !handle.pipeline_alive() {
            self.spawn_pipeline(handle, false);
        }
    }
}

#[async_trait::async_trait]
impl ExportControlPort for ExportEngine {
    async fn create_job(
        &self,
        name: &str,
        filter: ExportFilter,
    ) -> Result<ExportJob, DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::Invalid("job name must not be empty".into()));
        }
        let job = ExportJob::new(uuid::Uuid::new_v4().to_string(), name.trim().to_string(), filter);
        self.inner.store.save_job(&job).await?;
        let handle = JobHandle::new(job.clone(), Vec::new());
        self.inner
            .jobs
            .write()
            .await
            .insert(job.id.clone(), handle);
        info!(job_id = %job.id, name = %job.name, "job created");
        Ok(job)
    }

    async fn start(&self, job_id: &str) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        let _gate = handle
            .ctl_gate
            .try_lock()
            .map_err(|_| DomainError::Busy(job_id.to_string()))?;
        if handle.pipeline_alive() {
            return Err(DomainError::Busy(format!("job {job_id} already running")));
        }
        self.spawn_pipeline(&handle, false);
        Ok(())
    }

    async fn pause(&self, job_id: &str) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        let _gate = handle
            .ctl_gate
            .try_lock()
            .map_err(|_| DomainError::Busy(job_id.to_string()))?;
        if !matches!(handle.status(), JobStatus::Running | JobStatus::Extracting) {
            return Err(DomainError::Invalid("job is not running".into()));
        }
        handle.set_status(JobStatus::Paused);
        handle.queue.set_global_pause(true);
        handle.control.send_replace(JobControl::Pause);
        self.persist(&handle).await;
        info!(job_id, "job paused");
        Ok(())
    }

    async fn resume(&self, job_id: &str) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        let _gate = handle
            .ctl_gate
            .try_lock()
            .map_err(|_| DomainError::Busy(job_id.to_string()))?;
        if handle.status() != JobStatus::Paused {
            return Err(DomainError::Invalid("job is not paused".into()));
        }
        handle.set_status(JobStatus::Running);
        handle.queue.set_global_pause(false);
        handle.queue.refill_paused();
        handle.control.send_replace(JobControl::Run);
        if !handle.pipeline_alive() {
            self.spawn_pipeline(&handle, false);
        }
        self.persist(&handle).await;
        info!(job_id, "job resumed");
        Ok(())
    }

    async fn cancel(&self, job_id: &str) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        let _gate = handle
            .ctl_gate
            .try_lock()
            .map_err(|_| DomainError::Busy(job_id.to_string()))?;
        if handle.status().is_terminal() {
            return Err(DomainError::Invalid("job already finished".into()));
        }
        handle.set_status(JobStatus::Cancelled);
        handle.control.send_replace(JobControl::Cancel);
        self.persist(&handle).await;
        info!(job_id, "job cancelled, partials retained");
        Ok(())
    }

    async fn delete(&self, job_id: &str, remove_files: bool) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        if !handle.status().is_terminal() {
            handle.control.send_replace(JobControl::Cancel);
            if let Some(task) = handle.run_task.lock().unwrap().take() {
                task.abort();
            }
        }
        let export_dir = {
            let job = handle.job.lock().unwrap();
            self.export_dir(&job)
        };
        self.inner.store.delete_job(job_id).await?;
        self.inner.jobs.write().await.remove(job_id);
        if remove_files {
            if let Err(e) = tokio::fs::remove_dir_all(&export_dir).await {
                warn!(path = %export_dir.display(), error = %e, "export tree removal failed");
            }
        }
        info!(job_id, remove_files, "job deleted");
        Ok(())
    }

    async fn retry_failed(&self, job_id: &str) -> Result<usize, DomainError> {
        let handle = self.handle(job_id).await?;
        let _gate = handle
            .ctl_gate
            .try_lock()
            .map_err(|_| DomainError::Busy(job_id.to_string()))?;
        let moved = handle.queue.retry_failed();
        if moved > 0 {
            // A paused job keeps its new waiting items until resumed; a
            // settled one is re-entered so the retries actually run.
            if handle.status().is_terminal() {
                self.respawn_if_idle(&handle);
            }
            self.persist(&handle).await;
        }
        info!(job_id, moved, "failed items requeued");
        Ok(moved)
    }

    async fn retry_item(&self, job_id: &str, item_id: &str) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        if !handle.queue.retry_item(item_id, true) {
            return Err(DomainError::NotFound(format!("item {item_id}")));
        }
        if handle.status().is_terminal() {
            self.respawn_if_idle(&handle);
        }
        self.persist(&handle).await;
        Ok(())
    }

    async fn pause_item(&self, job_id: &str, item_id: &str) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        if !handle.queue.pause_item(item_id) {
            return Err(DomainError::NotFound(format!("item {item_id}")));
        }
        Ok(())
    }

    async fn resume_item(&self, job_id: &str, item_id: &str) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        if !handle.queue.resume_item(item_id) {
            return Err(DomainError::NotFound(format!("item {item_id}")));
        }
        if handle.status().is_terminal() {
            self.respawn_if_idle(&handle);
        }
        Ok(())
    }

    async fn cancel_item(&self, job_id: &str, item_id: &str) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        if !handle.queue.cancel_item(item_id) {
            return Err(DomainError::NotFound(format!("item {item_id}")));
        }
        Ok(())
    }

    async fn verify(&self, job_id: &str) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        let _gate = handle
            .ctl_gate
            .try_lock()
            .map_err(|_| DomainError::Busy(job_id.to_string()))?;
        {
            let mut job = handle.job.lock().unwrap();
            if job.verifying {
                return Err(DomainError::Busy("verification in progress".into()));
            }
            job.verifying = true;
        }
        let export_dir = {
            let job = handle.job.lock().unwrap();
            self.export_dir(&job)
        };
        let mut checked = 0usize;
        let mut requeued = 0usize;
        let candidates: Vec<String> = handle
            .queue
            .ids_in_status(DownloadStatus::Completed)
            .into_iter()
            .chain(handle.queue.ids_in_status(DownloadStatus::Failed))
            .collect();
        for id in candidates {
            let Some(item) = handle.queue.get(&id) else {
                continue;
            };
            checked += 1;
            let target = export_dir.join(&item.file_path);
            let length = tokio::fs::metadata(&target).await.map(|m| m.len()).ok();
            let intact = item.status == DownloadStatus::Completed
                && length == Some(item.size)
                && item.size > 0;
            if !intact && handle.queue.retry_item(&id, true) {
                requeued += 1;
            }
        }
        let summary = format!("verified {checked} items, {requeued} queued for re-download");
        {
            let mut job = handle.job.lock().unwrap();
            job.verify_summary = Some(summary.clone());
            job.verifying = false;
        }
        if requeued > 0 && handle.status().is_terminal() {
            self.respawn_if_idle(&handle);
        }
        self.persist(&handle).await;
        info!(job_id, %summary, "verification finished");
        Ok(())
    }

    async fn rescan(&self, job_id: &str, full: bool) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        let _gate = handle
            .ctl_gate
            .try_lock()
            .map_err(|_| DomainError::Busy(job_id.to_string()))?;
        if handle.pipeline_alive() {
            return Err(DomainError::Busy("a scan is already in progress".into()));
        }
        if full {
            let mut job = handle.job.lock().unwrap();
            job.cursors.clear();
        }
        self.spawn_pipeline(&handle, full);
        Ok(())
    }

    async fn set_concurrency(
        &self,
        job_id: &str,
        max_concurrent: usize,
        parallel_chunk: Option<bool>,
    ) -> Result<(), DomainError> {
        if max_concurrent == 0 || max_concurrent > crate::domain::job::MAX_CONCURRENT_LIMIT {
            return Err(DomainError::Invalid(format!(
                "max_concurrent_downloads must be 1..={}",
                crate::domain::job::MAX_CONCURRENT_LIMIT
            )));
        }
        let handle = self.handle(job_id).await?;
        {
            let mut job = handle.job.lock().unwrap();
            job.filter.max_concurrent_downloads = max_concurrent;
            if let Some(parallel) = parallel_chunk {
                job.filter.parallel_chunk = parallel;
            }
        }
        if let Some(pool) = handle.pool.lock().unwrap().as_ref() {
            pool.resize(max_concurrent);
            if let Some(parallel) = parallel_chunk {
                pool.set_parallel_chunk(parallel);
            }
        }
        self.persist(&handle).await;
        info!(job_id, max_concurrent, "concurrency updated");
        Ok(())
    }

    async fn set_delegated(&self, job_id: &str, enabled: bool) -> Result<(), DomainError> {
        let handle = self.handle(job_id).await?;
        let _gate = handle
            .ctl_gate
            .try_lock()
            .map_err(|_| DomainError::Busy(job_id.to_string()))?;
        if enabled && self.inner.delegated.is_none() {
            return Err(DomainError::Invalid(
                "delegated downloader is not configured".into(),
            ));
        }
        {
            let mut job = handle.job.lock().unwrap();
            job.filter.tdl_mode = enabled;
        }
        self.persist(&handle).await;
        info!(job_id, enabled, "delegated downloader toggled");
        Ok(())
    }

    async fn snapshot(&self, job_id: &str) -> Result<ExportJob, DomainError> {
        let handle = self.handle(job_id).await?;
        Self::sync_stats(&handle);
        let job = handle.job.lock().unwrap().clone();
        Ok(job)
    }

    async fn snapshots(&self) -> Vec<ExportJob> {
        let jobs = self.inner.jobs.read().await;
        let mut out: Vec<ExportJob> = jobs
            .values()
            .map(|h| {
                Self::sync_stats(h);
                h.job.lock().unwrap().clone()
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    async fn queue_view(
        &self,
        job_id: &str,
        limit: usize,
        reversed: bool,
    ) -> Result<QueueView, DomainError> {
        let handle = self.handle(job_id).await?;
        let concurrency = handle.job.lock().unwrap().filter.concurrency();
        Ok(handle.queue.view(limit, reversed, concurrency))
    }
}
