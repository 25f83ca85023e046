#![forbid(unsafe_code)]

//! Bounded-concurrency download queue.
//!
//! A batch submission turns into one job per requested entry. Valid jobs go
//! into a single queue shared by all sessions and are drained by a fixed pool
//! of workers; the pool size is the hard cap on concurrent downloads. Workers
//! take the oldest job whose start offset has passed, so jobs of one batch
//! keep their relative order but may interleave with concurrent batches.
//! There is no per-session round robin.
//!
//! Every worker runs the extraction engine on a blocking thread and funnels
//! its progress callbacks into the registry and the fanout. Whatever happens
//! inside the engine (error, panic, cancellation) ends as a Failed job; the
//! worker itself always survives and takes the next job.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::SessionCatalog;
use crate::error::{Error, Result};
use crate::extractor::{Extractor, FetchRequest};
use crate::fanout::Fanout;
use crate::models::{Event, FormatSpec, JobState, VideoEntry};
use crate::registry::{NewJob, ProgressRegistry};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub max_queue_len: usize,
    /// Start offset between consecutive jobs of one batch. Zero disables it.
    pub inter_job_delay: Duration,
    /// Rough duration of one download, used only for the completion hint.
    pub estimated_job_duration: Duration,
    pub download_dir: PathBuf,
    /// URL prefix under which finished files are served.
    pub public_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_queue_len: 1000,
            inter_job_delay: Duration::ZERO,
            estimated_job_duration: Duration::from_secs(30),
            download_dir: PathBuf::from("/tmp/downloads"),
            public_prefix: "/downloads".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub job_id: String,
    pub video_id: String,
    pub position: usize,
    pub status: JobState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReceipt {
    pub jobs: Vec<BatchJob>,
    pub total_jobs: usize,
    pub estimated_time_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub active: usize,
    pub queued: usize,
    pub workers: usize,
}

struct QueuedJob {
    job_id: String,
    session_id: String,
    entry: VideoEntry,
    format: FormatSpec,
    not_before: Instant,
}

#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<DownloadManagerInner>,
}

struct DownloadManagerInner {
    pending: Mutex<VecDeque<QueuedJob>>,
    wakeup: Notify,
    active: AtomicUsize,
    config: PoolConfig,
    catalog: Arc<SessionCatalog>,
    registry: Arc<ProgressRegistry>,
    fanout: Arc<Fanout>,
    extractor: Arc<dyn Extractor>,
    shutdown: CancellationToken,
}

impl DownloadManager {
    /// Spawns the worker pool on the current tokio runtime.
    pub fn start(
        config: PoolConfig,
        catalog: Arc<SessionCatalog>,
        registry: Arc<ProgressRegistry>,
        fanout: Arc<Fanout>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let config = PoolConfig {
            workers: config.workers.max(1),
            ..config
        };
        let inner = Arc::new(DownloadManagerInner {
            pending: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            active: AtomicUsize::new(0),
            config,
            catalog,
            registry,
            fanout,
            extractor,
            shutdown: CancellationToken::new(),
        });

        for worker in 0..inner.config.workers {
            let inner = inner.clone();
            tokio::spawn(async move { inner.worker_loop(worker).await });
        }
        info!(workers = inner.config.workers, "download workers started");

        Self { inner }
    }

    /// Creates one job per entry id, in input order, and enqueues the valid
    /// ones. Unknown entry ids become jobs that fail immediately without
    /// affecting their siblings. Repeated ids yield independent jobs.
    pub fn submit_batch(
        &self,
        session_id: &str,
        entry_ids: &[String],
        format: FormatSpec,
    ) -> Result<BatchReceipt> {
        let inner = &self.inner;
        if entry_ids.is_empty() {
            return Err(Error::InvalidRequest("no videos selected".into()));
        }
        if entry_ids.len() > inner.config.max_queue_len {
            return Err(Error::InvalidRequest(format!(
                "batch of {} videos exceeds the limit of {}",
                entry_ids.len(),
                inner.config.max_queue_len
            )));
        }
        let session = inner.catalog.session(session_id)?;
        let resolved: Vec<(&String, Option<VideoEntry>)> = entry_ids
            .iter()
            .map(|id| (id, session.entry(id).cloned()))
            .collect();
        let valid = resolved.iter().filter(|(_, entry)| entry.is_some()).count();

        let enqueued_at = Utc::now();
        let batch_start = Instant::now();
        let mut jobs = Vec::with_capacity(resolved.len());
        let mut rejected = Vec::new();
        {
            let mut pending = inner.pending.lock();
            if pending.len() + valid > inner.config.max_queue_len {
                return Err(Error::QueueFull {
                    pending: pending.len(),
                    limit: inner.config.max_queue_len,
                });
            }

            let mut ordinal: u32 = 0;
            for (index, (entry_id, entry)) in resolved.into_iter().enumerate() {
                let position = index + 1;
                let job_id = uuid::Uuid::new_v4().to_string();
                inner.registry.insert(NewJob {
                    job_id: job_id.clone(),
                    session_id: session_id.to_string(),
                    video_id: entry_id.clone(),
                    format,
                    position,
                    enqueued_at,
                });
                match entry {
                    Some(entry) => {
                        pending.push_back(QueuedJob {
                            job_id: job_id.clone(),
                            session_id: session_id.to_string(),
                            entry,
                            format,
                            not_before: batch_start + inner.config.inter_job_delay * ordinal,
                        });
                        ordinal += 1;
                    }
                    None => rejected.push(index),
                }
                jobs.push(BatchJob {
                    job_id,
                    video_id: entry_id.clone(),
                    position,
                    status: JobState::Queued,
                });
            }
        }
        for index in rejected {
            let job = &mut jobs[index];
            let message = Error::EntryNotFound {
                session_id: session_id.to_string(),
                entry_id: job.video_id.clone(),
            }
            .to_string();
            warn!(session_id, entry_id = %job.video_id, "rejected unknown entry in batch");
            inner.registry.fail(&job.job_id, message.clone());
            inner.fanout.publish(
                session_id,
                Event::Error {
                    job_id: job.job_id.clone(),
                    video_id: job.video_id.clone(),
                    error: message,
                },
            );
            job.status = JobState::Failed;
        }
        for _ in 0..valid {
            inner.wakeup.notify_one();
        }

        info!(session_id, total = jobs.len(), valid, %format, "batch queued");
        Ok(BatchReceipt {
            total_jobs: jobs.len(),
            estimated_time_seconds: self.estimate_seconds(valid),
            jobs,
        })
    }

    /// Completion hint: full pool rounds of the per-job estimate plus the
    /// stagger offset of the last job.
    pub fn estimate_seconds(&self, jobs: usize) -> u64 {
        if jobs == 0 {
            return 0;
        }
        let config = &self.inner.config;
        let rounds = jobs.div_ceil(config.workers) as f64;
        let stagger = config.inter_job_delay.as_secs_f64() * (jobs - 1) as f64;
        (rounds * config.estimated_job_duration.as_secs_f64() + stagger).ceil() as u64
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.inner.active.load(Ordering::SeqCst),
            queued: self.inner.pending.lock().len(),
            workers: self.inner.config.workers,
        }
    }

    /// Stops idle workers, cancels in-flight fetches and fails every job
    /// still waiting in the queue.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let abandoned: Vec<QueuedJob> = self.inner.pending.lock().drain(..).collect();
        for job in &abandoned {
            self.inner
                .finish_failed(job, "server shutting down".to_string());
        }
    }
}

impl DownloadManagerInner {
    async fn worker_loop(self: Arc<Self>, worker: usize) {
        debug!(worker, "worker ready");
        loop {
            let job = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = self.next_job() => job,
            };
            self.run_job(worker, job).await;
        }
        debug!(worker, "worker stopped");
    }

    /// Takes the oldest job whose start offset has passed. Staggered jobs stay
    /// in the queue until they are due so ready work is never held up.
    async fn next_job(&self) -> QueuedJob {
        loop {
            let now = Instant::now();
            let next_due = {
                let mut pending = self.pending.lock();
                let ready = pending.iter().position(|job| job.not_before <= now);
                if let Some(job) = ready.and_then(|position| pending.remove(position)) {
                    return job;
                }
                pending.iter().map(|job| job.not_before).min()
            };
            match next_due {
                Some(due) => {
                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                None => self.wakeup.notified().await,
            }
        }
    }

    async fn run_job(self: &Arc<Self>, worker: usize, job: QueuedJob) {
        if !self.registry.start(&job.job_id) {
            warn!(worker, job_id = %job.job_id, "job no longer queued, skipping");
            return;
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        info!(worker, job_id = %job.job_id, video_id = %job.entry.id, "download started");
        self.fanout.publish(
            &job.session_id,
            Event::Progress {
                job_id: job.job_id.clone(),
                video_id: job.entry.id.clone(),
                progress: 0,
            },
        );

        let blocking = self.clone();
        let job = Arc::new(job);
        let job_for_fetch = job.clone();
        let outcome =
            tokio::task::spawn_blocking(move || blocking.fetch_blocking(&job_for_fetch)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(Ok(path)) => match self.public_path(&path) {
                Some(file_path) => self.finish_completed(&job, file_path),
                None => self.finish_failed(
                    &job,
                    format!("downloaded file has no usable name: {}", path.display()),
                ),
            },
            Ok(Err(err)) => self.finish_failed(&job, err.to_string()),
            Err(join_err) => {
                error!(worker, job_id = %job.job_id, error = %join_err, "extractor crashed");
                self.finish_failed(&job, format!("internal worker fault: {join_err}"));
            }
        }
    }

    fn fetch_blocking(&self, job: &QueuedJob) -> Result<PathBuf> {
        let request = FetchRequest {
            session_id: &job.session_id,
            job_id: &job.job_id,
            entry: &job.entry,
            format: job.format,
            dest_dir: &self.config.download_dir,
        };
        let mut on_progress = |percentage: u8| {
            if self.registry.update(&job.job_id, percentage) {
                self.fanout.publish(
                    &job.session_id,
                    Event::Progress {
                        job_id: job.job_id.clone(),
                        video_id: job.entry.id.clone(),
                        progress: percentage.min(100),
                    },
                );
            }
        };
        self.extractor
            .fetch_entry(&request, &mut on_progress, &self.shutdown)
    }

    fn public_path(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        Some(format!(
            "{}/{}",
            self.config.public_prefix.trim_end_matches('/'),
            name
        ))
    }

    fn finish_completed(&self, job: &QueuedJob, file_path: String) {
        if self.registry.complete(&job.job_id, file_path.clone()) {
            info!(job_id = %job.job_id, file = %file_path, "download completed");
            self.fanout.publish(
                &job.session_id,
                Event::Complete {
                    job_id: job.job_id.clone(),
                    video_id: job.entry.id.clone(),
                    file_path,
                },
            );
        }
    }

    fn finish_failed(&self, job: &QueuedJob, message: String) {
        if self.registry.fail(&job.job_id, message.clone()) {
            warn!(job_id = %job.job_id, error = %message, "download failed");
            self.fanout.publish(
                &job.session_id,
                Event::Error {
                    job_id: job.job_id.clone(),
                    video_id: job.entry.id.clone(),
                    error: message,
                },
            );
        }
    }
}
