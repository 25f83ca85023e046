#![forbid(unsafe_code)]

//! Process-scoped store that owns the catalog, the job registry, the fanout
//! and the worker pool. Created once at startup and shared with the HTTP
//! layer through `Arc`.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{NewSession, Page, SessionCatalog, SessionSummary};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::extractor::Extractor;
use crate::fanout::{Fanout, Subscription};
use crate::models::{FormatSpec, JobStatus};
use crate::queue::{BatchReceipt, DownloadManager};
use crate::ratelimit::{LimitedRoute, RateLimits};
use crate::registry::ProgressRegistry;
use crate::urls::{detect_platform, normalize_url};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub active_downloads: usize,
    pub queued: usize,
    pub workers: usize,
    pub sessions: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub jobs: usize,
    pub channels: usize,
}

pub struct DownloadService {
    settings: Settings,
    catalog: Arc<SessionCatalog>,
    registry: Arc<ProgressRegistry>,
    fanout: Arc<Fanout>,
    manager: DownloadManager,
    extractor: Arc<dyn Extractor>,
    limits: RateLimits,
    shutdown: CancellationToken,
}

impl DownloadService {
    /// Builds every component and starts the worker pool. Must be called
    /// inside a tokio runtime.
    pub fn start(settings: Settings, extractor: Arc<dyn Extractor>) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&settings.download_dir).map_err(|err| {
            Error::Internal(format!(
                "creating {}: {err}",
                settings.download_dir.display()
            ))
        })?;

        let catalog = Arc::new(SessionCatalog::new(
            settings.max_sessions,
            settings.session_ttl,
        ));
        let registry = Arc::new(ProgressRegistry::new());
        let fanout = Arc::new(Fanout::new(settings.subscriber_buffer));
        let manager = DownloadManager::start(
            settings.pool_config(),
            catalog.clone(),
            registry.clone(),
            fanout.clone(),
            extractor.clone(),
        );

        let limits = RateLimits::new(
            settings.analyze_rate_per_minute,
            settings.download_rate_per_minute,
        );

        Ok(Arc::new(Self {
            settings,
            catalog,
            registry,
            fanout,
            manager,
            extractor,
            limits,
            shutdown: CancellationToken::new(),
        }))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn download_dir(&self) -> &Path {
        &self.settings.download_dir
    }

    /// Counts one request from `client` against the route's allowance.
    pub fn admit(&self, route: LimitedRoute, client: IpAddr) -> Result<()> {
        self.limits.check(route, client)
    }

    /// Runs the extraction engine on a submitted URL and stores the result as
    /// a new session.
    pub async fn analyze(&self, raw_url: &str) -> Result<SessionSummary> {
        let url = normalize_url(raw_url)?;
        let platform = detect_platform(&url);
        info!(url = %url, platform = platform.label(), "analyzing");

        let extractor = self.extractor.clone();
        let target = url.clone();
        let mut analysis = tokio::task::spawn_blocking(move || extractor.analyze(&target))
            .await
            .map_err(|err| Error::Internal(format!("analyze task failed: {err}")))??;

        if analysis.entries.is_empty() {
            return Err(Error::Extraction("no videos found at this URL".into()));
        }
        let limit = self.settings.max_playlist_size;
        if analysis.entries.len() > limit {
            warn!(
                url = %url,
                found = analysis.entries.len(),
                limit,
                "playlist truncated"
            );
            analysis.entries.truncate(limit);
        }

        let session_id = self.catalog.create_session(NewSession {
            title: analysis.title,
            is_playlist: analysis.is_playlist,
            source_url: url,
            platform: platform.label().to_string(),
            entries: analysis.entries,
        })?;
        self.catalog.summary(&session_id)
    }

    pub fn videos(&self, session_id: &str, page: usize, page_size: usize) -> Result<Page> {
        self.catalog.get_page(session_id, page, page_size)
    }

    pub fn submit(
        &self,
        session_id: &str,
        entry_ids: &[String],
        format: FormatSpec,
    ) -> Result<BatchReceipt> {
        self.manager.submit_batch(session_id, entry_ids, format)
    }

    pub fn progress(&self, job_id: &str) -> Result<JobStatus> {
        self.registry.get(job_id)
    }

    /// Push stream for an existing session.
    pub fn subscribe(&self, session_id: &str) -> Result<Subscription> {
        self.catalog.session(session_id)?;
        Ok(self.fanout.subscribe(session_id))
    }

    pub fn health(&self) -> Health {
        let stats = self.manager.stats();
        Health {
            status: "healthy",
            active_downloads: stats.active,
            queued: stats.queued,
            workers: stats.workers,
            sessions: self.catalog.len(),
        }
    }

    /// Expires idle sessions and releases what hangs off them.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let expired = self.catalog.sweep_expired(now);
        for session_id in &expired {
            self.fanout.remove_session(session_id);
        }
        let jobs = self
            .registry
            .evict_orphaned(|session_id| self.catalog.contains(session_id));
        let channels = self.fanout.prune();
        self.limits.retain_recent();
        let report = SweepReport {
            sessions: expired.len(),
            jobs,
            channels,
        };
        if report != SweepReport::default() {
            debug!(?report, "sweep finished");
        }
        report
    }

    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = service.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        service.sweep(Instant::now());
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        info!("shutting down download service");
        self.shutdown.cancel();
        self.manager.shutdown();
        self.fanout.close_all();
    }
}
