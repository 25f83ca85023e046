#![forbid(unsafe_code)]

//! In-memory job table read by pollers and the push stream.
//!
//! Writers follow a single-writer-per-job discipline: the submit path inserts
//! a job, then only the worker that dequeued it moves it forward. Every
//! mutator validates the transition, so a stray call on a terminal job is a
//! no-op instead of a corruption.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{FormatSpec, JobState, JobStatus};

/// Fields fixed at submit time.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub session_id: String,
    pub video_id: String,
    pub format: FormatSpec,
    pub position: usize,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ProgressRegistry {
    jobs: RwLock<HashMap<String, JobStatus>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job in the Queued state.
    pub fn insert(&self, job: NewJob) {
        let status = JobStatus {
            job_id: job.job_id.clone(),
            session_id: job.session_id,
            video_id: job.video_id,
            status: JobState::Queued,
            progress: 0,
            position: job.position,
            format: job.format,
            enqueued_at: job.enqueued_at,
            file_path: None,
            error: None,
        };
        self.jobs.write().insert(job.job_id, status);
    }

    /// Returns a consistent copy of the job's current state.
    pub fn get(&self, job_id: &str) -> Result<JobStatus> {
        self.jobs
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    /// Queued -> Downloading.
    pub fn start(&self, job_id: &str) -> bool {
        self.transition(job_id, |job| {
            if job.status != JobState::Queued {
                return false;
            }
            job.status = JobState::Downloading;
            job.progress = 0;
            true
        })
    }

    /// Raises the progress of a Downloading job. Returns true only when the
    /// stored percentage actually increased.
    pub fn update(&self, job_id: &str, percentage: u8) -> bool {
        let percentage = percentage.min(100);
        self.transition(job_id, |job| {
            if job.status != JobState::Downloading || percentage <= job.progress {
                return false;
            }
            job.progress = percentage;
            true
        })
    }

    /// Downloading -> Completed.
    pub fn complete(&self, job_id: &str, file_ref: impl Into<String>) -> bool {
        let file_ref = file_ref.into();
        self.transition(job_id, move |job| {
            if job.status != JobState::Downloading {
                return false;
            }
            job.status = JobState::Completed;
            job.progress = 100;
            job.file_path = Some(file_ref);
            true
        })
    }

    /// Moves a job to Failed. Allowed from Downloading, and from Queued for
    /// batch entries rejected before they were ever enqueued.
    pub fn fail(&self, job_id: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        self.transition(job_id, move |job| {
            if job.status.is_terminal() {
                return false;
            }
            job.status = JobState::Failed;
            job.error = Some(error);
            true
        })
    }

    /// Number of jobs currently Downloading.
    pub fn active_count(&self) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|job| job.status == JobState::Downloading)
            .count()
    }

    /// Forgets finished jobs whose session is gone. Jobs still queued or
    /// running stay until their worker is done with them and are collected by
    /// a later sweep.
    pub fn evict_orphaned(&self, session_is_live: impl Fn(&str) -> bool) -> usize {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| !job.status.is_terminal() || session_is_live(&job.session_id));
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn transition(&self, job_id: &str, apply: impl FnOnce(&mut JobStatus) -> bool) -> bool {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(job_id) else {
            warn!(job_id, "state change for unknown job ignored");
            return false;
        };
        apply(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(id: &str, session: &str) -> NewJob {
        NewJob {
            job_id: id.into(),
            session_id: session.into(),
            video_id: format!("video-{id}"),
            format: FormatSpec::default(),
            position: 1,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn follows_the_happy_path() {
        let registry = ProgressRegistry::new();
        registry.insert(new_job("j1", "s1"));
        assert_eq!(registry.get("j1").unwrap().status, JobState::Queued);

        assert!(registry.start("j1"));
        assert!(registry.update("j1", 40));
        assert_eq!(registry.active_count(), 1);
        assert!(registry.complete("j1", "/downloads/a.mp4"));

        let done = registry.get("j1").unwrap();
        assert_eq!(done.status, JobState::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.file_path.as_deref(), Some("/downloads/a.mp4"));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn progress_never_goes_backwards() {
        let registry = ProgressRegistry::new();
        registry.insert(new_job("j1", "s1"));
        assert!(!registry.update("j1", 10), "queued jobs have no progress");
        registry.start("j1");
        assert!(registry.update("j1", 60));
        assert!(!registry.update("j1", 30));
        assert!(!registry.update("j1", 60));
        assert!(registry.update("j1", 250));
        assert_eq!(registry.get("j1").unwrap().progress, 100);
    }

    #[test]
    fn terminal_states_are_final() {
        let registry = ProgressRegistry::new();
        registry.insert(new_job("j1", "s1"));
        assert!(!registry.complete("j1", "/x"), "must start before completing");
        registry.start("j1");
        assert!(registry.fail("j1", "network down"));

        assert!(!registry.start("j1"));
        assert!(!registry.update("j1", 90));
        assert!(!registry.complete("j1", "/x"));
        assert!(!registry.fail("j1", "again"));

        let failed = registry.get("j1").unwrap();
        assert_eq!(failed.status, JobState::Failed);
        assert_eq!(failed.error.as_deref(), Some("network down"));
        assert!(failed.file_path.is_none());
    }

    #[test]
    fn queued_job_may_fail_directly() {
        let registry = ProgressRegistry::new();
        registry.insert(new_job("j1", "s1"));
        assert!(registry.fail("j1", "entry not found"));
        assert_eq!(registry.get("j1").unwrap().status, JobState::Failed);
    }

    #[test]
    fn unknown_jobs_are_reported() {
        let registry = ProgressRegistry::new();
        assert!(matches!(registry.get("ghost"), Err(Error::JobNotFound(_))));
        assert!(!registry.start("ghost"));
    }

    #[test]
    fn completed_snapshots_are_stable() {
        let registry = ProgressRegistry::new();
        registry.insert(new_job("j1", "s1"));
        registry.start("j1");
        registry.complete("j1", "/downloads/a.mp4");
        let first = registry.get("j1").unwrap();
        for _ in 0..5 {
            assert_eq!(registry.get("j1").unwrap(), first);
        }
    }

    #[test]
    fn eviction_keeps_unfinished_jobs() {
        let registry = ProgressRegistry::new();
        registry.insert(new_job("done", "s1"));
        registry.insert(new_job("running", "s1"));
        registry.insert(new_job("other", "s2"));
        registry.start("done");
        registry.complete("done", "/x");
        registry.start("running");

        assert_eq!(registry.evict_orphaned(|session| session == "s2"), 1);
        assert!(registry.get("done").is_err());
        assert!(registry.get("running").is_ok());
        assert!(registry.get("other").is_ok());
        assert_eq!(registry.len(), 2);
    }
}
