//! Scripted extraction engine for tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::extractor::{Extractor, FetchRequest, default_formats};
use crate::models::{Analysis, VideoEntry};

#[derive(Debug, Clone)]
pub enum FetchBehavior {
    Succeed,
    Fail(String),
    Panic,
}

#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    /// Blocks until opened or cancelled. Returns false on cancellation.
    fn wait(&self, cancel: &CancellationToken) -> bool {
        let mut open = self.open.lock().unwrap();
        while !*open {
            if cancel.is_cancelled() {
                return false;
            }
            open = self
                .changed
                .wait_timeout(open, Duration::from_millis(10))
                .unwrap()
                .0;
        }
        true
    }

    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }
}

#[derive(Default)]
pub struct FakeExtractor {
    analyses: HashMap<String, Analysis>,
    behaviors: HashMap<String, FetchBehavior>,
    gate: Option<Gate>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every fetch until [`FakeExtractor::open_gate`] is called.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Gate::default());
        self
    }

    pub fn behavior(mut self, entry_id: &str, behavior: FetchBehavior) -> Self {
        self.behaviors.insert(entry_id.to_string(), behavior);
        self
    }

    pub fn analysis(mut self, url: &str, analysis: Analysis) -> Self {
        self.analyses.insert(url.to_string(), analysis);
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.open();
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Extractor for FakeExtractor {
    fn analyze(&self, url: &str) -> Result<Analysis> {
        self.analyses
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Extraction(format!("Unsupported URL: {url}")))
    }

    fn fetch_entry(
        &self,
        request: &FetchRequest<'_>,
        progress: &mut dyn FnMut(u8),
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let result = self.fetch_inner(request, progress, cancel);
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl FakeExtractor {
    fn fetch_inner(
        &self,
        request: &FetchRequest<'_>,
        progress: &mut dyn FnMut(u8),
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if let Some(gate) = &self.gate
            && !gate.wait(cancel)
        {
            return Err(Error::Download("download cancelled".into()));
        }
        match self
            .behaviors
            .get(&request.entry.id)
            .cloned()
            .unwrap_or(FetchBehavior::Succeed)
        {
            FetchBehavior::Succeed => {
                for pct in [25, 50, 100] {
                    progress(pct);
                }
                let path = request.dest_dir.join(format!(
                    "{}{}.{}",
                    request.file_prefix(),
                    request.entry.id,
                    request.format.extension()
                ));
                std::fs::write(&path, b"fake media").map_err(|err| Error::Download(err.to_string()))?;
                Ok(path)
            }
            FetchBehavior::Fail(message) => {
                progress(10);
                Err(Error::Download(message))
            }
            FetchBehavior::Panic => panic!("extractor blew up"),
        }
    }
}

pub fn entry(id: &str) -> VideoEntry {
    VideoEntry {
        id: id.to_string(),
        title: format!("Video {id}"),
        thumbnail: format!("https://img.example.com/{id}.jpg"),
        duration: Some(60),
        platform: "YouTube".to_string(),
        views: Some(1_000),
        url: format!("https://www.youtube.com/watch?v={id}"),
        formats: default_formats(),
    }
}

/// Entries `v0..v{count}`.
pub fn entries(count: usize) -> Vec<VideoEntry> {
    (0..count).map(|i| entry(&format!("v{i}"))).collect()
}

pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
