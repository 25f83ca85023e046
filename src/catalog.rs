#![forbid(unsafe_code)]

//! Session catalog: the immutable list of entries discovered by one analyze
//! call, read back page by page.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::VideoEntry;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// One analyze result. The entry list is never mutated after creation; only
/// the last-access instant moves.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub is_playlist: bool,
    pub source_url: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    entries: Vec<VideoEntry>,
    index: HashMap<String, usize>,
    last_access: Mutex<Instant>,
}

impl Session {
    pub fn entry(&self, entry_id: &str) -> Option<&VideoEntry> {
        self.index.get(entry_id).map(|&position| &self.entries[position])
    }

    fn touch(&self, now: Instant) {
        *self.last_access.lock() = now;
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_access.lock())
    }
}

/// Metadata a caller needs to describe a new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub title: String,
    pub is_playlist: bool,
    pub source_url: String,
    pub platform: String,
    pub entries: Vec<VideoEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub videos: Vec<VideoEntry>,
    pub page: usize,
    pub has_more: bool,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub is_playlist: bool,
    pub total_videos: usize,
    pub platform: String,
}

pub struct SessionCatalog {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    ttl: Duration,
}

impl SessionCatalog {
    pub fn new(max_sessions: usize, ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
            ttl,
        }
    }

    /// Stores a new catalog and returns its id. Entry ids are expected to be
    /// unique; on duplicates the first occurrence wins for lookups while the
    /// page order keeps every entry.
    pub fn create_session(&self, new: NewSession) -> Result<String> {
        let mut index = HashMap::with_capacity(new.entries.len());
        for (position, entry) in new.entries.iter().enumerate() {
            index.entry(entry.id.clone()).or_insert(position);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session {
            id: id.clone(),
            title: new.title,
            is_playlist: new.is_playlist,
            source_url: new.source_url,
            platform: new.platform,
            created_at: Utc::now(),
            entries: new.entries,
            index,
            last_access: Mutex::new(Instant::now()),
        });

        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return Err(Error::CatalogFull(sessions.len()));
        }
        sessions.insert(id.clone(), session);
        debug!(session_id = %id, "session created");
        Ok(id)
    }

    /// Looks a session up and refreshes its idle clock.
    pub fn session(&self, session_id: &str) -> Result<Arc<Session>> {
        let session = self
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        session.touch(Instant::now());
        Ok(session)
    }

    /// Membership check for housekeeping. Leaves the idle clock alone.
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn summary(&self, session_id: &str) -> Result<SessionSummary> {
        let session = self.session(session_id)?;
        Ok(SessionSummary {
            session_id: session.id.clone(),
            title: session.title.clone(),
            is_playlist: session.is_playlist,
            total_videos: session.entries.len(),
            platform: session.platform.clone(),
        })
    }

    /// Returns one 1-based page in discovery order. Page 0 reads as page 1 and
    /// the page size is clamped to `1..=MAX_PAGE_SIZE`.
    pub fn get_page(&self, session_id: &str, page: usize, page_size: usize) -> Result<Page> {
        let session = self.session(session_id)?;
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let total = session.entries.len();

        let start = (page - 1).saturating_mul(page_size).min(total);
        let end = start.saturating_add(page_size).min(total);

        Ok(Page {
            videos: session.entries[start..end].to_vec(),
            page,
            has_more: end < total,
            total,
        })
    }

    pub fn get_entry(&self, session_id: &str, entry_id: &str) -> Result<VideoEntry> {
        let session = self.session(session_id)?;
        session
            .entry(entry_id)
            .cloned()
            .ok_or_else(|| Error::EntryNotFound {
                session_id: session_id.to_string(),
                entry_id: entry_id.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every session idle for longer than the TTL and returns their ids.
    pub fn sweep_expired(&self, now: Instant) -> Vec<String> {
        let mut sessions = self.sessions.write();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.idle_for(now) > self.ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired idle sessions");
        }
        expired
    }
}
