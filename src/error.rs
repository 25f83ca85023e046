#![forbid(unsafe_code)]

//! Error taxonomy shared by every vidgrab component.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The extraction engine could not describe the URL (unsupported site,
    /// private or removed content, unparseable output).
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A single fetch failed. Recorded on the job, never thrown at callers.
    #[error("download failed: {0}")]
    Download(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("entry {entry_id} not found in session {session_id}")]
    EntryNotFound {
        session_id: String,
        entry_id: String,
    },

    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Transient: the shared queue cannot take the whole batch right now.
    #[error("download queue is full ({pending} pending, limit {limit}); retry later or shrink the batch")]
    QueueFull { pending: usize, limit: usize },

    /// One client called a limited endpoint too often.
    #[error("too many requests; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("session capacity exhausted ({0} live sessions)")]
    CatalogFull(usize),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True for caller mistakes that must not be retried unchanged.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_) | Self::EntryNotFound { .. } | Self::JobNotFound(_)
        )
    }

    /// True for capacity errors where retrying later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::CatalogFull(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_not_found_variants() {
        assert!(Error::SessionNotFound("s".into()).is_not_found());
        assert!(
            Error::EntryNotFound {
                session_id: "s".into(),
                entry_id: "e".into(),
            }
            .is_not_found()
        );
        assert!(Error::JobNotFound("j".into()).is_not_found());
        assert!(!Error::Download("boom".into()).is_not_found());
    }

    #[test]
    fn queue_full_is_transient_and_descriptive() {
        let err = Error::QueueFull {
            pending: 10,
            limit: 8,
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("10 pending"));
    }

    #[test]
    fn rate_limited_names_the_wait() {
        let err = Error::RateLimited {
            retry_after_secs: 6,
        };
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "too many requests; retry in 6s");
    }
}
