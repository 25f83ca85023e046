#![forbid(unsafe_code)]

//! Plain data shared between the catalog, the queue and the HTTP layer.
//!
//! Everything here is serialized with camelCase keys because the same structs
//! are returned verbatim by the API.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One downloadable rendition advertised for an entry (e.g. 720p mp4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatOption {
    pub format_id: String,
    pub resolution: String,
    pub ext: String,
    /// Human readable size such as `"12.5 MB"`, `"Auto"` or `"Unknown"`.
    pub size: String,
}

/// One video discovered by an analyze call. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoEntry {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    /// Page URL handed back to the extraction engine when fetching.
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<FormatOption>,
}

/// Result of asking the extraction engine about a URL.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub title: String,
    pub is_playlist: bool,
    pub entries: Vec<VideoEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
    Mkv,
}

impl Container {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
        }
    }
}

/// What the caller asked to receive for every entry of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FormatSpec {
    Audio,
    Video {
        /// Maximum frame height; `None` means best available.
        max_height: Option<u32>,
        container: Container,
    },
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self::Video {
            max_height: None,
            container: Container::Mp4,
        }
    }
}

impl FormatSpec {
    /// Builds a spec from the loosely typed `format` / `quality` request
    /// fields. Quality tokens keep only their digits, so `"720p"` and `"720"`
    /// are equivalent; `"best"` or an empty token removes the cap.
    pub fn from_request(format: Option<&str>, quality: Option<&str>) -> Result<Self> {
        let format = format.map(|value| value.trim().to_ascii_lowercase());
        let container = match format.as_deref() {
            None | Some("") | Some("best") | Some("video") | Some("mp4") => Container::Mp4,
            Some("webm") => Container::Webm,
            Some("mkv") => Container::Mkv,
            Some("audio") | Some("mp3") => return Ok(Self::Audio),
            Some(other) => {
                return Err(Error::InvalidRequest(format!("unsupported format: {other}")));
            }
        };

        let max_height = match quality.map(str::trim) {
            None | Some("") => None,
            Some(token) if token.eq_ignore_ascii_case("best") => None,
            Some(token) => {
                let digits: String = token.chars().filter(char::is_ascii_digit).collect();
                let height = digits
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidRequest(format!("unsupported quality: {token}")))?;
                Some(height)
            }
        };

        Ok(Self::Video {
            max_height,
            container,
        })
    }

    /// yt-dlp `-f` selector for video specs; `None` for audio extraction.
    pub fn selector(&self) -> Option<String> {
        match self {
            Self::Audio => None,
            Self::Video {
                max_height: Some(height),
                ..
            } => Some(format!(
                "bestvideo[height<={height}]+bestaudio/best[height<={height}]/best"
            )),
            Self::Video {
                max_height: None, ..
            } => Some("bestvideo+bestaudio/best".to_string()),
        }
    }

    /// Extension of the file the engine is expected to produce.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Audio => "mp3",
            Self::Video { container, .. } => container.as_str(),
        }
    }
}

impl fmt::Display for FormatSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio/mp3"),
            Self::Video {
                max_height: Some(height),
                container,
            } => write!(f, "{height}p/{}", container.as_str()),
            Self::Video {
                max_height: None,
                container,
            } => write!(f, "best/{}", container.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Snapshot of one job as seen by pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub session_id: String,
    pub video_id: String,
    pub status: JobState,
    pub progress: u8,
    pub position: usize,
    pub format: FormatSpec,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Push notification delivered to every subscriber of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Event {
    Progress {
        job_id: String,
        video_id: String,
        progress: u8,
    },
    Complete {
        job_id: String,
        video_id: String,
        file_path: String,
    },
    Error {
        job_id: String,
        video_id: String,
        error: String,
    },
}
