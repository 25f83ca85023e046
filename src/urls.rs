#![forbid(unsafe_code)]

//! URL cleanup and platform labelling applied before anything reaches the
//! extraction engine.

use serde::Serialize;
use url::Url;

use crate::error::{Error, Result};

const TRACKING_PARAMS: &[&str] = &[
    "igsh",
    "igshid",
    "ref",
    "feature",
    "is_from_webapp",
    "share_id",
    "locale",
];

const MOBILE_HOSTS: &[(&str, &str)] = &[
    ("m.youtube.com", "www.youtube.com"),
    ("m.facebook.com", "www.facebook.com"),
    ("web.facebook.com", "www.facebook.com"),
    ("mobile.twitter.com", "twitter.com"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Platform {
    YouTube,
    TikTok,
    Instagram,
    Facebook,
    Twitter,
    Vimeo,
    Reddit,
    Twitch,
    Dailymotion,
    Snapchat,
    Likee,
    Bilibili,
    VK,
    Unknown,
}

impl Platform {
    pub fn label(self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::TikTok => "TikTok",
            Self::Instagram => "Instagram",
            Self::Facebook => "Facebook",
            Self::Twitter => "Twitter",
            Self::Vimeo => "Vimeo",
            Self::Reddit => "Reddit",
            Self::Twitch => "Twitch",
            Self::Dailymotion => "Dailymotion",
            Self::Snapchat => "Snapchat",
            Self::Likee => "Likee",
            Self::Bilibili => "Bilibili",
            Self::VK => "VK",
            Self::Unknown => "Unknown",
        }
    }

    fn domains(self) -> &'static [&'static str] {
        match self {
            Self::YouTube => &["youtube.com", "youtu.be", "youtube-nocookie.com"],
            Self::TikTok => &["tiktok.com"],
            Self::Instagram => &["instagram.com", "instagr.am"],
            Self::Facebook => &["facebook.com", "fb.watch", "fb.com"],
            Self::Twitter => &["twitter.com", "x.com", "t.co", "fxtwitter.com"],
            Self::Vimeo => &["vimeo.com"],
            Self::Reddit => &["reddit.com", "redd.it"],
            Self::Twitch => &["twitch.tv"],
            Self::Dailymotion => &["dailymotion.com", "dai.ly"],
            Self::Snapchat => &["snapchat.com", "snap.com"],
            Self::Likee => &["likee.video", "likee.com"],
            Self::Bilibili => &["bilibili.com", "b23.tv"],
            Self::VK => &["vk.com", "vkvideo.ru"],
            Self::Unknown => &[],
        }
    }
}

const PLATFORMS: &[Platform] = &[
    Platform::YouTube,
    Platform::TikTok,
    Platform::Instagram,
    Platform::Facebook,
    Platform::Twitter,
    Platform::Vimeo,
    Platform::Reddit,
    Platform::Twitch,
    Platform::Dailymotion,
    Platform::Snapchat,
    Platform::Likee,
    Platform::Bilibili,
    Platform::VK,
];

/// Rejects blank input and anything that is not an absolute http(s) URL with
/// a host.
pub fn validate_submitted_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidRequest("URL cannot be empty".into()));
    }
    let lower = trimmed.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(Error::InvalidRequest(
            "URL must start with http:// or https://".into(),
        ));
    }
    let url = Url::parse(trimmed)
        .map_err(|err| Error::InvalidRequest(format!("invalid URL: {err}")))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidRequest("URL has no host".into()));
    }
    Ok(url)
}

/// Labels a URL by its host. A platform matches its own domains and any of
/// their subdomains, never a look-alike such as `nottiktok.com`.
pub fn detect_platform(url: &str) -> Platform {
    let Some(host) = Url::parse(url.trim())
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
    else {
        return Platform::Unknown;
    };
    PLATFORMS
        .iter()
        .copied()
        .find(|platform| {
            platform
                .domains()
                .iter()
                .any(|domain| host_matches(&host, domain))
        })
        .unwrap_or(Platform::Unknown)
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Canonicalizes a submitted URL: https scheme, no credentials, desktop hosts
/// instead of mobile ones, no tracking parameters, no trailing slash.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = validate_submitted_url(raw)?;
    let _ = url.set_scheme("https");
    let _ = url.set_username("");
    let _ = url.set_password(None);

    let desktop = url.host_str().and_then(|host| {
        MOBILE_HOSTS
            .iter()
            .find(|(mobile, _)| host.eq_ignore_ascii_case(mobile))
            .map(|(_, desktop)| *desktop)
    });
    if let Some(desktop) = desktop {
        url.set_host(Some(desktop))
            .map_err(|err| Error::InvalidRequest(format!("invalid URL: {err}")))?;
    }

    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let kept: Vec<&(String, String)> = pairs
        .iter()
        .filter(|(key, _)| !is_tracking_param(key))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else if kept.len() < pairs.len() {
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept.iter().map(|(key, value)| (key.as_str(), value.as_str())));
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        url.set_path(if trimmed.is_empty() { "/" } else { &trimmed });
    }

    Ok(url.into())
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}
