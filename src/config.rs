#![forbid(unsafe_code)]

//! Runtime settings. Every value is resolved as CLI override, then process
//! environment, then the `.env` file, then the built-in default.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::extractor::YtDlpOptions;
use crate::queue::PoolConfig;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_DOWNLOAD_DIR: &str = "/tmp/downloads";
pub const DEFAULT_YTDLP_PATH: &str = "yt-dlp";
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;
pub const DEFAULT_MAX_QUEUE_LEN: usize = 1000;
pub const DEFAULT_MAX_PLAYLIST_SIZE: usize = 1000;
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
pub const DEFAULT_INTER_JOB_DELAY_MS: u64 = 0;
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_ANALYZE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_ESTIMATED_JOB_SECS: u64 = 30;
pub const DEFAULT_ANALYZE_RATE_PER_MINUTE: u32 = 10;
pub const DEFAULT_DOWNLOAD_RATE_PER_MINUTE: u32 = 30;

/// Public URL prefix of finished files.
pub const DOWNLOADS_ROUTE: &str = "/downloads";

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub download_dir: PathBuf,
    pub ytdlp_path: PathBuf,
    pub max_concurrent_downloads: usize,
    pub max_queue_len: usize,
    pub max_playlist_size: usize,
    pub max_sessions: usize,
    pub session_ttl: Duration,
    pub inter_job_delay: Duration,
    pub subscriber_buffer: usize,
    pub socket_timeout: Duration,
    pub analyze_timeout: Duration,
    pub estimated_job_duration: Duration,
    /// Analyze calls per client IP and minute. Zero disables the limit.
    pub analyze_rate_per_minute: u32,
    /// Download submissions per client IP and minute. Zero disables the limit.
    pub download_rate_per_minute: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            ytdlp_path: PathBuf::from(DEFAULT_YTDLP_PATH),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            max_playlist_size: DEFAULT_MAX_PLAYLIST_SIZE,
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            inter_job_delay: Duration::from_millis(DEFAULT_INTER_JOB_DELAY_MS),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            socket_timeout: Duration::from_secs(DEFAULT_SOCKET_TIMEOUT_SECS),
            analyze_timeout: Duration::from_secs(DEFAULT_ANALYZE_TIMEOUT_SECS),
            estimated_job_duration: Duration::from_secs(DEFAULT_ESTIMATED_JOB_SECS),
            analyze_rate_per_minute: DEFAULT_ANALYZE_RATE_PER_MINUTE,
            download_rate_per_minute: DEFAULT_DOWNLOAD_RATE_PER_MINUTE,
        }
    }
}

impl Settings {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.max_concurrent_downloads,
            max_queue_len: self.max_queue_len,
            inter_job_delay: self.inter_job_delay,
            estimated_job_duration: self.estimated_job_duration,
            download_dir: self.download_dir.clone(),
            public_prefix: DOWNLOADS_ROUTE.to_string(),
        }
    }

    pub fn ytdlp_options(&self) -> YtDlpOptions {
        YtDlpOptions {
            binary: self.ytdlp_path.clone(),
            socket_timeout: self.socket_timeout,
            analyze_timeout: self.analyze_timeout,
        }
    }
}

/// Values supplied on the command line. They win over everything else.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub download_dir: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub max_concurrent_downloads: Option<usize>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_settings_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Settings {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Settings {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);
    let number = |key: &str, default: u64| lookup_parsed(key, file_vars, &env_lookup).unwrap_or(default);
    let count = |key: &str, default: usize| lookup_parsed(key, file_vars, &env_lookup).unwrap_or(default);

    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("VIDGRAB_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup_parsed("VIDGRAB_PORT", file_vars, &env_lookup))
        .unwrap_or(DEFAULT_PORT);
    let download_dir = overrides
        .download_dir
        .or_else(|| lookup("DOWNLOAD_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));
    let ytdlp_path = overrides
        .ytdlp_path
        .or_else(|| lookup("YTDLP_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_PATH));
    let max_concurrent_downloads = overrides
        .max_concurrent_downloads
        .unwrap_or_else(|| count("MAX_CONCURRENT_DOWNLOADS", DEFAULT_MAX_CONCURRENT_DOWNLOADS))
        .max(1);

    Settings {
        host,
        port,
        download_dir,
        ytdlp_path,
        max_concurrent_downloads,
        max_queue_len: count("MAX_QUEUE_LEN", DEFAULT_MAX_QUEUE_LEN),
        max_playlist_size: count("MAX_PLAYLIST_SIZE", DEFAULT_MAX_PLAYLIST_SIZE).max(1),
        max_sessions: count("MAX_SESSIONS", DEFAULT_MAX_SESSIONS).max(1),
        session_ttl: Duration::from_secs(number("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)),
        inter_job_delay: Duration::from_millis(number(
            "INTER_JOB_DELAY_MS",
            DEFAULT_INTER_JOB_DELAY_MS,
        )),
        subscriber_buffer: count("SUBSCRIBER_BUFFER", DEFAULT_SUBSCRIBER_BUFFER).max(1),
        socket_timeout: Duration::from_secs(number(
            "SOCKET_TIMEOUT_SECS",
            DEFAULT_SOCKET_TIMEOUT_SECS,
        )),
        analyze_timeout: Duration::from_secs(number(
            "ANALYZE_TIMEOUT_SECS",
            DEFAULT_ANALYZE_TIMEOUT_SECS,
        )),
        estimated_job_duration: Duration::from_secs(number(
            "ESTIMATED_JOB_SECS",
            DEFAULT_ESTIMATED_JOB_SECS,
        )),
        analyze_rate_per_minute: lookup_parsed("ANALYZE_RATE_LIMIT_PER_MINUTE", file_vars, &env_lookup)
            .unwrap_or(DEFAULT_ANALYZE_RATE_PER_MINUTE),
        download_rate_per_minute: lookup_parsed("DOWNLOAD_RATE_LIMIT_PER_MINUTE", file_vars, &env_lookup)
            .unwrap_or(DEFAULT_DOWNLOAD_RATE_PER_MINUTE),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

/// Unparseable values read as unset so the default applies.
fn lookup_parsed<T: FromStr>(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<T> {
    lookup_value(key, file_vars, env_lookup).and_then(|value| value.trim().parse().ok())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> Settings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_settings(&vars, |_| None)
    }

    #[test]
    fn empty_sources_yield_defaults() {
        let settings = build_settings(&HashMap::new(), |_| None);
        assert_eq!(settings.host, DEFAULT_HOST);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.download_dir, PathBuf::from(DEFAULT_DOWNLOAD_DIR));
        assert_eq!(settings.max_concurrent_downloads, 4);
        assert_eq!(settings.max_queue_len, 1000);
        assert_eq!(settings.session_ttl, Duration::from_secs(3600));
        assert_eq!(settings.inter_job_delay, Duration::ZERO);
        assert_eq!(settings.subscriber_buffer, 64);
        assert_eq!(settings.analyze_rate_per_minute, 10);
        assert_eq!(settings.download_rate_per_minute, 30);
    }

    #[test]
    fn rate_limits_are_configurable_and_can_be_disabled() {
        let settings = settings_from(
            "ANALYZE_RATE_LIMIT_PER_MINUTE=0\nDOWNLOAD_RATE_LIMIT_PER_MINUTE=120\n",
        );
        assert_eq!(settings.analyze_rate_per_minute, 0);
        assert_eq!(settings.download_rate_per_minute, 120);

        let fallback = settings_from("ANALYZE_RATE_LIMIT_PER_MINUTE=lots\n");
        assert_eq!(fallback.analyze_rate_per_minute, DEFAULT_ANALYZE_RATE_PER_MINUTE);
    }

    #[test]
    fn file_values_are_read() {
        let settings = settings_from(
            "VIDGRAB_PORT=\"9090\"\nDOWNLOAD_DIR=/srv/dl\nMAX_CONCURRENT_DOWNLOADS=8\nINTER_JOB_DELAY_MS=250\n",
        );
        assert_eq!(settings.port, 9090);
        assert_eq!(settings.download_dir, PathBuf::from("/srv/dl"));
        assert_eq!(settings.max_concurrent_downloads, 8);
        assert_eq!(settings.inter_job_delay, Duration::from_millis(250));

        let pool = settings.pool_config();
        assert_eq!(pool.workers, 8);
        assert_eq!(pool.public_prefix, DOWNLOADS_ROUTE);
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config("VIDGRAB_HOST=file-host\nMAX_QUEUE_LEN=5\n").path())
            .unwrap();
        let settings = build_settings(&vars, |key| {
            if key == "VIDGRAB_HOST" {
                Some("0.0.0.0".to_string())
            } else {
                None
            }
        });
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.max_queue_len, 5);
    }

    #[test]
    fn overrides_win_over_everything() {
        let mut vars = HashMap::new();
        vars.insert("VIDGRAB_PORT".to_string(), "7000".to_string());
        vars.insert("YTDLP_PATH".to_string(), "/file/yt-dlp".to_string());
        vars.insert("MAX_CONCURRENT_DOWNLOADS".to_string(), "2".to_string());

        let settings = build_settings_with_overrides(
            &vars,
            |key| (key == "VIDGRAB_PORT").then(|| "8001".to_string()),
            SettingsOverrides {
                port: Some(9000),
                ytdlp_path: Some(PathBuf::from("/opt/yt-dlp")),
                max_concurrent_downloads: Some(6),
                ..SettingsOverrides::default()
            },
        );
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.ytdlp_path, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(settings.max_concurrent_downloads, 6);
        assert_eq!(settings.ytdlp_options().binary, PathBuf::from("/opt/yt-dlp"));
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let settings = build_settings_with_overrides(
            &HashMap::new(),
            |_| None,
            SettingsOverrides {
                host: Some("   ".into()),
                ..SettingsOverrides::default()
            },
        );
        assert_eq!(settings.host, DEFAULT_HOST);
    }

    #[test]
    fn invalid_numbers_fall_back_and_zero_workers_clamp() {
        let settings = settings_from(
            "VIDGRAB_PORT=nope\nMAX_CONCURRENT_DOWNLOADS=0\nSESSION_TTL_SECS=-5\nSUBSCRIBER_BUFFER=0\n",
        );
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.max_concurrent_downloads, 1);
        assert_eq!(
            settings.session_ttl,
            Duration::from_secs(DEFAULT_SESSION_TTL_SECS)
        );
        assert_eq!(settings.subscriber_buffer, 1);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export DOWNLOAD_DIR="/media"
            YTDLP_PATH='/usr/local/bin/yt-dlp'
            VIDGRAB_HOST =  "0.0.0.0"
            VIDGRAB_PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("DOWNLOAD_DIR").unwrap(), "/media");
        assert_eq!(vars.get("YTDLP_PATH").unwrap(), "/usr/local/bin/yt-dlp");
        assert_eq!(vars.get("VIDGRAB_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("VIDGRAB_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn resolve_settings_reads_given_env_file() {
        let cfg = make_config("MAX_PLAYLIST_SIZE=25\n");
        let settings = resolve_settings(SettingsOverrides {
            env_path: Some(cfg.path().to_path_buf()),
            ..SettingsOverrides::default()
        })
        .unwrap();
        assert_eq!(settings.max_playlist_size, 25);
    }
}
