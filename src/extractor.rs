#![forbid(unsafe_code)]

//! Boundary to the external extraction engine.
//!
//! The queue only ever talks to the [`Extractor`] trait. The production
//! implementation shells out to `yt-dlp`; tests plug in scripted fakes. Both
//! calls are blocking and are expected to run on a `spawn_blocking` thread.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{Analysis, FormatOption, FormatSpec, VideoEntry};
use crate::urls::detect_platform;

const STDERR_TAIL_LINES: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const OUTPUT_TITLE_TEMPLATE: &str = "%(title).100s.%(ext)s";
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp", ".tmp"];

/// Everything the engine needs to fetch one entry for one job.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub session_id: &'a str,
    pub job_id: &'a str,
    pub entry: &'a VideoEntry,
    pub format: FormatSpec,
    pub dest_dir: &'a Path,
}

impl FetchRequest<'_> {
    /// Prefix shared by every file this job may create. Unique per job so an
    /// abandoned fetch can never overwrite another job's output.
    pub fn file_prefix(&self) -> String {
        format!("{}_{}_", self.session_id, self.job_id)
    }
}

pub trait Extractor: Send + Sync + 'static {
    /// Describes a URL: a single video or the flat list of a playlist.
    fn analyze(&self, url: &str) -> Result<Analysis>;

    /// Downloads one entry into `request.dest_dir` and returns the final file.
    ///
    /// `progress` is called synchronously on the calling thread with whole
    /// percentages. Implementations must stop promptly once `cancel` fires.
    fn fetch_entry(
        &self,
        request: &FetchRequest<'_>,
        progress: &mut dyn FnMut(u8),
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct YtDlpOptions {
    pub binary: PathBuf,
    pub socket_timeout: Duration,
    pub analyze_timeout: Duration,
}

impl Default for YtDlpOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            socket_timeout: Duration::from_secs(15),
            analyze_timeout: Duration::from_secs(60),
        }
    }
}

/// [`Extractor`] backed by the `yt-dlp` command line tool.
#[derive(Debug, Clone)]
pub struct YtDlp {
    options: YtDlpOptions,
}

impl YtDlp {
    pub fn new(options: YtDlpOptions) -> Self {
        Self { options }
    }

    fn command(&self, url: &str) -> Command {
        let mut command = Command::new(&self.options.binary);
        command
            .arg(url)
            .arg("--no-warnings")
            .arg("--socket-timeout")
            .arg(self.options.socket_timeout.as_secs().max(1).to_string())
            .arg("--retries")
            .arg("3");
        command
    }
}

impl Extractor for YtDlp {
    fn analyze(&self, url: &str) -> Result<Analysis> {
        let mut command = self.command(url);
        command
            .arg("--dump-single-json")
            .arg("--flat-playlist")
            .arg("--skip-download")
            .arg("--no-progress")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command
            .spawn()
            .map_err(|err| Error::Extraction(format!("launching yt-dlp: {err}")))?;
        let output = wait_with_timeout(child, self.options.analyze_timeout)?;

        if !output.success {
            return Err(Error::Extraction(failure_message(
                &output.stderr,
                "yt-dlp could not read this URL",
            )));
        }

        parse_analysis(&output.stdout, url)
    }

    fn fetch_entry(
        &self,
        request: &FetchRequest<'_>,
        progress: &mut dyn FnMut(u8),
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        fs::create_dir_all(request.dest_dir).map_err(|err| {
            Error::Download(format!("creating {}: {err}", request.dest_dir.display()))
        })?;

        let prefix = request.file_prefix();
        let template = request
            .dest_dir
            .join(format!("{prefix}{OUTPUT_TITLE_TEMPLATE}"));

        let mut command = self.command(&request.entry.url);
        command
            .arg("--no-playlist")
            .arg("--newline")
            .arg("--progress")
            .arg("--restrict-filenames")
            .arg("--print")
            .arg("after_move:filepath")
            .arg("-o")
            .arg(template.to_string_lossy().into_owned());
        match request.format.selector() {
            None => {
                command
                    .arg("-f")
                    .arg("bestaudio/best")
                    .arg("-x")
                    .arg("--audio-format")
                    .arg("mp3")
                    .arg("--audio-quality")
                    .arg("192K");
            }
            Some(selector) => {
                command
                    .arg("-f")
                    .arg(selector)
                    .arg("--merge-output-format")
                    .arg(request.format.extension());
            }
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(job_id = request.job_id, url = %request.entry.url, format = %request.format, "spawning yt-dlp");
        let mut child = command
            .spawn()
            .map_err(|err| Error::Download(format!("launching yt-dlp: {err}")))?;

        let stdout = child.stdout.take();
        let stderr_tail = spawn_stderr_collector(child.stderr.take());
        let child = Arc::new(Mutex::new(child));
        let watcher = spawn_cancel_watcher(child.clone(), cancel.clone());

        let mut printed_path: Option<PathBuf> = None;
        if let Some(stdout) = stdout {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if let Some(percent) = parse_progress_line(&line) {
                    progress(percent);
                } else if let Some(path) = printed_output_path(&line, request.dest_dir) {
                    printed_path = Some(path);
                }
            }
        }

        let status = wait_for_exit(&child);
        watcher.finish();
        let stderr = stderr_tail.join().unwrap_or_default();

        if cancel.is_cancelled() {
            return Err(Error::Download("download cancelled".into()));
        }
        let status = status.map_err(|err| Error::Download(format!("waiting for yt-dlp: {err}")))?;
        if !status {
            return Err(Error::Download(failure_message(
                &stderr,
                "yt-dlp exited with an error",
            )));
        }

        printed_path
            .filter(|path| path.is_file())
            .or_else(|| locate_output(request.dest_dir, &prefix))
            .ok_or_else(|| Error::Download("download finished but no output file was found".into()))
    }
}

struct ProcessOutput {
    success: bool,
    stdout: Vec<u8>,
    stderr: Vec<String>,
}

/// Waits for a child while draining both pipes, killing it past `timeout`.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<ProcessOutput> {
    let stdout = child.stdout.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            buffer
        })
    });
    let stderr = spawn_stderr_collector(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let success = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.success(),
            Ok(None) if Instant::now() >= deadline => {
                warn!(timeout_secs = timeout.as_secs(), "yt-dlp analyze timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Extraction(format!(
                    "extraction timed out after {}s",
                    timeout.as_secs()
                )));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => return Err(Error::Extraction(format!("waiting for yt-dlp: {err}"))),
        }
    };

    Ok(ProcessOutput {
        success,
        stdout: stdout
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

struct StderrTail(Option<thread::JoinHandle<Vec<String>>>);

impl StderrTail {
    fn join(self) -> Option<Vec<String>> {
        self.0.and_then(|handle| handle.join().ok())
    }
}

fn spawn_stderr_collector(stderr: Option<std::process::ChildStderr>) -> StderrTail {
    StderrTail(stderr.map(|pipe| {
        thread::spawn(move || {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            for line in BufReader::new(pipe).lines() {
                let Ok(line) = line else { break };
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect()
        })
    }))
}

struct CancelWatcher {
    done: CancellationToken,
    handle: thread::JoinHandle<()>,
}

impl CancelWatcher {
    fn finish(self) {
        self.done.cancel();
        let _ = self.handle.join();
    }
}

/// Kills the child as soon as `cancel` fires; exits once `finish` is called.
fn spawn_cancel_watcher(child: Arc<Mutex<Child>>, cancel: CancellationToken) -> CancelWatcher {
    let done = CancellationToken::new();
    let done_for_thread = done.clone();
    let handle = thread::spawn(move || {
        while !done_for_thread.is_cancelled() {
            if cancel.is_cancelled() {
                let _ = child.lock().kill();
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
    });
    CancelWatcher { done, handle }
}

fn wait_for_exit(child: &Mutex<Child>) -> std::io::Result<bool> {
    loop {
        if let Some(status) = child.lock().try_wait()? {
            return Ok(status.success());
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Picks the most useful stderr line (yt-dlp prefixes fatal ones with
/// `ERROR:`), falling back to the last line or `fallback`.
fn failure_message(stderr: &[String], fallback: &str) -> String {
    stderr
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR"))
        .or_else(|| stderr.iter().rev().find(|line| !line.trim().is_empty()))
        .map(|line| line.trim_start_matches("ERROR:").trim().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

/// Parses `[download]  42.3% of ...` progress lines into whole percentages.
pub fn parse_progress_line(line: &str) -> Option<u8> {
    let rest = line.trim_start().strip_prefix("[download]")?;
    let token = rest.split_whitespace().next()?;
    let value: f64 = token.strip_suffix('%')?.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0).floor() as u8)
}

fn printed_output_path(line: &str, dest_dir: &Path) -> Option<PathBuf> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('[') {
        return None;
    }
    let path = PathBuf::from(trimmed);
    path.starts_with(dest_dir).then_some(path)
}

/// Finds a finished file starting with `prefix`, ignoring partial leftovers.
fn locate_output(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.metadata().map(|meta| meta.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let partial = PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix));
            (name.starts_with(prefix) && !partial).then(|| entry.path())
        })
        .collect();
    candidates.sort();
    candidates.pop()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    thumbnail: Option<String>,
    thumbnails: Vec<RawThumbnail>,
    duration: Option<f64>,
    view_count: Option<u64>,
    webpage_url: Option<String>,
    url: Option<String>,
    formats: Vec<RawFormat>,
    entries: Vec<Option<RawInfo>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawThumbnail {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    resolution: Option<String>,
    height: Option<u64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

fn parse_analysis(stdout: &[u8], source_url: &str) -> Result<Analysis> {
    let info: RawInfo = serde_json::from_slice(stdout)
        .map_err(|err| Error::Extraction(format!("unreadable extractor output: {err}")))?;
    let platform = detect_platform(source_url).label().to_string();

    let is_playlist = matches!(info.kind.as_deref(), Some("playlist" | "multi_video"));
    if is_playlist {
        let title = info.title.clone().unwrap_or_else(|| "Playlist".to_string());
        let entries = info
            .entries
            .into_iter()
            .flatten()
            .map(|entry| build_entry(entry, &platform, source_url))
            .collect();
        return Ok(Analysis {
            title,
            is_playlist: true,
            entries,
        });
    }

    let entry = build_entry(info, &platform, source_url);
    Ok(Analysis {
        title: entry.title.clone(),
        is_playlist: false,
        entries: vec![entry],
    })
}

fn build_entry(info: RawInfo, platform: &str, source_url: &str) -> VideoEntry {
    let thumbnail = info
        .thumbnail
        .or_else(|| info.thumbnails.into_iter().find_map(|thumb| thumb.url))
        .unwrap_or_default();
    VideoEntry {
        id: info.id.unwrap_or_else(short_random_id),
        title: info.title.unwrap_or_else(|| "Unknown Title".to_string()),
        thumbnail,
        duration: info
            .duration
            .filter(|value| value.is_finite() && *value >= 0.0)
            .map(|value| value.round() as u64),
        platform: platform.to_string(),
        views: info.view_count,
        url: info
            .webpage_url
            .or(info.url)
            .unwrap_or_else(|| source_url.to_string()),
        formats: extract_formats(&info.formats),
    }
}

fn short_random_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Reduces yt-dlp's raw format list to one option per resolution.
fn extract_formats(formats: &[RawFormat]) -> Vec<FormatOption> {
    let mut seen = HashSet::new();
    let mut available = Vec::new();
    for format in formats {
        let Some(ext) = format.ext.as_deref() else {
            continue;
        };
        if !matches!(ext, "mp4" | "webm" | "m4a") {
            continue;
        }
        let resolution = format
            .resolution
            .clone()
            .or_else(|| format.height.map(|height| format!("{height}p")))
            .unwrap_or_else(|| "Unknown".to_string());
        if !seen.insert(resolution.clone()) {
            continue;
        }
        let size = format
            .filesize
            .or(format.filesize_approx)
            .map(|bytes| format!("{:.2} MB", bytes / 1024.0 / 1024.0))
            .unwrap_or_else(|| "Unknown".to_string());
        available.push(FormatOption {
            format_id: format.format_id.clone().unwrap_or_default(),
            resolution,
            ext: ext.to_string(),
            size,
        });
    }

    if available.is_empty() {
        default_formats()
    } else {
        available
    }
}

/// Options advertised when the engine did not enumerate any formats.
pub fn default_formats() -> Vec<FormatOption> {
    [
        ("best", "mp4", "1080p"),
        ("good", "mp4", "720p"),
        ("fast", "mp4", "480p"),
        ("audio", "mp3", "Audio"),
    ]
    .into_iter()
    .map(|(format_id, ext, resolution)| FormatOption {
        format_id: format_id.to_string(),
        resolution: resolution.to_string(),
        ext: ext.to_string(),
        size: "Auto".to_string(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_entry(url: &str) -> VideoEntry {
        VideoEntry {
            id: "abc".into(),
            title: "Clip".into(),
            thumbnail: String::new(),
            duration: Some(10),
            platform: "Unknown".into(),
            views: None,
            url: url.into(),
            formats: default_formats(),
        }
    }

    #[test]
    fn parse_progress_line_reads_percentages() {
        assert_eq!(
            parse_progress_line("[download]  42.7% of 10.00MiB at 1.00MiB/s ETA 00:05"),
            Some(42)
        );
        assert_eq!(parse_progress_line("[download] 100% of 10.00MiB"), Some(100));
        assert_eq!(parse_progress_line("[download] Destination: /tmp/x.mp4"), None);
        assert_eq!(parse_progress_line("[info] abc: Downloading"), None);
    }

    #[test]
    fn parse_analysis_single_video() {
        let raw = json!({
            "id": "abc",
            "title": "A clip",
            "thumbnails": [{"url": "https://img/1.jpg"}],
            "duration": 61.4,
            "view_count": 12,
            "webpage_url": "https://example.com/watch?v=abc",
            "formats": [
                {"format_id": "18", "ext": "mp4", "height": 360, "filesize": 1048576.0},
                {"format_id": "22", "ext": "mp4", "resolution": "1280x720"},
                {"format_id": "sb0", "ext": "mhtml"},
                {"format_id": "43", "ext": "webm", "height": 360}
            ]
        });
        let analysis =
            parse_analysis(raw.to_string().as_bytes(), "https://example.com/watch?v=abc").unwrap();
        assert!(!analysis.is_playlist);
        assert_eq!(analysis.title, "A clip");
        let entry = &analysis.entries[0];
        assert_eq!(entry.thumbnail, "https://img/1.jpg");
        assert_eq!(entry.duration, Some(61));
        assert_eq!(entry.platform, "Unknown");
        assert_eq!(entry.formats.len(), 2);
        assert_eq!(entry.formats[0].size, "1.00 MB");
        assert_eq!(entry.formats[1].resolution, "1280x720");
    }

    #[test]
    fn parse_analysis_playlist_skips_null_entries() {
        let raw = json!({
            "_type": "playlist",
            "title": "Mix",
            "entries": [
                {"id": "a", "title": "First", "url": "https://www.youtube.com/watch?v=a"},
                null,
                {"title": "No id"}
            ]
        });
        let analysis = parse_analysis(
            raw.to_string().as_bytes(),
            "https://www.youtube.com/playlist?list=x",
        )
        .unwrap();
        assert!(analysis.is_playlist);
        assert_eq!(analysis.title, "Mix");
        assert_eq!(analysis.entries.len(), 2);
        assert_eq!(analysis.entries[0].platform, "YouTube");
        assert_eq!(analysis.entries[1].id.len(), 8);
        assert_eq!(
            analysis.entries[1].url,
            "https://www.youtube.com/playlist?list=x"
        );
        assert_eq!(analysis.entries[1].formats, default_formats());
    }

    #[test]
    fn parse_analysis_rejects_garbage() {
        let err = parse_analysis(b"not json", "https://example.com").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn locate_output_ignores_partial_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("s_j_clip.mp4.part"), b"partial").unwrap();
        fs::write(dir.path().join("other_j_clip.mp4"), b"other").unwrap();
        assert!(locate_output(dir.path(), "s_j_").is_none());

        fs::write(dir.path().join("s_j_clip.mp4"), b"done").unwrap();
        assert_eq!(
            locate_output(dir.path(), "s_j_").unwrap(),
            dir.path().join("s_j_clip.mp4")
        );
    }

    #[test]
    fn failure_message_prefers_error_lines() {
        let stderr = vec![
            "WARNING: something".to_string(),
            "ERROR: [youtube] abc: Private video".to_string(),
            "trailing noise".to_string(),
        ];
        assert_eq!(failure_message(&stderr, "x"), "[youtube] abc: Private video");
        assert_eq!(failure_message(&[], "fallback"), "fallback");
    }

    #[cfg(unix)]
    fn write_stub(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("yt-dlp-stub");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn stub_extractor(binary: PathBuf) -> YtDlp {
        YtDlp::new(YtDlpOptions {
            binary,
            socket_timeout: Duration::from_secs(1),
            analyze_timeout: Duration::from_secs(5),
        })
    }

    #[cfg(unix)]
    #[test]
    fn fetch_entry_reports_progress_and_returns_file() {
        let dir = tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let stub = write_stub(
            dir.path(),
            r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then shift; out="$1"; fi
  shift
done
target="$(printf '%s' "$out" | cut -d'%' -f1)clip.mp4"
echo "[download]  10.0% of 1.00MiB"
echo "[download]  55.5% of 1.00MiB"
echo "[download] 100% of 1.00MiB"
printf 'data' > "$target"
echo "$target""#,
        );
        let extractor = stub_extractor(stub);
        let entry = sample_entry("https://example.com/watch?v=abc");
        let request = FetchRequest {
            session_id: "sess",
            job_id: "job",
            entry: &entry,
            format: FormatSpec::from_request(None, Some("720p")).unwrap(),
            dest_dir: &downloads,
        };

        let mut seen = Vec::new();
        let path = extractor
            .fetch_entry(&request, &mut |pct| seen.push(pct), &CancellationToken::new())
            .unwrap();

        assert_eq!(seen, vec![10, 55, 100]);
        assert_eq!(path, downloads.join("sess_job_clip.mp4"));
        assert_eq!(fs::read(&path).unwrap(), b"data");
    }

    #[cfg(unix)]
    #[test]
    fn fetch_entry_surfaces_engine_errors() {
        let dir = tempdir().unwrap();
        let stub = write_stub(dir.path(), "echo 'ERROR: Private video' >&2\nexit 1");
        let extractor = stub_extractor(stub);
        let entry = sample_entry("https://example.com/watch?v=abc");
        let request = FetchRequest {
            session_id: "sess",
            job_id: "job",
            entry: &entry,
            format: FormatSpec::Audio,
            dest_dir: dir.path(),
        };

        let err = extractor
            .fetch_entry(&request, &mut |_| {}, &CancellationToken::new())
            .unwrap_err();
        match err {
            Error::Download(message) => assert_eq!(message, "Private video"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn fetch_entry_stops_when_cancelled() {
        let dir = tempdir().unwrap();
        let stub = write_stub(dir.path(), "exec sleep 5");
        let extractor = stub_extractor(stub);
        let entry = sample_entry("https://example.com/watch?v=abc");
        let request = FetchRequest {
            session_id: "sess",
            job_id: "job",
            entry: &entry,
            format: FormatSpec::default(),
            dest_dir: dir.path(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = Instant::now();
        let err = extractor
            .fetch_entry(&request, &mut |_| {}, &cancel)
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn analyze_parses_stub_output() {
        let dir = tempdir().unwrap();
        let stub = write_stub(
            dir.path(),
            r#"echo '{"id":"abc","title":"Stubbed","webpage_url":"https://example.com/watch?v=abc"}'"#,
        );
        let analysis = stub_extractor(stub)
            .analyze("https://example.com/watch?v=abc")
            .unwrap();
        assert_eq!(analysis.entries.len(), 1);
        assert_eq!(analysis.entries[0].title, "Stubbed");
    }

    #[cfg(unix)]
    #[test]
    fn analyze_times_out() {
        let dir = tempdir().unwrap();
        let stub = write_stub(dir.path(), "exec sleep 5");
        let extractor = YtDlp::new(YtDlpOptions {
            binary: stub,
            socket_timeout: Duration::from_secs(1),
            analyze_timeout: Duration::from_millis(300),
        });
        let err = extractor.analyze("https://example.com").unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
