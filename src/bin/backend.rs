#![forbid(unsafe_code)]

//! API server: analyze URLs, queue downloads and push progress to clients.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use vidgrab::{
    api,
    config::{DEFAULT_ENV_PATH, SettingsOverrides, resolve_settings},
    extractor::YtDlp,
    service::DownloadService,
};

/// How often idle sessions and finished jobs are collected.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "vidgrab", version, about = "Video download orchestration server")]
struct BackendArgs {
    /// Interface to listen on (overrides VIDGRAB_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides VIDGRAB_PORT).
    #[arg(long, short)]
    port: Option<u16>,
    /// Directory finished files are written to (overrides DOWNLOAD_DIR).
    #[arg(long)]
    download_dir: Option<PathBuf>,
    /// Path to the yt-dlp executable (overrides YTDLP_PATH).
    #[arg(long)]
    ytdlp_path: Option<PathBuf>,
    /// Number of concurrent downloads (overrides MAX_CONCURRENT_DOWNLOADS).
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long, default_value = DEFAULT_ENV_PATH)]
    env_file: PathBuf,
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl BackendArgs {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            host: self.host.clone(),
            port: self.port,
            download_dir: self.download_dir.clone(),
            ytdlp_path: self.ytdlp_path.clone(),
            max_concurrent_downloads: self.workers,
            env_path: Some(self.env_file.clone()),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "vidgrab=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BackendArgs::parse();
    init_tracing(args.log_format);

    let settings = resolve_settings(args.overrides()).context("loading settings")?;
    let host: IpAddr = settings
        .host
        .parse()
        .with_context(|| format!("invalid listen host {}", settings.host))?;
    let addr = SocketAddr::new(host, settings.port);

    let extractor = Arc::new(YtDlp::new(settings.ytdlp_options()));
    let service = DownloadService::start(settings.clone(), extractor)
        .context("starting download service")?;
    let sweeper = service.spawn_sweeper(SWEEP_INTERVAL);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        %addr,
        workers = settings.max_concurrent_downloads,
        download_dir = %settings.download_dir.display(),
        ytdlp = %settings.ytdlp_path.display(),
        "API server listening"
    );

    let app = api::router(service.clone());
    let stopping = service.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        // Ends push connections so the graceful drain can finish.
        stopping.shutdown();
    })
    .await
    .context("running API server")?;

    if let Err(err) = sweeper.await {
        error!(error = %err, "sweeper task failed");
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still terminates the
    // process if the handler cannot be installed.
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}
