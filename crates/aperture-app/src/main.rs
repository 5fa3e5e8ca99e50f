//! Aperture application binary - composition root.
//!
//! Each subcommand runs one pipeline stage in this process; `run` wires all
//! three together over the configured TCP links for a single-machine
//! deployment. The normal topology is one process per stage:
//!
//! ```text
//! aperture capture  --(tcp)-->  aperture extract  --(tcp)-->  aperture store
//! ```
//!
//! Shutdown is cooperative: ctrl-c cancels the shared token, stages finish
//! their current iteration, and a stage parked on a blocking receive is
//! given a short grace period before the process exits.

mod cli;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use aperture_capture::CaptureStage;
use aperture_core::{ApertureConfig, CancelToken, Result};
use aperture_extract::{ExtractStage, FastDetector};
use aperture_store::{Database, FileStore, StoreStage};
use aperture_transport::{PullSocket, PushSocket};

use cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_path = args.resolve_config_path();
    let config = ApertureConfig::load_or_default(&config_path);

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.general.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    info!("Starting Aperture v{}", env!("CARGO_PKG_VERSION"));
    info!(path = %config_path.display(), "Configuration resolved");

    let cancel = CancelToken::new();
    match args.command {
        Command::Capture => run_capture(&config, cancel).await?,
        Command::Extract => run_extract(&config, cancel).await?,
        Command::Store => run_store(&config, cancel).await?,
        Command::Run => run_all(&config, cancel).await?,
    }

    Ok(())
}

async fn run_capture(config: &ApertureConfig, cancel: CancelToken) -> Result<()> {
    let push = PushSocket::bind(&config.capture.endpoint).await?;
    info!(endpoint = %push.local_addr(), "capture push link bound");

    let stage = CaptureStage::new(config.capture.clone(), cancel.clone());
    run_with_shutdown(stage.run(&push), cancel).await
}

async fn run_extract(config: &ApertureConfig, cancel: CancelToken) -> Result<()> {
    let mut input = PullSocket::connect(&config.extract.pull_endpoint);
    let output = PushSocket::bind(&config.extract.push_endpoint).await?;
    info!(
        pull = %config.extract.pull_endpoint,
        push = %output.local_addr(),
        "extraction links ready"
    );

    let detector =
        FastDetector::new(config.extract.fast_threshold, config.extract.max_keypoints);
    let stage = ExtractStage::new(detector, cancel.clone());
    run_with_shutdown(stage.run(&mut input, &output), cancel).await
}

async fn run_store(config: &ApertureConfig, cancel: CancelToken) -> Result<()> {
    let data_dir = resolve_data_dir(&config.general.data_dir);
    let db = Arc::new(Database::new(&resolve_under(&data_dir, &config.store.database))?);
    let files = FileStore::new(&resolve_under(&data_dir, &config.store.image_dir))?;

    let mut input = PullSocket::connect(&config.store.pull_endpoint);
    let stage = StoreStage::new(db, files, cancel.clone());
    run_with_shutdown(stage.run(&mut input), cancel).await
}

/// All three stages in one process, still talking over the real TCP links,
/// so the on-the-wire behavior matches the per-process deployment.
async fn run_all(config: &ApertureConfig, cancel: CancelToken) -> Result<()> {
    let capture_push = PushSocket::bind(&config.capture.endpoint).await?;
    let extract_push = PushSocket::bind(&config.extract.push_endpoint).await?;
    let mut extract_pull = PullSocket::connect(&config.extract.pull_endpoint);
    let mut store_pull = PullSocket::connect(&config.store.pull_endpoint);

    let data_dir = resolve_data_dir(&config.general.data_dir);
    let db = Arc::new(Database::new(&resolve_under(&data_dir, &config.store.database))?);
    let files = FileStore::new(&resolve_under(&data_dir, &config.store.image_dir))?;

    let detector =
        FastDetector::new(config.extract.fast_threshold, config.extract.max_keypoints);
    let extract = ExtractStage::new(detector, cancel.clone());
    let store = StoreStage::new(db, files, cancel.clone());
    let capture = CaptureStage::new(config.capture.clone(), cancel.clone());

    let extract_task =
        tokio::spawn(async move { extract.run(&mut extract_pull, &extract_push).await });
    let store_task = tokio::spawn(async move { store.run(&mut store_pull).await });
    let capture_task = tokio::spawn(async move { capture.run(&capture_push).await });

    let _ = tokio::signal::ctrl_c().await;
    cancel.cancel();
    info!("shutdown requested; finishing current iterations");

    // Capture wakes from its pacing sleep and observes the token; the two
    // receivers may be parked on a blocking recv and get aborted after the
    // grace period.
    let _ = tokio::time::timeout(Duration::from_secs(2), capture_task).await;
    extract_task.abort();
    store_task.abort();
    Ok(())
}

/// Drive a stage future, turning ctrl-c into cooperative cancellation with
/// a bounded grace period for the current iteration.
async fn run_with_shutdown<F>(stage: F, cancel: CancelToken) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::pin!(stage);
    tokio::select! {
        res = &mut stage => res,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            info!("shutdown requested; finishing current iteration");
            match tokio::time::timeout(Duration::from_secs(2), &mut stage).await {
                Ok(res) => res,
                Err(_) => {
                    info!("stage parked on receive; exiting");
                    Ok(())
                }
            }
        }
    }
}

/// Expand `~` to the home directory in a configured path.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

/// Resolve a configured path under the data directory unless absolute.
fn resolve_under(data_dir: &Path, configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}
