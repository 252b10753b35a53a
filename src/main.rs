mod cli;
mod commands;
mod downloader;
mod error;
mod fetcher;
mod logging;
mod merge;
mod planner;
mod pool;
mod progress;
mod state;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::ColorMode;
use crate::downloader::DownloaderConfig;
use crate::planner::MAX_WORKERS;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL to download. Without it, URLs are read interactively
    #[arg(index = 1)]
    url: Option<String>,

    /// Number of concurrent workers (defaults to number of logical CPUs, at most 32)
    #[arg(short = 'c', long = "connections", allow_negative_numbers = true)]
    connections: Option<i64>,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    download_dir: PathBuf,

    /// Parent directory for the scratch directory holding part files
    #[arg(long = "temp-dir")]
    temp_dir: Option<PathBuf>,

    /// Size of each part in MiB
    #[arg(long = "piece-size", default_value_t = 50)]
    piece_size: u64,

    /// Largest file accepted, in GiB
    #[arg(long = "max-size", default_value_t = 10)]
    max_size: u64,

    /// Hide the progress line
    #[arg(long)]
    no_progress: bool,

    /// Clear the terminal after each finished download
    #[arg(long)]
    clear: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, value_enum, default_value = "auto")]
    color: ColorMode,
}

fn main() -> Result<()> {
    let mut args = Args::parse();
    logging::init(args.verbose, args.color)?;

    // Output dir might not exist yet, so we resolve it relative to current dir
    if args.download_dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            args.download_dir = cwd.join(&args.download_dir);
        }
    }

    let mut scratch = tempfile::Builder::new();
    scratch.prefix("rangedl_");
    let scratch = match &args.temp_dir {
        Some(parent) => scratch.tempdir_in(parent),
        None => scratch.tempdir(),
    }
    .context("Failed to create temp directory")?;

    let mut config = DownloaderConfig::new(args.download_dir.clone(), scratch.path().to_path_buf());
    config.piece_size = args.piece_size.saturating_mul(1 << 20);
    config.max_file_size = args.max_size.saturating_mul(1 << 30);
    config.show_progress = !args.no_progress;

    let workers = args
        .connections
        .unwrap_or_else(|| num_cpus::get().min(MAX_WORKERS) as i64);

    let url = args.url.take();
    let clear = args.clear;

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async move {
        let shutdown = CancellationToken::new();
        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, shutting down");
                on_signal.cancel();
            }
        });

        match url {
            Some(url) => commands::run_single_download(url, workers, config, shutdown).await,
            None => commands::run_interactive(config, clear, shutdown).await,
        }
    });
    // Stdin reads run on a blocking thread that never returns on its own.
    rt.shutdown_timeout(Duration::from_millis(100));

    let scratch_path = scratch.path().to_path_buf();
    match scratch.close() {
        Ok(()) => info!("Removed temp directory {}", scratch_path.display()),
        Err(e) => warn!(
            "Failed to remove temp directory {}, please delete it manually: {}",
            scratch_path.display(),
            e
        ),
    }

    result
}
