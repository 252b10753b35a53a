use anyhow::{Context, Result};
use indicatif::HumanBytes;
use std::io::Write;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::parse_worker_count;
use crate::downloader::{DownloadReport, Downloader, DownloaderConfig};
use crate::error::DownloadError;
use crate::fetcher::{HttpFetcher, RangeFetcher};
use crate::planner::MAX_WORKERS;
use crate::utils::clear_terminal;

async fn download_once<F: RangeFetcher>(
    downloader: &Downloader<F>,
    url: &str,
    workers: i64,
    shutdown: &CancellationToken,
) -> Result<DownloadReport, DownloadError> {
    let task = tokio::select! {
        _ = shutdown.cancelled() => return Err(DownloadError::Interrupted),
        task = downloader.prepare(url, workers) => task?,
    };
    println!(
        "Total size: {} ({} parts, {} workers)",
        HumanBytes(task.total_size),
        task.parts.len(),
        task.workers
    );
    downloader.download(task, shutdown).await
}

fn print_report(report: &DownloadReport) {
    println!(
        "Saved {} ({}, {} parts) in {:.1?}",
        report.path.display(),
        HumanBytes(report.bytes),
        report.parts,
        report.elapsed
    );
}

async fn ensure_download_dir(config: &DownloaderConfig) -> Result<()> {
    if !config.download_dir.exists() {
        fs::create_dir_all(&config.download_dir)
            .await
            .context("Failed to create download directory")?;
    }
    Ok(())
}

pub async fn run_single_download(
    url: String,
    workers: i64,
    config: DownloaderConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    ensure_download_dir(&config).await?;
    let downloader = Downloader::new(HttpFetcher::new(), config)?;

    let report = download_once(&downloader, &url, workers, &shutdown)
        .await
        .with_context(|| format!("Failed to download {}", url))?;
    print_report(&report);
    Ok(())
}

/// Reads one trimmed line, or `None` on EOF or shutdown.
async fn prompt(
    lines: &mut Lines<BufReader<Stdin>>,
    question: &str,
    shutdown: &CancellationToken,
) -> Result<Option<String>> {
    println!("{}", question);
    std::io::stdout().flush().ok();
    tokio::select! {
        _ = shutdown.cancelled() => Ok(None),
        line = lines.next_line() => Ok(line?.map(|l| l.trim().to_string())),
    }
}

/// Prompts for a URL and a worker count, downloads, and starts over until
/// stdin closes or `shutdown` fires.
pub async fn run_interactive(
    config: DownloaderConfig,
    clear_screen: bool,
    shutdown: CancellationToken,
) -> Result<()> {
    ensure_download_dir(&config).await?;
    let downloader = Downloader::new(HttpFetcher::new(), config)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!();
        let url = match prompt(
            &mut lines,
            "1. Enter a download URL (http/https only, Ctrl+C to quit):",
            &shutdown,
        )
        .await?
        {
            Some(url) if url.is_empty() => continue,
            Some(url) => url,
            None => break,
        };

        let question = format!("2. Enter the maximum number of workers (no more than {}):", MAX_WORKERS);
        let workers = match prompt(&mut lines, &question, &shutdown).await? {
            Some(input) => match parse_worker_count(&input) {
                Some(workers) => workers,
                None => {
                    println!("Invalid input");
                    continue;
                }
            },
            None => break,
        };

        match download_once(&downloader, &url, workers, &shutdown).await {
            Ok(report) => {
                if clear_screen {
                    clear_terminal();
                }
                print_report(&report);
            }
            Err(DownloadError::Interrupted) => break,
            Err(e) => eprintln!("Failed to download {}: {}", url, e),
        }
    }

    info!("Leaving interactive mode");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::mock::MockFetcher;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_during_probe_interrupts() {
        let dirs = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let mut config = DownloaderConfig::new(dirs.0.path().to_path_buf(), dirs.1.path().to_path_buf());
        config.show_progress = false;
        let mut fetcher = MockFetcher::new(vec![0; 10]);
        fetcher.stalled_probe = true;
        let downloader = Downloader::new(fetcher, config).unwrap();

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            download_once(&downloader, "http://example.com/a.bin", 2, &shutdown),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(DownloadError::Interrupted)));
    }
}
