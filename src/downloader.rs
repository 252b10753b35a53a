use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{DownloadError, ProbeError, TransferError};
use crate::fetcher::RangeFetcher;
use crate::merge::{merge_parts, remove_finished};
use crate::planner::{check_worker_count, plan_parts, resolve_workers, MAX_FILE_SIZE, PIECE_SIZE};
use crate::pool::{dispatch, run_worker, PartQueue, WorkerContext, WorkerOutcome};
use crate::progress::{progress_bar, report_progress};
use crate::state::{DownloadTask, Part};
use crate::utils::file_name_from_url;

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub download_dir: PathBuf,
    /// Scratch directory for part files.
    pub temp_dir: PathBuf,
    pub piece_size: u64,
    pub max_file_size: u64,
    pub show_progress: bool,
}

impl DownloaderConfig {
    pub fn new(download_dir: PathBuf, temp_dir: PathBuf) -> Self {
        Self {
            download_dir,
            temp_dir,
            piece_size: PIECE_SIZE,
            max_file_size: MAX_FILE_SIZE,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub path: PathBuf,
    pub bytes: u64,
    pub parts: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub(crate) enum Verdict {
    Succeeded,
    Failed { part_id: usize, error: TransferError },
    Interrupted,
    WorkersLost,
}

/// Tallies worker outcomes until the download is settled: every part
/// finished, or every worker has stopped.
#[derive(Debug)]
pub(crate) struct Completion {
    total_parts: usize,
    workers: usize,
    succeeded: usize,
    finished_bytes: u64,
    stopped: usize,
    lost: usize,
    failure: Option<(usize, TransferError)>,
}

impl Completion {
    pub(crate) fn new(total_parts: usize, workers: usize) -> Self {
        Self {
            total_parts,
            workers,
            succeeded: 0,
            finished_bytes: 0,
            stopped: 0,
            lost: 0,
            failure: None,
        }
    }

    pub(crate) fn record(&mut self, outcome: WorkerOutcome, parts: &mut [Part]) {
        match outcome {
            WorkerOutcome::Finished { worker, part_id } => {
                debug!("Part {} finished by worker {}", part_id, worker);
                if let Some(part) = parts.iter_mut().find(|p| p.id == part_id) {
                    part.finished = true;
                    self.finished_bytes += part.size();
                }
                self.succeeded += 1;
            }
            WorkerOutcome::Failed { worker, part_id, error } => {
                self.stopped += 1;
                if self.failure.is_none() {
                    error!("Part {} failed, cancelling download: {}", part_id, error);
                    self.failure = Some((part_id, error));
                } else {
                    debug!("Worker {} also failed on part {}: {}", worker, part_id, error);
                }
            }
            WorkerOutcome::Stopped { worker } => {
                debug!("Worker {} acknowledged cancellation", worker);
                self.stopped += 1;
            }
            WorkerOutcome::Lost { worker } => {
                error!("Worker {} died without reporting, cancelling download", worker);
                self.stopped += 1;
                self.lost += 1;
            }
        }
    }

    /// A failed part or a lost worker means the remaining parts cannot all land.
    pub(crate) fn should_cancel(&self) -> bool {
        self.failure.is_some() || self.lost > 0
    }

    /// Sum of the sizes of parts recorded as finished.
    pub(crate) fn finished_bytes(&self) -> u64 {
        self.finished_bytes
    }

    pub(crate) fn is_settled(&self) -> bool {
        let all_finished = self.failure.is_none() && self.succeeded == self.total_parts;
        all_finished || self.stopped >= self.workers
    }

    pub(crate) fn into_verdict(self) -> Verdict {
        match self.failure {
            Some((part_id, error)) => Verdict::Failed { part_id, error },
            None if self.succeeded == self.total_parts => Verdict::Succeeded,
            None if self.lost == 0 && self.stopped >= self.workers => Verdict::Interrupted,
            None => Verdict::WorkersLost,
        }
    }
}

pub struct Downloader<F> {
    fetcher: Arc<F>,
    config: DownloaderConfig,
}

impl<F: RangeFetcher> Downloader<F> {
    pub fn new(fetcher: F, config: DownloaderConfig) -> Result<Self, DownloadError> {
        if config.piece_size == 0 {
            return Err(DownloadError::InvalidConfig("piece size must be greater than zero".into()));
        }
        Ok(Self { fetcher: Arc::new(fetcher), config })
    }

    /// Probes `url` and plans the parts. Nothing is downloaded yet.
    pub async fn prepare(&self, url: &str, workers: i64) -> Result<DownloadTask, DownloadError> {
        check_worker_count(workers)?;

        let url = Url::parse(url.trim()).map_err(ProbeError::from)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProbeError::UnsupportedProtocol(url.scheme().to_string()).into());
        }

        let info = self.fetcher.probe(&url).await?;
        if info.size > self.config.max_file_size {
            return Err(ProbeError::TooLarge { size: info.size, limit: self.config.max_file_size }.into());
        }
        let workers = resolve_workers(workers, info.supports_ranges)?;

        let file_name = file_name_from_url(&url);
        let parts = plan_parts(
            info.size,
            self.config.piece_size,
            info.supports_ranges,
            &self.config.temp_dir,
            &file_name,
        );
        info!(
            "{}: {} MiB in {} parts, {} workers",
            file_name,
            info.size >> 20,
            parts.len(),
            workers
        );

        Ok(DownloadTask {
            destination: self.config.download_dir.join(&file_name),
            url,
            file_name,
            total_size: info.size,
            workers,
            supports_ranges: info.supports_ranges,
            parts,
            downloaded: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Runs one download attempt. `shutdown` lets the caller abort it; the
    /// task is consumed either way.
    pub async fn download(
        &self,
        mut task: DownloadTask,
        shutdown: &CancellationToken,
    ) -> Result<DownloadReport, DownloadError> {
        let started = Instant::now();
        let cancel = shutdown.child_token();

        let (part_tx, part_rx) = mpsc::channel::<Part>(task.workers.max(1));
        let queue: PartQueue = Arc::new(Mutex::new(part_rx));
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

        let mut tasks = JoinSet::new();
        for worker in 0..task.workers {
            let ctx = WorkerContext {
                fetcher: self.fetcher.clone(),
                url: task.url.clone(),
                ranged: task.supports_ranges,
                downloaded: task.downloaded.clone(),
                queue: queue.clone(),
                outcomes: outcome_tx.clone(),
                cancel: cancel.clone(),
            };
            tasks.spawn(run_worker(worker, ctx));
        }
        drop(outcome_tx);
        tasks.spawn(dispatch(task.parts.clone(), part_tx, queue, cancel.clone()));

        let reporter = tokio::spawn(report_progress(
            task.file_name.clone(),
            task.downloaded.clone(),
            task.total_size,
            cancel.clone(),
            progress_bar(self.config.show_progress),
        ));

        let mut completion = Completion::new(task.parts.len(), task.workers);
        while !completion.is_settled() {
            match outcome_rx.recv().await {
                Some(outcome) => {
                    completion.record(outcome, &mut task.parts);
                    if completion.should_cancel() {
                        cancel.cancel();
                    }
                }
                None => break,
            }
        }
        // Every Finished is sent before its worker's terminal outcome, so all
        // of them have been recorded by now.
        debug_assert_eq!(
            completion.finished_bytes(),
            task.downloaded.load(Ordering::Relaxed)
        );
        let verdict = completion.into_verdict();

        cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Download task ended abnormally: {}", e);
            }
        }
        let _ = reporter.await;

        match verdict {
            Verdict::Succeeded => {
                let bytes = merge_parts(&task.parts, &task.destination).await?;
                info!("Saved {} to {}", task.file_name, task.destination.display());
                Ok(DownloadReport {
                    path: task.destination,
                    bytes,
                    parts: task.parts.len(),
                    elapsed: started.elapsed(),
                })
            }
            Verdict::Failed { part_id, error } => {
                clean_up(&task).await;
                Err(DownloadError::Transfer { part: part_id, source: error })
            }
            Verdict::Interrupted => {
                clean_up(&task).await;
                Err(DownloadError::Interrupted)
            }
            Verdict::WorkersLost => {
                clean_up(&task).await;
                Err(DownloadError::WorkersLost)
            }
        }
    }
}

/// Cleanup failures are logged so they never mask why the download stopped.
async fn clean_up(task: &DownloadTask) {
    info!(
        "Download cancelled, removing {} finished parts",
        task.finished_parts()
    );
    if let Err(e) = remove_finished(&task.parts).await {
        warn!("Cleanup incomplete: {}", e);
    }
}
