use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::TransferError;
use crate::fetcher::RangeFetcher;
use crate::state::Part;

/// Receiving end of the part queue, shared by every worker.
pub(crate) type PartQueue = Arc<Mutex<mpsc::Receiver<Part>>>;

#[derive(Debug)]
pub(crate) enum WorkerOutcome {
    Finished { worker: usize, part_id: usize },
    /// Terminal: the worker exits after reporting this.
    Failed { worker: usize, part_id: usize, error: TransferError },
    /// Terminal: the worker saw cancellation and exited.
    Stopped { worker: usize },
    /// Terminal: the worker unwound without reporting anything else.
    Lost { worker: usize },
}

pub(crate) struct WorkerContext<F> {
    pub fetcher: Arc<F>,
    pub url: Url,
    pub ranged: bool,
    pub downloaded: Arc<AtomicU64>,
    pub queue: PartQueue,
    pub outcomes: mpsc::UnboundedSender<WorkerOutcome>,
    pub cancel: CancellationToken,
}

impl<F> WorkerContext<F> {
    fn report(&self, outcome: WorkerOutcome) {
        // The coordinator may already have settled.
        let _ = self.outcomes.send(outcome);
    }
}

/// Sends `Lost` when dropped before a terminal outcome went out, so a
/// panicking worker still counts towards settling the download.
struct TerminalGuard {
    worker: usize,
    outcomes: mpsc::UnboundedSender<WorkerOutcome>,
    armed: bool,
}

impl TerminalGuard {
    fn new(worker: usize, outcomes: mpsc::UnboundedSender<WorkerOutcome>) -> Self {
        Self { worker, outcomes, armed: true }
    }

    fn finish(mut self, outcome: WorkerOutcome) {
        self.armed = false;
        let _ = self.outcomes.send(outcome);
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.outcomes.send(WorkerOutcome::Lost { worker: self.worker });
        }
    }
}

async fn next_part(queue: &PartQueue) -> Option<Part> {
    queue.lock().await.recv().await
}

/// Pulls parts until cancelled or until one of them fails. Every worker
/// reports exactly one terminal outcome.
pub(crate) async fn run_worker<F: RangeFetcher>(worker: usize, ctx: WorkerContext<F>) {
    debug!("Worker {} started", worker);
    let guard = TerminalGuard::new(worker, ctx.outcomes.clone());
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            part = next_part(&ctx.queue) => Some(part),
        };

        let part = match next {
            None => break,
            Some(Some(part)) => part,
            Some(None) => {
                // Nothing left to claim; wait for the coordinator to wrap up.
                ctx.cancel.cancelled().await;
                break;
            }
        };

        let fetched = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                debug!("Worker {} abandoned part {}", worker, part.id);
                break;
            }
            fetched = ctx.fetcher.fetch(&ctx.url, &part, ctx.ranged) => fetched,
        };

        match store_part(&part, fetched).await {
            Ok(()) => {
                ctx.downloaded.fetch_add(part.size(), Ordering::Relaxed);
                ctx.report(WorkerOutcome::Finished { worker, part_id: part.id });
            }
            Err(error) => {
                debug!("Worker {} failed on part {}", worker, part.id);
                guard.finish(WorkerOutcome::Failed { worker, part_id: part.id, error });
                return;
            }
        }
    }

    debug!("Worker {} stopped", worker);
    guard.finish(WorkerOutcome::Stopped { worker });
}

async fn store_part(part: &Part, fetched: Result<bytes::Bytes, TransferError>) -> Result<(), TransferError> {
    let body = fetched?;
    let received = body.len() as u64;
    if received != part.size() {
        return Err(TransferError::Length { expected: part.size(), received });
    }

    if let Err(source) = fs::write(&part.temp_path, &body).await {
        let _ = fs::remove_file(&part.temp_path).await;
        return Err(TransferError::Write { path: part.temp_path.clone(), source });
    }
    Ok(())
}

/// Pushes parts in order, blocking while the queue is full. On cancellation
/// the queue is closed and whatever is still buffered is discarded.
pub(crate) async fn dispatch(
    parts: Vec<Part>,
    sender: mpsc::Sender<Part>,
    queue: PartQueue,
    cancel: CancellationToken,
) {
    let total = parts.len();
    for (pushed, part) in parts.into_iter().enumerate() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Dispatcher cancelled after {}/{} parts", pushed, total);
                drop(sender);
                let mut receiver = queue.lock().await;
                receiver.close();
                while receiver.try_recv().is_ok() {}
                return;
            }
            sent = sender.send(part) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
    debug!("Dispatcher queued all {} parts", total);
}
