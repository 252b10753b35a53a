use reqwest::StatusCode;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while asking the server what it is about to send us.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported protocol '{0}', only http and https can be downloaded")]
    UnsupportedProtocol(String),
    #[error("HEAD request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HEAD request answered with status {0}")]
    Status(StatusCode),
    #[error("server did not report a Content-Length, please download this file with a browser")]
    SizeUnknown,
    #[error("invalid Content-Length header: {0:?}")]
    InvalidLength(String),
    #[error("file is {size} bytes, larger than the supported maximum of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
}

/// Failures of a single part. Any of these cancels the whole download.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server answered with status {0}")]
    Status(StatusCode),
    #[error("expected {expected} bytes, received {received}")]
    Length { expected: u64, received: u64 },
    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("part {part} failed, download cancelled: {source}")]
    Transfer { part: usize, source: TransferError },
    #[error("download interrupted")]
    Interrupted,
    #[error("all workers stopped before the download finished")]
    WorkersLost,
    #[error("failed to assemble {}: {source}", .path.display())]
    Merge { path: PathBuf, source: io::Error },
    #[error("failed to remove temp file {}: {source}", .path.display())]
    Cleanup { path: PathBuf, source: io::Error },
}
