use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use url::Url;

/// One download session, built from a successful probe and used once.
#[derive(Debug)]
pub struct DownloadTask {
    pub url: Url,
    pub file_name: String,
    pub destination: PathBuf,
    pub total_size: u64,
    pub workers: usize,
    pub supports_ranges: bool,
    /// Ordered by position in the output file.
    pub parts: Vec<Part>,
    pub downloaded: Arc<AtomicU64>,
}

impl DownloadTask {
    pub fn finished_parts(&self) -> usize {
        self.parts.iter().filter(|p| p.finished).count()
    }
}

/// A contiguous, inclusive byte range staged in its own temp file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// 1-based.
    pub id: usize,
    pub begin: u64,
    pub end: u64,
    pub temp_path: PathBuf,
    pub finished: bool,
}

impl Part {
    pub fn size(&self) -> u64 {
        self.end - self.begin + 1
    }

    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.begin, self.end)
    }
}
