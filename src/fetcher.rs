use bytes::Bytes;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::error::{ProbeError, TransferError};
use crate::state::Part;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// What a HEAD request told us about the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceInfo {
    pub size: u64,
    pub supports_ranges: bool,
}

/// Network side of a download. `HttpFetcher` is the real one; tests swap in
/// an in-memory server.
pub trait RangeFetcher: Send + Sync + 'static {
    fn probe(&self, url: &Url) -> impl Future<Output = Result<ResourceInfo, ProbeError>> + Send;

    /// Fetches the bytes of `part`. Without `ranged` the whole resource is
    /// requested with a plain GET.
    fn fetch(
        &self,
        url: &Url,
        part: &Part,
        ranged: bool,
    ) -> impl Future<Output = Result<Bytes, TransferError>> + Send;
}

pub fn inspect_headers(headers: &HeaderMap) -> Result<ResourceInfo, ProbeError> {
    let raw = headers
        .get(header::CONTENT_LENGTH)
        .ok_or(ProbeError::SizeUnknown)?;
    let text = raw
        .to_str()
        .map_err(|_| ProbeError::InvalidLength(String::from_utf8_lossy(raw.as_bytes()).into_owned()))?;
    let size = text
        .trim()
        .parse::<u64>()
        .map_err(|_| ProbeError::InvalidLength(text.to_string()))?;

    let supports_ranges = headers
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);

    Ok(ResourceInfo { size, supports_ranges })
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(concat!("rangedl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeFetcher for HttpFetcher {
    async fn probe(&self, url: &Url) -> Result<ResourceInfo, ProbeError> {
        let response = self
            .client
            .head(url.clone())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status()));
        }
        inspect_headers(response.headers())
    }

    async fn fetch(&self, url: &Url, part: &Part, ranged: bool) -> Result<Bytes, TransferError> {
        let mut request = self.client.get(url.clone());
        if ranged {
            request = request.header(header::RANGE, part.range_header());
        }

        let response = request.send().await?;
        let status = response.status();
        // A server ignoring Range answers 200 with the whole body.
        let accepted = if ranged {
            status == StatusCode::PARTIAL_CONTENT
        } else {
            status.is_success()
        };
        if !accepted {
            return Err(TransferError::Status(status));
        }

        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory server holding one resource.
    pub(crate) struct MockFetcher {
        pub data: Vec<u8>,
        pub supports_ranges: bool,
        pub reports_length: bool,
        /// The HEAD request never answers.
        pub stalled_probe: bool,
        /// Part id answered with a 500.
        pub failing_part: Option<usize>,
        /// Part ids that never answer.
        pub stalled_parts: Vec<usize>,
        /// Part id whose fetch panics.
        pub panicking_part: Option<usize>,
        pub probes: AtomicUsize,
        pub gets: Mutex<Vec<(usize, bool)>>,
    }

    impl MockFetcher {
        pub(crate) fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                supports_ranges: true,
                reports_length: true,
                stalled_probe: false,
                failing_part: None,
                stalled_parts: vec![],
                panicking_part: None,
                probes: AtomicUsize::new(0),
                gets: Mutex::new(vec![]),
            }
        }

        pub(crate) fn get_count(&self) -> usize {
            self.gets.lock().unwrap().len()
        }
    }

    impl RangeFetcher for MockFetcher {
        async fn probe(&self, _url: &Url) -> Result<ResourceInfo, ProbeError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.stalled_probe {
                std::future::pending::<()>().await;
            }
            if !self.reports_length {
                return Err(ProbeError::SizeUnknown);
            }
            Ok(ResourceInfo {
                size: self.data.len() as u64,
                supports_ranges: self.supports_ranges,
            })
        }

        async fn fetch(&self, _url: &Url, part: &Part, ranged: bool) -> Result<Bytes, TransferError> {
            self.gets.lock().unwrap().push((part.id, ranged));
            tokio::task::yield_now().await;

            if self.stalled_parts.contains(&part.id) {
                std::future::pending::<()>().await;
            }
            if self.panicking_part == Some(part.id) {
                panic!("fetch of part {} blew up", part.id);
            }
            if self.failing_part == Some(part.id) {
                return Err(TransferError::Status(StatusCode::INTERNAL_SERVER_ERROR));
            }
            if !ranged {
                return Ok(Bytes::from(self.data.clone()));
            }
            let begin = part.begin as usize;
            let end = part.end as usize;
            Ok(Bytes::copy_from_slice(&self.data[begin..=end]))
        }
    }
}
