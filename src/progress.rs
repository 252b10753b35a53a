use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub percent: f64,
    pub bytes_per_sec: f64,
}

/// Turns successive counter samples into throughput readings.
pub struct ThroughputMeter {
    total: u64,
    last_bytes: u64,
    last_at: Instant,
}

impl ThroughputMeter {
    pub fn new(total: u64, now: Instant) -> Self {
        Self { total, last_bytes: 0, last_at: now }
    }

    /// Returns `None` when nothing arrived since the previous reading.
    pub fn sample(&mut self, downloaded: u64, now: Instant) -> Option<Reading> {
        if downloaded == self.last_bytes {
            return None;
        }
        let delta = downloaded.saturating_sub(self.last_bytes);
        let elapsed = now.saturating_duration_since(self.last_at).as_secs_f64();
        let bytes_per_sec = if elapsed > 0.0 { delta as f64 / elapsed } else { 0.0 };

        self.last_bytes = downloaded;
        self.last_at = now;
        Some(Reading {
            percent: percent_of(downloaded, self.total),
            bytes_per_sec,
        })
    }
}

pub fn percent_of(downloaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    downloaded as f64 / total as f64 * 100.0
}

pub fn format_reading(reading: &Reading) -> String {
    format!(
        "{:.2}% ({}/s)",
        reading.percent,
        HumanBytes(reading.bytes_per_sec as u64)
    )
}

pub fn progress_bar(visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb
}

/// Samples `downloaded` until `cancel` fires. The closing line is only
/// cosmetic; the coordinator decides whether the download succeeded.
pub async fn report_progress(
    name: String,
    downloaded: Arc<AtomicU64>,
    total: u64,
    cancel: CancellationToken,
    pb: ProgressBar,
) {
    let mut meter = ThroughputMeter::new(total, Instant::now());
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    pb.set_message(format!("{} 0.00%", name));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let bytes = downloaded.load(Ordering::Relaxed);
                if let Some(reading) = meter.sample(bytes, Instant::now()) {
                    pb.set_message(format!("{} {}", name, format_reading(&reading)));
                }
            }
        }
    }

    let bytes = downloaded.load(Ordering::Relaxed);
    if bytes >= total {
        pb.finish_with_message(format!("{} 100% ({})", name, HumanBytes(total)));
    } else {
        pb.abandon_with_message(format!(
            "{} stopped at {:.2}% ({} of {})",
            name,
            percent_of(bytes, total),
            HumanBytes(bytes),
            HumanBytes(total)
        ));
    }
}
