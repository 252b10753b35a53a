use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::cli::ColorMode;

pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the stderr logger. Progress bars share stderr, so log lines stay short.
pub fn init(verbosity: u8, color: ColorMode) -> anyhow::Result<()> {
    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(color.enabled())
        .with_writer(std::io::stderr)
        .with_filter(level_for(verbosity));

    tracing_subscriber::registry()
        .with(console_layer)
        .try_init()?;
    Ok(())
}
