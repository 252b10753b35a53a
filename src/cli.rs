use clap::ValueEnum;
use std::io::IsTerminal;

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ColorMode {
    /// Colour when stderr is a terminal
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorMode {
    pub fn enabled(self) -> bool {
        match self {
            ColorMode::Auto => std::io::stderr().is_terminal(),
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

/// Parses a worker count typed at the prompt. Range checks happen later.
pub fn parse_worker_count(input: &str) -> Option<i64> {
    input.trim().parse().ok()
}
