//! Logging setup.
//!
//! Verbosity is decided once from the command line and handed to whoever
//! needs it; nothing downstream inspects the global subscriber.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

const LEVELS: [LevelFilter; 5] = [
    LevelFilter::DEBUG,
    LevelFilter::INFO,
    LevelFilter::WARN,
    LevelFilter::ERROR,
    LevelFilter::OFF,
];

/// Index of WARN in [`LEVELS`].
const DEFAULT_LEVEL: i32 = 2;

/// Effective log threshold for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verbosity(LevelFilter);

impl Default for Verbosity {
    fn default() -> Self {
        Self(LevelFilter::WARN)
    }
}

impl Verbosity {
    pub fn new(level: LevelFilter) -> Self {
        Self(level)
    }

    /// Each `-v` lowers the threshold by one level and each `-q` raises it.
    /// `--debug` always selects DEBUG.
    pub fn from_counts(verbose: u8, quiet: u8, debug: bool) -> Self {
        if debug {
            return Self(LevelFilter::DEBUG);
        }
        let index = DEFAULT_LEVEL - i32::from(verbose) + i32::from(quiet);
        let index = index.clamp(0, LEVELS.len() as i32 - 1) as usize;
        Self(LEVELS[index])
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.0
    }

    /// Whether events at `level` pass the threshold.
    pub fn allows(&self, level: Level) -> bool {
        level <= self.0
    }

    /// Default progress bar visibility: shown while warnings are shown.
    pub fn shows_progress(&self, explicit: Option<bool>) -> bool {
        explicit.unwrap_or_else(|| self.allows(Level::WARN))
    }

    fn directive(&self) -> String {
        let level = match self.0.into_level() {
            None => "off",
            Some(Level::ERROR) => "error",
            Some(Level::WARN) => "warn",
            Some(Level::INFO) => "info",
            Some(Level::DEBUG) => "debug",
            Some(_) => "trace",
        };
        format!("{level},sqlx=warn")
    }
}

/// Subscriber used before the command line is fully known, e.g. while the
/// user config file is read. Shows warnings and errors on stderr.
pub fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_timer(LocalTimer)
        .finish()
}

/// Install the global subscriber: stderr always, plus `log_file` when given.
///
/// `RUST_LOG` replaces the verbosity-derived filter when set. The returned
/// guard flushes the file writer and must live until exit.
pub fn init_logging(verbosity: Verbosity, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_timer(LocalTimer),
        )
        .with(file_layer)
        .try_init()
        .context("Failed to set global default subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, false, LevelFilter::WARN)]
    #[case(1, 0, false, LevelFilter::INFO)]
    #[case(2, 0, false, LevelFilter::DEBUG)]
    #[case(9, 0, false, LevelFilter::DEBUG)]
    #[case(0, 1, false, LevelFilter::ERROR)]
    #[case(0, 2, false, LevelFilter::OFF)]
    #[case(0, 9, false, LevelFilter::OFF)]
    #[case(1, 1, false, LevelFilter::WARN)]
    #[case(0, 3, true, LevelFilter::DEBUG)]
    fn test_from_counts(
        #[case] verbose: u8,
        #[case] quiet: u8,
        #[case] debug: bool,
        #[case] expected: LevelFilter,
    ) {
        assert_eq!(Verbosity::from_counts(verbose, quiet, debug).level_filter(), expected);
    }

    #[test]
    fn test_allows() {
        let v = Verbosity::new(LevelFilter::INFO);
        assert!(v.allows(Level::WARN));
        assert!(v.allows(Level::INFO));
        assert!(!v.allows(Level::DEBUG));
        assert!(!Verbosity::new(LevelFilter::OFF).allows(Level::ERROR));
    }

    #[test]
    fn test_progress_visibility() {
        assert!(Verbosity::default().shows_progress(None));
        assert!(!Verbosity::new(LevelFilter::ERROR).shows_progress(None));
        assert!(Verbosity::new(LevelFilter::OFF).shows_progress(Some(true)));
        assert!(!Verbosity::new(LevelFilter::DEBUG).shows_progress(Some(false)));
    }

    #[test]
    fn test_directive_keeps_sqlx_quiet() {
        assert_eq!(Verbosity::new(LevelFilter::INFO).directive(), "info,sqlx=warn");
    }
}
