use std::io::IsTerminal;
use std::time::Instant;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Pretty output on a terminal, JSON otherwise.
    #[default]
    Auto,
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub default_level: LevelFilter,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Auto,
            default_level: LevelFilter::INFO,
        }
    }
}

impl LogConfig {
    fn resolved_format(&self) -> LogFormat {
        match self.format {
            LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
            LogFormat::Auto => LogFormat::Json,
            other => other,
        }
    }
}

/// Installs the global subscriber. Call once, from the binary.
///
/// `RUST_LOG` overrides `default_level`. Returns `false` if a subscriber was
/// already installed.
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(config.default_level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.resolved_format() {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Compact => builder.compact().try_init().is_ok(),
        LogFormat::Pretty | LogFormat::Auto => builder.try_init().is_ok(),
    }
}

/// Runs `f` and logs how long it took.
pub fn timed<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let value = f();
    let elapsed = start.elapsed().as_secs_f64();
    info!(elapsed_seconds = (elapsed * 100.0).round() / 100.0, "{label} complete");
    value
}
