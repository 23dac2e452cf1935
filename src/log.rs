//! Setting up the log output.

use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing::Subscriber;

use crate::env::Env;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// A subscriber writing log lines to the stderr of `env`.
pub fn subscriber(env: &impl Env, level: LogLevel) -> impl Subscriber + Send + Sync + 'static {
    let stderr = env.stderr();
    let ansi = stderr.is_terminal();
    tracing_subscriber::fmt()
        .with_writer(stderr)
        .with_ansi(ansi)
        .with_target(false)
        .without_time()
        .with_max_level(LevelFilter::from(level))
        .finish()
}
