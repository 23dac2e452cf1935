//! The configuration file.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::env::Env;
use crate::error::{ensure, Context, Error};
use crate::log::LogLevel;
use crate::parse::deserialize_duration;
use crate::report::ViolationOrder;
use crate::resolver::ResolverConfig;

/// Settings read from a JSON file.
///
/// Every field is optional. Command line options take precedence.
///
/// ```json
/// {
///     "database": "/var/lib/keywatch/keywatch.sqlite",
///     "timeout": "5s",
///     "max-attempts": 3,
///     "log-level": "debug",
///     "order": "time"
/// }
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// The observation database.
    pub database: PathBuf,

    /// How long to wait for each answer from a nameserver.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    /// How often a query is tried before a poll fails.
    pub max_attempts: u32,

    pub log_level: LogLevel,

    /// The default order of audit reports.
    pub order: ViolationOrder,
}

impl Default for Config {
    fn default() -> Self {
        let resolver = ResolverConfig::default();
        Config {
            database: PathBuf::from("keywatch.sqlite"),
            timeout: resolver.timeout,
            max_attempts: resolver.max_attempts,
            log_level: LogLevel::default(),
            order: ViolationOrder::default(),
        }
    }
}

impl Config {
    /// Read the configuration file at `path`.
    ///
    /// A relative database path is taken relative to the current directory,
    /// not to the configuration file.
    pub fn load(env: &impl Env, path: &Path) -> Result<Self, Error> {
        let path = env.in_cwd(&path);
        Self::read(&path)
            .with_context(|| format!("reading configuration file {}", path.display()))
    }

    fn read(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let config: Config =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| e.to_string())?;
        ensure!(config.max_attempts > 0, "max-attempts must be at least 1");
        Ok(config)
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            timeout: self.timeout,
            max_attempts: self.max_attempts,
            ..Default::default()
        }
    }
}
