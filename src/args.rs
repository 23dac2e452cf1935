use std::path::PathBuf;

use crate::commands::Command;
use crate::config::Config;
use crate::env::Env;
use crate::error::Error;
use crate::log::{self, LogLevel};

#[derive(Clone, Debug, clap::Parser)]
#[command(version, disable_help_subcommand = true)]
pub struct Args {
    /// Read settings from this JSON file
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// The observation database [default: keywatch.sqlite]
    #[arg(short = 'd', long = "database", value_name = "FILE", global = true)]
    pub database: Option<PathBuf>,

    /// How much to log
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    pub fn execute(self, env: impl Env) -> Result<(), Error> {
        let Args {
            config,
            database,
            log_level,
            command,
        } = self;

        let mut config = match config {
            Some(path) => Config::load(&env, &path)?,
            None => Config::default(),
        };
        if let Some(database) = database {
            config.database = database;
        }
        if let Some(level) = log_level {
            config.log_level = level;
        }

        let subscriber = log::subscriber(&env, config.log_level);
        tracing::subscriber::with_default(subscriber, || command.execute(&env, &config))
    }
}

impl From<Command> for Args {
    fn from(command: Command) -> Self {
        Args {
            config: None,
            database: None,
            log_level: None,
            command,
        }
    }
}
