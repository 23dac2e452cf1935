pub mod args;
pub mod audit;
pub mod collector;
pub mod commands;
pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod log;
pub mod parse;
pub mod report;
pub mod resolver;
pub mod store;

use clap::Parser;

pub use self::args::Args;
use self::env::Env;
use self::error::Error;

pub fn parse_args(env: impl Env) -> Result<Args, Error> {
    let args = Args::try_parse_from(env.args_os())?;
    Ok(args)
}

/// Run the program in `env` and return its exit code.
pub fn run(env: impl Env) -> u8 {
    let res = parse_args(&env).and_then(|args| args.execute(&env));
    match res {
        Ok(()) => 0,
        Err(err) => {
            err.pretty_print(&env);
            err.exit_code()
        }
    }
}
