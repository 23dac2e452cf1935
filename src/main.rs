use std::process::ExitCode;

use keywatch::env::RealEnv;

fn main() -> ExitCode {
    ExitCode::from(keywatch::run(RealEnv))
}
