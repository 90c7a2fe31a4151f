use std::process::ExitCode;

use clap::Parser;
use cdindex::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    match cli.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cdindex: {err:#}");
            ExitCode::FAILURE
        }
    }
}
