mod app;
mod cancel;
mod commands;
mod output;
mod register;

use std::process::ExitCode;

use clap::Parser;

use crate::app::Cli;

/// Exit code reported for any failure, matching the tool's historic behaviour.
const FAILURE: u8 = 100;

fn main() -> ExitCode {
    // Exiting here would leave the predefined keys redirected; the run winds down instead.
    ctrlc::set_handler(cancel::request).expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // regcapture warnings always reach stderr; --verbose enables debug; RUST_LOG overrides
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else if cli.silent {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("regcapture", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    let result = commands::capture::run(&cli);
    if cancel::requested() {
        eprintln!("\nCancelled.");
        return ExitCode::from(cancel::EXIT_CODE);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&e);
            ExitCode::from(FAILURE)
        }
    }
}
