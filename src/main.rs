#![allow(clippy::too_many_arguments)]

mod cli;

use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Session log (overwrites previous session log)
    paintlayers::logger::init();

    let args = cli::CliArgs::parse();
    paintlayers::log_info!("CLI: {} input pattern(s)", args.input.len());
    cli::run(args)
}
