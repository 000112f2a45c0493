use clap::Parser;
use log::*;
use std::process::ExitCode;

use cephtools::{Args, Result, command};

fn initialize_logger(debug: bool) -> Result<()> {
    let filter = if debug {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };

    let config = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("cephtools")
        .build();

    simplelog::TermLogger::init(
        filter,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    Ok(())
}

async fn run(cli_args: Args) -> Result<()> {
    initialize_logger(cli_args.debug)?;

    command::dispatch(&cli_args.command).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;

    let cli_args = Args::parse();

    match run(cli_args).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            error!("{err}");
            if !log_enabled!(Level::Error) {
                eprintln!("Error: {err}");
            }
            Ok(ExitCode::from(err.exit_code()))
        }
    }
}
