//! AnimMUF CLI: build the MUF animation video.
//!
//! Usage:
//!   animmuf [OPTIONS]          Fetch new frames, render and convert
//!   animmuf [OPTIONS] check    Check configuration and converter
//!
//! Exit status: 0 on success, 1 on a failed run, 2 on a configuration error.

use std::path::PathBuf;
use std::process::ExitCode;

use animmuf_common::config::AppConfig;
use clap::{Parser, Subcommand};

mod commands;

const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(
    name = "animmuf",
    about = "Animate the NOAA SWPC maximum usable frequency maps",
    version,
    author
)]
struct Cli {
    /// Configuration file (default: search ./animmuf.yaml, ~/.animmuf.yaml,
    /// ~/.local/animmuf.yaml, /etc/animmuf.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Only download and cache frames
    #[arg(long)]
    no_video: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the configuration, converter and font are usable
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("animmuf: configuration error: {err}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    logging.json |= cli.json_logs;
    animmuf_common::logging::init_logging(&logging);

    match cli.command {
        Some(Commands::Check) => commands::check::run(&config),
        None => commands::run::run(&config, !cli.no_video, cli.json).await,
    }
}
