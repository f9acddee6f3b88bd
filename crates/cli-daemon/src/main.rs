//! CLI entry point for vidaud
//!
//! Loads configuration, runs the startup checks and keeps the daemon
//! running until SIGINT or SIGTERM.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use vidaud::{
    init_logging, prepare_directories, run_startup_checks, shutdown_signal, Config, ConfigError,
    Daemon, DaemonError,
};

/// vidaud - convert video files dropped into a folder into tagged audio
#[derive(Parser, Debug)]
#[command(name = "vidaud")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional TOML configuration file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip the ffmpeg availability check. Directories are still prepared.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

fn load_config(args: &Args) -> Result<Config, ConfigError> {
    match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
}

async fn run(config: Config, skip_checks: bool) -> Result<(), DaemonError> {
    info!(
        input = %config.input_dir.display(),
        output = %config.output_dir.display(),
        format = %config.output_format,
        max_parallel_jobs = config.max_parallel_jobs,
        health_port = config.health_port,
        "vidaud starting"
    );

    if skip_checks {
        warn!("Skipping ffmpeg check (--skip-checks enabled)");
        prepare_directories(&config)?;
    } else {
        run_startup_checks(&config).await?;
    }

    Daemon::with_ffmpeg(config)
        .run_with_server(shutdown_signal())
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.log_filter());

    match run(config, args.skip_checks).await {
        Ok(()) => {
            info!("vidaud stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}
