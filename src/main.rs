use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use logdog_engine::LogSetManager;

mod config;
mod pid;

use config::{Config, normalize_level};
use pid::PidFile;

/// Logdog - tail groups of log files and dispatch matching lines to handlers
#[derive(Parser, Debug)]
#[command(name = "logdog")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Seconds between polls (overrides the config file)
    #[arg(short, long)]
    interval: Option<f64>,

    /// Log level or EnvFilter directives (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load(&args.config)?;
    if let Some(interval) = args.interval {
        config.interval = interval;
    }
    let scheduler = config.scheduler()?;

    let level = args
        .log_level
        .as_deref()
        .map(normalize_level)
        .unwrap_or_else(|| config.log_level());
    init_tracing(&level, config.log_file.as_deref())?;

    let dogs = config.build_dogs()?;
    if args.check {
        println!("{}: {} dog(s) ok", args.config.display(), dogs.len());
        return Ok(());
    }

    let _pid_file = config.pid_file.as_ref().map(PidFile::create).transpose()?;

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    tracing::info!("start from {}", cwd.display());

    let mut manager = LogSetManager::new(dogs);
    let stats = manager.stats();
    tracing::info!(dogs = manager.dogs().count(), live = stats.live, "init dogs");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            tracing::warn!("shutdown requested, finishing current tick");
            cancel.cancel();
        }
    });

    scheduler.run(&mut manager, cancel).await;
    manager.close_all();

    Ok(())
}

/// Initialise tracing; `RUST_LOG` takes precedence over `level`
fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level))?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
