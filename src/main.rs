//! Segclip - Time-Segment Clip Pipeline
//!
//! Entry point: loads the configuration, sets up logging and runs one clip,
//! a batch of clips or a tool check. Responses are printed as JSON on stdout;
//! logs go to stderr and to a rolling file.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use segclip::cli::{Args, Commands};
use segclip::config::{Config, LoggingConfig};
use segclip::job::{ClipRequest, ClipResponse};
use segclip::workflow::ClipWorkflow;

const DEFAULT_CONFIG_FILE: &str = "segclip.toml";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let args = Args::parse();

    if let Commands::InitConfig { path } = &args.command {
        Config::default().save_to_file(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };
    if let Some(uploads_dir) = args.uploads_dir {
        config.uploads_dir = uploads_dir;
    }

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = setup_logging(&config.logging, args.verbose)?;
    info!("Starting segclip, uploads directory: {}", config.uploads_dir.display());

    let workflow = Arc::new(ClipWorkflow::new(config)?);

    // Tools run in their own process groups and do not see the terminal's
    // interrupt; dropping the runtime on exit stops them and cleans up
    let succeeded = tokio::select! {
        result = run_command(&workflow, args.command) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping running jobs");
            false
        }
    };

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Execute one subcommand, returning whether every job succeeded
async fn run_command(workflow: &Arc<ClipWorkflow>, command: Commands) -> Result<bool> {
    let succeeded = match command {
        Commands::Clip { url, start, end } => {
            let response = workflow.handle(ClipRequest::new(url, start, end)).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            response.is_success()
        }
        Commands::Batch { input } => {
            info!("Processing batch file: {}", input.display());
            let content = tokio::fs::read_to_string(&input).await?;
            let requests = content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| {
                    serde_json::from_str::<ClipRequest>(line)
                        .map_err(|e| format!("Invalid request JSON: {}", e))
                })
                .collect::<Vec<_>>();

            let responses = workflow.handle_batch(requests).await;
            for response in &responses {
                println!("{}", serde_json::to_string(response)?);
            }
            responses.iter().all(ClipResponse::is_success)
        }
        Commands::Check => {
            let versions = workflow.check_tools().await?;
            println!("downloader: {}", versions.downloader);
            println!("remuxer:    {}", versions.remuxer);
            true
        }
        Commands::InitConfig { .. } => true,
    };

    Ok(succeeded)
}

/// Setup logging to stderr and to a daily rolling file
fn setup_logging(logging: &LoggingConfig, verbose: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&logging.directory)?;

    let file_appender = rolling::daily(&logging.directory, &logging.file_name);
    let (non_blocking_file, guard) = non_blocking(file_appender);

    // Determine log level
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // stdout carries the JSON responses
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        logging.directory.join(&logging.file_name).display()
    );

    Ok(guard)
}
