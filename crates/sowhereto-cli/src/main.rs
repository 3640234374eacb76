//! So Where To? CLI - a terminal front end for mystery travel accounts.
//!
//! Signs in and out, shows session state, walks the route guard and makes
//! authenticated requests against the backend.

mod app;
mod commands;

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Cli;
use sowhereto_core::Config;

/// Log file written into the data directory
const LOG_FILE: &str = "sowhereto.log";

/// Initialize the tracing subscriber for logging.
///
/// Stderr always gets a layer; the log file is added when the data directory
/// is available. The returned guard flushes the file writer on drop.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let appender = config.data_dir().ok().and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE)
            .build(dir)
            .ok()
    });

    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(ref url) = cli.api_url {
        config.api_base_url = url.clone();
    }

    let log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, "So Where To? CLI starting");

    let result = cli.execute(config).await;
    let code = finish(result, log_guard);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Report the outcome and flush the file log. Returns the exit code.
///
/// `process::exit` skips destructors, so the log guard is dropped here first.
fn finish(result: Result<()>, log_guard: Option<WorkerGuard>) -> i32 {
    if let Err(ref e) = result {
        eprintln!("Error: {:#}", e);
    }
    info!("So Where To? CLI shutting down");
    drop(log_guard);
    if result.is_err() {
        1
    } else {
        0
    }
}
