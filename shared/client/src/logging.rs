use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::Result;
use clap::ValueEnum;
use time::OffsetDateTime;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

#[derive(Clone, Debug, Copy, ValueEnum, PartialEq)]
pub enum LogOutput {
    Console,
    Json,
}

/// Installs the global tracing subscriber: an env-filtered console or JSON
/// layer on stdout, plus an optional plain-text file layer. `RUST_LOG`
/// overrides `level` as usual.
pub fn init_logging(
    output: LogOutput,
    level: Level,
    write_logs_file: Option<PathBuf>,
) -> Result<()> {
    let make_filter = || {
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy()
    };

    let output_layer = match output {
        LogOutput::Console => fmt::layer()
            .with_writer(std::io::stdout)
            .with_filter(make_filter())
            .boxed(),
        LogOutput::Json => fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .flatten_event(true)
            .with_current_span(true)
            .with_filter(make_filter())
            .boxed(),
    };

    let file_layer = match write_logs_file {
        Some(path) => {
            let log_file = OpenOptions::new().append(true).create(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(log_file)
                    .with_filter(make_filter())
                    .boxed(),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(output_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        "============ orchestrator startup at {} ============",
        OffsetDateTime::now_utc()
    );
    Ok(())
}
