use std::collections::BTreeSet;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

mod app;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod services;

use app::Archiver;
use config::Config;
use error::{AppError, Result};
use models::{Extension, FeedFormat};

#[derive(Parser, Debug)]
#[command(name = "feed-archiver", version)]
#[command(about = "Archives GTFS-realtime and service-alert feed snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the configured feeds on their schedules and archive every snapshot
    Archive {
        /// Configuration file (defaults to the user config directory)
        config: Option<PathBuf>,

        /// Fetch every feed once, flush and exit
        #[arg(long)]
        one_shot: bool,
    },
    /// Decode a single payload and print its JSON representation
    Dump {
        /// Read the payload from a file
        #[arg(long, conflicts_with = "url")]
        file: Option<PathBuf>,

        /// Fetch the payload from a URL
        #[arg(long)]
        url: Option<String>,

        /// Payload format: gtfs-rt, rss or atom
        #[arg(long, default_value = "gtfs-rt")]
        format: FeedFormat,

        /// Protocol extension to enable (repeatable)
        #[arg(short = 'E', long = "extension")]
        extensions: Vec<Extension>,

        /// Accept GTFS-rt messages with missing required fields
        #[arg(long)]
        partial: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_config() => {
            tracing::error!("{}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Archive { config, one_shot } => {
            let path = config.unwrap_or_else(Config::config_path);
            tracing::info!("Loading configuration from {}", path.display());
            let config = Config::load(&path)?;
            let archiver = Archiver::new(config)?;

            let stats = if one_shot {
                archiver.run_one_shot().await?
            } else {
                archiver.run(shutdown_on_ctrl_c()).await?
            };
            tracing::info!(
                "Archived {} rows in {} batches ({} to fallback, {} dropped)",
                stats.rows_written,
                stats.batches,
                stats.rows_fallback,
                stats.rows_dropped
            );
            Ok(())
        }
        Command::Dump {
            file,
            url,
            format,
            extensions,
            partial,
        } => {
            let extensions: BTreeSet<Extension> = extensions.into_iter().collect();
            if !extensions.is_empty() {
                let names: Vec<&str> = extensions.iter().map(|e| e.name()).collect();
                tracing::info!("Decoding extensions: {}", names.join(", "));
            }
            let body = load_payload(file, url).await?;
            println!("{}", dump_payload(format, &body, partial, &extensions)?);
            Ok(())
        }
    }
}

/// Reads the payload from a file, a URL, or stdin when neither is given.
async fn load_payload(file: Option<PathBuf>, url: Option<String>) -> Result<Vec<u8>> {
    if let Some(path) = file {
        return Ok(tokio::fs::read(path).await?);
    }
    if let Some(url) = url {
        let response = reqwest::get(url.as_str()).await?.error_for_status()?;
        return Ok(response.bytes().await?.to_vec());
    }
    let mut body = Vec::new();
    std::io::stdin().read_to_end(&mut body)?;
    Ok(body)
}

fn dump_payload(
    format: FeedFormat,
    body: &[u8],
    partial: bool,
    extensions: &BTreeSet<Extension>,
) -> Result<String> {
    let decoded = feed::decode(format, body, partial, extensions)?;
    let value: serde_json::Value = serde_json::from_str(&decoded.contents)?;
    serde_json::to_string_pretty(&value).map_err(AppError::from)
}

/// Flips the returned receiver to true on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
            Err(e) => tracing::error!("Unable to listen for Ctrl-C: {}", e),
        }
        let _ = tx.send(true);
    });
    rx
}
