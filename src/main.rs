//! # Message archiver CLI (`marc`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `marc ingest '<json>'` | Normalize and store one message (`-` reads stdin) |
//! | `marc digest [DATE]` | Write the Markdown digest for a day (default: yesterday) |
//! | `marc archive` | Move partitions older than the retention window to cold storage |
//! | `marc daily` | `digest` for yesterday, then `archive` |
//! | `marc reindex` | Rebuild the fingerprint index from stored partitions |
//! | `marc stats` | Summarize hot/cold storage and the index |
//! | `marc tags "<text>"` | Show the tags the configured rules assign to a text |
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success, including duplicates and days with no data |
//! | 1 | Any other failure |
//! | 2 | The message could not be normalized |
//! | 3 | Archival finished but some partitions failed to move |
//!
//! ## Examples
//!
//! ```bash
//! marc ingest '{"platform":"telegram","content":{"body":"hello"}}'
//! marc digest 2026-02-17
//! marc daily --config /etc/marc.toml
//! ```

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use msg_archiver::error::ValidationError;
use msg_archiver::tags::TagExtractor;
use msg_archiver::{archive, config, digest, ingest, stats};

const EXIT_VALIDATION: u8 = 2;
const EXIT_PARTIAL_ARCHIVE: u8 = 3;

/// Message archiver: daily NDJSON partitions, dedup, digests and retention.
///
/// All commands read a TOML configuration file. See
/// `config/marc.example.toml` for every setting.
#[derive(Parser)]
#[command(
    name = "marc",
    about = "Message archiver: daily NDJSON partitions, dedup, digests and retention",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(
        long,
        global = true,
        env = "MARC_CONFIG",
        default_value = "./config/marc.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize, tag and store one message.
    ///
    /// Prints the stored record, or `duplicate: <msg_id>` when a message with
    /// the same body, timestamp and sender was already stored.
    Ingest {
        /// Message as a JSON object, or `-` to read it from stdin.
        message: String,
    },

    /// Generate the Markdown digest for one day.
    Digest {
        /// Day to summarize (YYYY-MM-DD). Defaults to yesterday (UTC).
        #[arg(value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Print the rendered document instead of a summary.
        #[arg(long)]
        stdout: bool,
    },

    /// Move partitions older than the retention window to cold storage.
    Archive {
        /// Show what would move without moving anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Yesterday's digest followed by archival. Meant for a daily cron entry.
    Daily,

    /// Rebuild the fingerprint index from every hot and cold partition.
    Reindex,

    /// Show partition, message and index counts.
    Stats,

    /// Print the tags the configured rule table assigns to TEXT.
    Tags {
        /// Message text to classify.
        text: String,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, msg_archiver::models::DATE_FORMAT)
        .map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn yesterday() -> NaiveDate {
    Utc::now().date_naive() - Duration::days(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if ValidationError::is_in(&e) {
                ExitCode::from(EXIT_VALIDATION)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    // Tag tuning works without a config file, but a broken one is an error.
    if let Commands::Tags { text } = &cli.command {
        let extractor = if cli.config.exists() {
            config::load_config(&cli.config)?.tags.extractor()?
        } else {
            TagExtractor::with_defaults()
        };
        for tag in extractor.extract(text) {
            println!("{}", tag);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { message } => {
            let payload = if message == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                message
            };
            ingest::run_ingest(&cfg, &payload).await?;
        }
        Commands::Digest { date, stdout } => {
            digest::run_digest(&cfg, date.unwrap_or_else(yesterday), stdout).await?;
        }
        Commands::Archive { dry_run } => {
            let report = archive::run_archive(&cfg, dry_run).await?;
            if !report.is_clean() {
                return Ok(ExitCode::from(EXIT_PARTIAL_ARCHIVE));
            }
        }
        Commands::Daily => {
            // Archival runs even if the digest fails; each is its own unit of work.
            let digest_result = digest::run_digest(&cfg, yesterday(), false).await;
            if let Err(e) = &digest_result {
                tracing::error!(error = %format!("{:#}", e), "daily digest failed");
            }
            let report = archive::run_archive(&cfg, false).await?;
            digest_result?;
            if !report.is_clean() {
                return Ok(ExitCode::from(EXIT_PARTIAL_ARCHIVE));
            }
        }
        Commands::Reindex => {
            ingest::run_reindex(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Tags { .. } => unreachable!("handled before config loading"),
    }

    Ok(ExitCode::SUCCESS)
}
