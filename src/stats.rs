//! Storage overview.
//!
//! Summarizes what is in hot and cold storage and in the fingerprint index.
//! Used by `marc stats` to check that ingestion and archival are keeping up.
//! Partitions are counted as bytes, so a corrupt line never fails the scan.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::store::{self, parse_partition_file_name, FingerprintIndex};

/// Per-tier totals.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TierStats {
    pub partitions: usize,
    pub lines: usize,
    pub bytes: u64,
    pub oldest: Option<NaiveDate>,
    pub newest: Option<NaiveDate>,
}

/// Walk `root` and total every partition file under it.
pub fn scan_tier(root: &Path) -> Result<TierStats> {
    let mut stats = TierStats::default();
    if !root.exists() {
        return Ok(stats);
    }

    for entry in WalkDir::new(root).max_depth(2) {
        let entry = entry.with_context(|| format!("Failed to list {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(date) = parse_partition_file_name(&entry.file_name().to_string_lossy()) else {
            continue;
        };

        let bytes = std::fs::read(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        stats.partitions += 1;
        stats.lines += bytes
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .count();
        stats.bytes += bytes.len() as u64;
        stats.oldest = Some(stats.oldest.map_or(date, |d| d.min(date)));
        stats.newest = Some(stats.newest.map_or(date, |d| d.max(date)));
    }

    Ok(stats)
}

/// Run the stats command and print a summary.
///
/// The tier scans are synchronous and block the runtime thread; the command
/// is the only task running.
pub async fn run_stats(config: &Config) -> Result<()> {
    let hot = scan_tier(&config.storage.hot_dir)?;
    let cold = scan_tier(&config.storage.cold_dir)?;

    let (_, index) = store::open(config).await?;
    let fingerprints = index.count().await;
    index.close().await;
    let fingerprints = fingerprints?;

    println!("Message Archive Stats");
    println!("=====================");
    println!();
    println!(
        "  {:<6} {:>10} {:>10} {:>10}   {}",
        "TIER", "PARTITIONS", "MESSAGES", "SIZE", "RANGE"
    );
    println!("  {}", "-".repeat(64));
    for (name, s) in [("hot", &hot), ("cold", &cold)] {
        println!(
            "  {:<6} {:>10} {:>10} {:>10}   {}",
            name,
            s.partitions,
            s.lines,
            format_bytes(s.bytes),
            format_range(s)
        );
    }
    println!();
    println!("  Retention:     {} days hot", config.retention.hot_days);
    println!("  Fingerprints:  {}", fingerprints);
    println!("  Index:         {}", config.storage.index_path().display());
    println!();

    Ok(())
}

fn format_range(s: &TierStats) -> String {
    match (s.oldest, s.newest) {
        (Some(a), Some(b)) if a == b => a.to_string(),
        (Some(a), Some(b)) => format!("{} .. {}", a, b),
        _ => "-".to_string(),
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
