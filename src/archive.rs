//! Retention: relocate aged partitions from hot to cold storage.
//!
//! `cutoff = today - retention.hot_days`. A partition dated strictly before
//! the cutoff moves to `<cold_dir>/<YYYY-MM>/`; the cutoff day itself stays
//! hot. A failure on one partition is recorded in the report and the pass
//! continues with the next.

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};

use crate::config::Config;
use crate::models::ArchivalReport;
use crate::store::{FsPartitionStore, PartitionStore, Tier};

/// First date that stays in hot storage.
pub fn cutoff_date(today: NaiveDate, hot_days: u32) -> NaiveDate {
    today - Duration::days(i64::from(hot_days))
}

/// Run one archival pass. With `dry_run`, report planned moves in
/// [`ArchivalReport::moved`] without touching storage.
pub async fn run_archival(
    partitions: &dyn PartitionStore,
    today: NaiveDate,
    hot_days: u32,
    dry_run: bool,
) -> Result<ArchivalReport> {
    let cutoff = cutoff_date(today, hot_days);
    let mut report = ArchivalReport {
        cutoff: Some(cutoff),
        ..ArchivalReport::default()
    };

    for date in partitions.list(Tier::Hot).await? {
        if date >= cutoff {
            report.kept += 1;
            continue;
        }

        if dry_run {
            report.moved.push((date, partitions.cold_location(date)));
            continue;
        }

        match partitions.relocate(date).await {
            Ok(dest) => {
                tracing::info!(%date, dest = %dest.display(), "archived");
                report.moved.push((date, dest));
            }
            Err(e) => {
                tracing::error!(%date, error = %format!("{:#}", e), "archive failed");
                report.failed.push((date, format!("{:#}", e)));
            }
        }
    }

    Ok(report)
}

/// CLI entry point for `marc archive`.
pub async fn run_archive(config: &Config, dry_run: bool) -> Result<ArchivalReport> {
    let partitions = FsPartitionStore::new(&config.storage);
    let today = Utc::now().date_naive();
    let report = run_archival(&partitions, today, config.retention.hot_days, dry_run).await?;

    if dry_run {
        println!("archive (dry-run)");
    } else {
        println!("archive");
    }
    if let Some(cutoff) = report.cutoff {
        println!("  cutoff: {} (keeping {} days)", cutoff, config.retention.hot_days);
    }
    for (date, dest) in &report.moved {
        println!("  {} -> {}", date, dest.display());
    }
    for (date, reason) in &report.failed {
        println!("  FAILED {}: {}", date, reason);
    }
    println!(
        "  moved: {}  kept: {}  failed: {}",
        report.moved.len(),
        report.kept,
        report.failed.len()
    );
    if report.is_clean() {
        println!("ok");
    }
    Ok(report)
}
