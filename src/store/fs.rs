//! Filesystem-backed [`PartitionStore`].
//!
//! Layout:
//!
//! ```text
//! <hot_dir>/2026-02-17.jsonl
//! <cold_dir>/2026-01/2026-01-03.jsonl
//! <digest_dir>/2026-02-17.md
//! ```
//!
//! Calls into `std::fs` block the runtime thread. Each `marc` invocation runs
//! one operation to completion on a single task, so nothing else is starved.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::StorageConfig;

use super::{month_key, parse_partition_file_name, partition_file_name, PartitionStore, Tier};

pub struct FsPartitionStore {
    hot_dir: PathBuf,
    cold_dir: PathBuf,
    digest_dir: PathBuf,
}

impl FsPartitionStore {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            hot_dir: storage.hot_dir.clone(),
            cold_dir: storage.cold_dir.clone(),
            digest_dir: storage.digest_dir.clone(),
        }
    }

    pub fn hot_path(&self, date: NaiveDate) -> PathBuf {
        self.hot_dir.join(partition_file_name(date))
    }

    pub fn digest_path(&self, date: NaiveDate) -> PathBuf {
        self.digest_dir
            .join(format!("{}.md", date.format(crate::models::DATE_FORMAT)))
    }

    fn path_for(&self, tier: Tier, date: NaiveDate) -> PathBuf {
        match tier {
            Tier::Hot => self.hot_path(date),
            Tier::Cold => self.cold_location(date),
        }
    }
}

#[async_trait]
impl PartitionStore for FsPartitionStore {
    async fn append(&self, date: NaiveDate, line: &str) -> Result<()> {
        if line.contains('\n') {
            bail!("refusing to append a record containing a raw newline");
        }

        fs::create_dir_all(&self.hot_dir)
            .with_context(|| format!("Failed to create {}", self.hot_dir.display()))?;

        let path = self.hot_path(date);
        let mut unit = String::with_capacity(line.len() + 1);
        unit.push_str(line);
        unit.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open partition {}", path.display()))?;
        // One write of the complete unit; O_APPEND places it at the end.
        file.write_all(unit.as_bytes())
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        file.sync_data()
            .with_context(|| format!("Failed to sync {}", path.display()))?;

        Ok(())
    }

    async fn read(&self, tier: Tier, date: NaiveDate) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(tier, date);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn list(&self, tier: Tier) -> Result<Vec<NaiveDate>> {
        let (root, depth) = match tier {
            Tier::Hot => (&self.hot_dir, 1),
            Tier::Cold => (&self.cold_dir, 2),
        };
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut dates = Vec::new();
        for entry in WalkDir::new(root).min_depth(depth).max_depth(depth) {
            let entry = entry.with_context(|| format!("Failed to list {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(date) = parse_partition_file_name(&entry.file_name().to_string_lossy()) {
                dates.push(date);
            }
        }

        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    async fn relocate(&self, date: NaiveDate) -> Result<PathBuf> {
        let src = self.hot_path(date);
        let dest = self.cold_location(date);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        move_file(&src, &dest)?;
        Ok(dest)
    }

    fn cold_location(&self, date: NaiveDate) -> PathBuf {
        self.cold_dir
            .join(month_key(date))
            .join(partition_file_name(date))
    }

    async fn write_digest(&self, date: NaiveDate, document: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.digest_dir)
            .with_context(|| format!("Failed to create {}", self.digest_dir.display()))?;

        // Write beside the target and rename over it so readers never see a
        // half-written digest.
        let path = self.digest_path(date);
        let tmp = path.with_extension("md.tmp");
        fs::write(&tmp, document)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(path)
    }
}

/// Move `src` to `dest` without ever leaving the file in neither place.
///
/// Uses `rename` when both paths share a filesystem. Across devices it copies
/// to a `.partial` sibling of `dest`, syncs and checks the length, renames it
/// into place and only then removes `src`. An existing `dest` is merged with,
/// never replaced.
fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        return merge_into(src, dest);
    }

    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => copy_then_remove(src, dest),
        Err(e) => Err(e).with_context(|| {
            format!("Failed to move {} to {}", src.display(), dest.display())
        }),
    }
}

/// Append the lines of `src` to the existing `dest`, then remove `src`.
///
/// The merged file is built as a `.partial` sibling and renamed over `dest`,
/// so a crash leaves either the old `dest` or the complete merge. If `dest`
/// already ends with `src` (an earlier run merged or copied but stopped
/// before removing the source) only the removal is left to do.
fn merge_into(src: &Path, dest: &Path) -> Result<()> {
    let incoming = fs::read(src).with_context(|| format!("Failed to read {}", src.display()))?;
    let mut merged =
        fs::read(dest).with_context(|| format!("Failed to read {}", dest.display()))?;

    if !incoming.is_empty() && !merged.ends_with(&incoming) {
        if !merged.is_empty() && !merged.ends_with(b"\n") {
            merged.push(b'\n');
        }
        merged.extend_from_slice(&incoming);

        let partial = dest.with_extension("jsonl.partial");
        let mut file = File::create(&partial)
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        file.write_all(&merged)
            .and_then(|_| file.sync_all())
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        fs::rename(&partial, dest)
            .with_context(|| format!("Failed to rename {} into place", partial.display()))?;
    }

    fs::remove_file(src).with_context(|| format!("Failed to remove {}", src.display()))?;
    Ok(())
}

fn copy_then_remove(src: &Path, dest: &Path) -> Result<()> {
    let partial = dest.with_extension("jsonl.partial");
    let expected = fs::metadata(src)
        .with_context(|| format!("Failed to stat {}", src.display()))?
        .len();

    let copied = fs::copy(src, &partial)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), partial.display()))?;
    File::open(&partial)
        .and_then(|f| f.sync_all())
        .with_context(|| format!("Failed to sync {}", partial.display()))?;

    if copied != expected {
        let _ = fs::remove_file(&partial);
        bail!(
            "short copy of {}: wrote {} of {} bytes",
            src.display(),
            copied,
            expected
        );
    }

    fs::rename(&partial, dest)
        .with_context(|| format!("Failed to rename {} into place", partial.display()))?;
    fs::remove_file(src).with_context(|| format!("Failed to remove {}", src.display()))?;
    Ok(())
}

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    const EXDEV: i32 = 18;
    #[cfg(windows)]
    const EXDEV: i32 = 17; // ERROR_NOT_SAME_DEVICE
    #[cfg(not(any(unix, windows)))]
    const EXDEV: i32 = -1;

    err.raw_os_error() == Some(EXDEV)
}
