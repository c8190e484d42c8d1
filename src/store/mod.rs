//! Storage abstraction.
//!
//! [`PartitionStore`] covers every filesystem side effect of the pipeline
//! (appending to partitions, reading them back, writing digests, relocating
//! aged partitions). [`FingerprintIndex`] is the dedup index. Ingest, digest
//! and archival are written against these traits so their logic can be
//! exercised with [`memory`] implementations.
//!
//! | Implementation | Backs |
//! |----------------|-------|
//! | [`fs::FsPartitionStore`] | hot/cold partition directories, digest directory |
//! | [`sqlite::SqliteIndex`] | fingerprint index (SQLite, WAL) |
//! | [`memory::InMemoryStore`] | both traits, for tests |

pub mod fs;
pub mod memory;
pub mod sqlite;

pub use fs::FsPartitionStore;
pub use sqlite::SqliteIndex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;

use crate::config::Config;
use crate::models::FingerprintEntry;

/// Which side of the retention boundary a partition lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hot,
    Cold,
}

/// Daily partition storage.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Append one serialized record to the hot partition for `date`.
    ///
    /// `line` must not contain a newline; the store adds the terminator and
    /// writes the whole unit at once, creating the partition if needed.
    async fn append(&self, date: NaiveDate, line: &str) -> Result<()>;

    /// Raw bytes of a partition, or `None` if it does not exist.
    ///
    /// Bytes, not text: one bad line must not make the whole partition
    /// unreadable.
    async fn read(&self, tier: Tier, date: NaiveDate) -> Result<Option<Vec<u8>>>;

    /// Partition dates present in `tier`, ascending.
    async fn list(&self, tier: Tier) -> Result<Vec<NaiveDate>>;

    /// Move a hot partition to cold storage under its year-month.
    ///
    /// At every instant the partition is visible in at least one tier. If
    /// the cold partition already exists (messages that arrived after the
    /// day was archived), the hot lines are appended to it.
    /// Returns the cold location.
    async fn relocate(&self, date: NaiveDate) -> Result<PathBuf>;

    /// Where [`relocate`](PartitionStore::relocate) would put `date`.
    fn cold_location(&self, date: NaiveDate) -> PathBuf;

    /// Write (or overwrite) the rendered digest for `date`. Returns its location.
    async fn write_digest(&self, date: NaiveDate, document: &str) -> Result<PathBuf>;
}

/// Set of seen content fingerprints.
#[async_trait]
pub trait FingerprintIndex: Send + Sync {
    /// Record `entry` if its fingerprint is unseen.
    ///
    /// Returns `false` when the fingerprint is already present. The check and
    /// the insert are a single atomic step, so two concurrent callers with the
    /// same fingerprint cannot both get `true`.
    async fn claim(&self, entry: &FingerprintEntry) -> Result<bool>;

    /// Undo a [`claim`](FingerprintIndex::claim) whose record was never written.
    async fn release(&self, context_hash: &str) -> Result<()>;

    /// Replace the whole index with `entries`. Returns the number kept
    /// (duplicated fingerprints collapse to one).
    async fn rebuild(&self, entries: &[FingerprintEntry]) -> Result<usize>;

    async fn count(&self) -> Result<i64>;
}

/// Open the filesystem partition store and the SQLite fingerprint index
/// named by `config`.
pub async fn open(config: &Config) -> Result<(FsPartitionStore, SqliteIndex)> {
    let partitions = FsPartitionStore::new(&config.storage);
    let index = SqliteIndex::open(&config.storage.index_path()).await?;
    Ok((partitions, index))
}

/// Partition file name for `date`: `YYYY-MM-DD.jsonl`.
pub fn partition_file_name(date: NaiveDate) -> String {
    format!("{}.jsonl", date.format(crate::models::DATE_FORMAT))
}

/// Cold-storage group for `date`: `YYYY-MM`.
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Parse a partition file name back into its date. Other names yield `None`.
pub fn parse_partition_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(".jsonl")?;
    NaiveDate::parse_from_str(stem, crate::models::DATE_FORMAT).ok()
}
