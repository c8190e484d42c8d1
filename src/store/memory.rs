//! In-memory [`PartitionStore`] and [`FingerprintIndex`] for tests.
//!
//! Uses `BTreeMap`/`HashMap` behind `std::sync::RwLock`. Cold locations are
//! synthetic paths mirroring the filesystem layout.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::FingerprintEntry;

use super::{month_key, partition_file_name, FingerprintIndex, PartitionStore, Tier};

/// In-memory store for tests.
pub struct InMemoryStore {
    hot: RwLock<BTreeMap<NaiveDate, Vec<u8>>>,
    cold: RwLock<BTreeMap<NaiveDate, Vec<u8>>>,
    digests: RwLock<BTreeMap<NaiveDate, String>>,
    fingerprints: RwLock<HashMap<String, FingerprintEntry>>,
    failing_appends: RwLock<bool>,
    failing_moves: RwLock<HashSet<NaiveDate>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            hot: RwLock::new(BTreeMap::new()),
            cold: RwLock::new(BTreeMap::new()),
            digests: RwLock::new(BTreeMap::new()),
            fingerprints: RwLock::new(HashMap::new()),
            failing_appends: RwLock::new(false),
            failing_moves: RwLock::new(HashSet::new()),
        }
    }

    /// Seed a hot partition with raw bytes, bypassing ingest.
    pub fn put_hot(&self, date: NaiveDate, bytes: impl AsRef<[u8]>) {
        self.hot.write().unwrap().insert(date, bytes.as_ref().to_vec());
    }

    pub fn digest(&self, date: NaiveDate) -> Option<String> {
        self.digests.read().unwrap().get(&date).cloned()
    }

    /// Make every subsequent append fail, as a full disk would.
    pub fn fail_appends(&self, fail: bool) {
        *self.failing_appends.write().unwrap() = fail;
    }

    /// Make relocation of `date` fail.
    pub fn fail_move_of(&self, date: NaiveDate) {
        self.failing_moves.write().unwrap().insert(date);
    }

    fn tier(&self, tier: Tier) -> &RwLock<BTreeMap<NaiveDate, Vec<u8>>> {
        match tier {
            Tier::Hot => &self.hot,
            Tier::Cold => &self.cold,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PartitionStore for InMemoryStore {
    async fn append(&self, date: NaiveDate, line: &str) -> Result<()> {
        if *self.failing_appends.read().unwrap() {
            bail!("No space left on device");
        }
        if line.contains('\n') {
            bail!("refusing to append a record containing a raw newline");
        }
        let mut hot = self.hot.write().unwrap();
        let bytes = hot.entry(date).or_default();
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        Ok(())
    }

    async fn read(&self, tier: Tier, date: NaiveDate) -> Result<Option<Vec<u8>>> {
        Ok(self.tier(tier).read().unwrap().get(&date).cloned())
    }

    async fn list(&self, tier: Tier) -> Result<Vec<NaiveDate>> {
        Ok(self.tier(tier).read().unwrap().keys().copied().collect())
    }

    async fn relocate(&self, date: NaiveDate) -> Result<PathBuf> {
        if self.failing_moves.read().unwrap().contains(&date) {
            bail!("Permission denied");
        }
        // Lock order hot then cold, held together so the move is atomic.
        let mut hot = self.hot.write().unwrap();
        let mut cold = self.cold.write().unwrap();
        let bytes = hot
            .remove(&date)
            .ok_or_else(|| anyhow!("no hot partition for {}", date))?;
        let merged = cold.entry(date).or_default();
        if !merged.is_empty() && !merged.ends_with(b"\n") {
            merged.push(b'\n');
        }
        merged.extend_from_slice(&bytes);
        Ok(self.cold_location(date))
    }

    fn cold_location(&self, date: NaiveDate) -> PathBuf {
        PathBuf::from("cold")
            .join(month_key(date))
            .join(partition_file_name(date))
    }

    async fn write_digest(&self, date: NaiveDate, document: &str) -> Result<PathBuf> {
        self.digests
            .write()
            .unwrap()
            .insert(date, document.to_string());
        Ok(PathBuf::from("digest").join(format!("{}.md", date)))
    }
}

#[async_trait]
impl FingerprintIndex for InMemoryStore {
    async fn claim(&self, entry: &FingerprintEntry) -> Result<bool> {
        let mut map = self.fingerprints.write().unwrap();
        if map.contains_key(&entry.context_hash) {
            return Ok(false);
        }
        map.insert(entry.context_hash.clone(), entry.clone());
        Ok(true)
    }

    async fn release(&self, context_hash: &str) -> Result<()> {
        self.fingerprints.write().unwrap().remove(context_hash);
        Ok(())
    }

    async fn rebuild(&self, entries: &[FingerprintEntry]) -> Result<usize> {
        let mut map = self.fingerprints.write().unwrap();
        map.clear();
        for entry in entries {
            map.entry(entry.context_hash.clone())
                .or_insert_with(|| entry.clone());
        }
        Ok(map.len())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.fingerprints.read().unwrap().len() as i64)
    }
}
