//! Core data types.
//!
//! [`MessageRecord`] is the unit of storage: one per line in a daily
//! partition. Field order here is the on-disk field order.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_SENDER_ID: &str = "unknown";
pub const DEFAULT_SENDER_NAME: &str = "Unknown";
pub const DEFAULT_SENDER_ROLE: &str = "user";
pub const DEFAULT_CONTENT_TYPE: &str = "text";

/// Partition key format, also the partition file stem.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub name: String,
    pub role: String,
}

impl Default for Sender {
    fn default() -> Self {
        Self {
            id: DEFAULT_SENDER_ID.to_string(),
            name: DEFAULT_SENDER_NAME.to_string(),
            role: DEFAULT_SENDER_ROLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub kind: String,
    pub body: String,
}

/// A normalized, stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub msg_id: String,
    pub platform: String,
    pub chat_id: Option<String>,
    pub thread_id: Option<String>,
    pub sender: Sender,
    /// As supplied by the caller, or generated at ingest time.
    pub timestamp: String,
    pub content: Content,
    pub reply_to: Option<String>,
    /// Dedup fingerprint of (body, timestamp, sender id).
    pub context_hash: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Fingerprint index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintEntry {
    pub context_hash: String,
    pub msg_id: String,
    pub partition: NaiveDate,
}

impl FingerprintEntry {
    pub fn for_record(record: &MessageRecord, partition: NaiveDate) -> Self {
        Self {
            context_hash: record.context_hash.clone(),
            msg_id: record.msg_id.clone(),
            partition,
        }
    }
}

/// Aggregated view of one day's partition.
///
/// Every `Vec<(String, usize)>` is a tally in first-seen order, except
/// `by_sender`, which is sorted by count (ties keep first-seen order) and
/// truncated to [`crate::digest::TOP_SENDERS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub date: NaiveDate,
    pub total: usize,
    pub by_platform: Vec<(String, usize)>,
    pub by_sender: Vec<(String, usize)>,
    pub tag_counts: Vec<(String, usize)>,
    /// Lines that failed to parse and were skipped.
    pub unparseable: usize,
}

impl Digest {
    /// Count for `key` in a tally, 0 if absent.
    pub fn count_of(tally: &[(String, usize)], key: &str) -> usize {
        tally
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// Result of one archival pass.
#[derive(Debug, Clone, Default)]
pub struct ArchivalReport {
    pub cutoff: Option<NaiveDate>,
    /// Partitions relocated, with their cold-storage location.
    pub moved: Vec<(NaiveDate, PathBuf)>,
    /// Partitions that could not be relocated, with the reason.
    pub failed: Vec<(NaiveDate, String)>,
    /// Partitions at or after the cutoff, left in hot storage.
    pub kept: usize,
}

impl ArchivalReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
