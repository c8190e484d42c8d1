//! Daily digest generation.
//!
//! Reads one day's partition from both tiers, tallies it, renders Markdown and writes
//! `<digest_dir>/<date>.md`. A digest is derived data: regenerating it for
//! the same partition overwrites the previous document with the same
//! aggregates.
//!
//! Corrupt lines, including ones that are not valid UTF-8, are skipped and
//! counted in [`Digest::unparseable`]; they never abort the digest.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::config::Config;
use crate::models::{Digest, MessageRecord};
use crate::store::{self, PartitionStore, Tier};

/// How many senders a digest lists.
pub const TOP_SENDERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestOutcome {
    Generated { digest: Digest, path: PathBuf },
    /// No partition exists for the date. No document is written.
    NoData,
}

/// Records parsed from a partition, plus the count of lines that were not.
#[derive(Debug, Clone, Default)]
pub struct ParsedPartition {
    pub records: Vec<MessageRecord>,
    pub unparseable: usize,
}

impl ParsedPartition {
    fn merge(&mut self, other: ParsedPartition) {
        self.records.extend(other.records);
        self.unparseable += other.unparseable;
    }
}

/// Parse NDJSON partition bytes. Empty lines are ignored.
pub fn parse_partition(bytes: &[u8]) -> ParsedPartition {
    let mut parsed = ParsedPartition::default();
    for (lineno, line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<MessageRecord>(line) {
            Ok(record) => parsed.records.push(record),
            Err(e) => {
                tracing::warn!(line = lineno + 1, error = %e, "skipping unparseable record");
                parsed.unparseable += 1;
            }
        }
    }
    parsed
}

/// Counts keyed by string, remembering first-seen order.
#[derive(Default)]
struct Tally {
    order: Vec<(String, usize)>,
    slots: HashMap<String, usize>,
}

impl Tally {
    fn bump(&mut self, key: &str) {
        match self.slots.get(key) {
            Some(&i) => self.order[i].1 += 1,
            None => {
                self.slots.insert(key.to_string(), self.order.len());
                self.order.push((key.to_string(), 1));
            }
        }
    }

    fn into_vec(self) -> Vec<(String, usize)> {
        self.order
    }

    /// Highest counts first; `sort_by` is stable so ties keep first-seen order.
    fn into_top(self, n: usize) -> Vec<(String, usize)> {
        let mut v = self.order;
        v.sort_by(|a, b| b.1.cmp(&a.1));
        v.truncate(n);
        v
    }
}

/// Aggregate parsed records into a [`Digest`].
pub fn aggregate(date: NaiveDate, parsed: &ParsedPartition) -> Digest {
    let mut platforms = Tally::default();
    let mut senders = Tally::default();
    let mut tags = Tally::default();

    for record in &parsed.records {
        platforms.bump(&record.platform);
        senders.bump(&record.sender.name);
        for tag in &record.tags {
            tags.bump(tag);
        }
    }

    Digest {
        date,
        total: parsed.records.len(),
        by_platform: platforms.into_vec(),
        by_sender: senders.into_top(TOP_SENDERS),
        tag_counts: tags.into_vec(),
        unparseable: parsed.unparseable,
    }
}

/// Markdown rendering. `generated_at` is the only input not derived from the
/// partition.
pub fn render_markdown(digest: &Digest, generated_at: DateTime<Utc>) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Message digest - {}\n", digest.date);
    let _ = writeln!(md, "## Summary\n");
    let _ = writeln!(md, "- Total messages: {}", digest.total);
    if digest.unparseable > 0 {
        let _ = writeln!(md, "- Unparseable lines skipped: {}", digest.unparseable);
    }

    let _ = writeln!(md, "\n### By platform\n");
    for (platform, count) in &digest.by_platform {
        let _ = writeln!(md, "- {}: {}", platform, count);
    }

    let _ = writeln!(md, "\n### Top senders\n");
    for (sender, count) in &digest.by_sender {
        let _ = writeln!(md, "- {}: {}", sender, count);
    }

    if !digest.tag_counts.is_empty() {
        let _ = writeln!(md, "\n### Tags\n");
        for (tag, count) in &digest.tag_counts {
            let _ = writeln!(md, "- {}: {}", tag, count);
        }
    }

    let _ = writeln!(md, "\n---\n");
    let _ = writeln!(
        md,
        "_Generated at: {}_",
        generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    md
}

/// Read the partition for `date` without aggregating it.
///
/// An archived day may also have a hot partition (messages that arrived after
/// archival), so both tiers are read, cold first. `None` only when neither
/// tier has the date.
pub async fn read_partition(
    partitions: &dyn PartitionStore,
    date: NaiveDate,
) -> Result<Option<ParsedPartition>> {
    let mut found: Option<ParsedPartition> = None;
    for tier in [Tier::Cold, Tier::Hot] {
        if let Some(bytes) = partitions.read(tier, date).await? {
            found
                .get_or_insert_with(ParsedPartition::default)
                .merge(parse_partition(&bytes));
        }
    }
    Ok(found)
}

/// Build, render and persist the digest for `date`.
pub async fn generate_digest(
    partitions: &dyn PartitionStore,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<DigestOutcome> {
    let Some(parsed) = read_partition(partitions, date).await? else {
        tracing::info!(%date, "no data for date, digest skipped");
        return Ok(DigestOutcome::NoData);
    };

    let digest = aggregate(date, &parsed);
    let document = render_markdown(&digest, now);
    let path = partitions.write_digest(date, &document).await?;

    tracing::info!(
        %date,
        total = digest.total,
        unparseable = digest.unparseable,
        path = %path.display(),
        "digest generated"
    );
    Ok(DigestOutcome::Generated { digest, path })
}

/// CLI entry point for `marc digest`.
pub async fn run_digest(config: &Config, date: NaiveDate, to_stdout: bool) -> Result<DigestOutcome> {
    let partitions = store::FsPartitionStore::new(&config.storage);
    let outcome = generate_digest(&partitions, date, Utc::now()).await?;

    match &outcome {
        DigestOutcome::NoData => {
            println!("digest {}", date);
            println!("  no data");
        }
        DigestOutcome::Generated { digest, path } => {
            if to_stdout {
                let text = std::fs::read_to_string(path)?;
                print!("{}", text);
            } else {
                println!("digest {}", date);
                println!("  messages: {}", digest.total);
                if digest.unparseable > 0 {
                    println!("  unparseable lines skipped: {}", digest.unparseable);
                }
                println!("  written: {}", path.display());
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Content, Sender};
    use crate::store::memory::InMemoryStore;
    use chrono::TimeZone;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 17).unwrap()
    }

    fn record(platform: &str, sender: &str, tags: &[&str]) -> MessageRecord {
        MessageRecord {
            msg_id: format!("msg_{}_{}", platform, sender),
            platform: platform.to_string(),
            chat_id: None,
            thread_id: None,
            sender: Sender {
                id: sender.to_lowercase(),
                name: sender.to_string(),
                role: "user".to_string(),
            },
            timestamp: "2026-02-17T10:00:00.000Z".to_string(),
            content: Content {
                kind: "text".to_string(),
                body: "x".to_string(),
            },
            reply_to: None,
            context_hash: "0000000000000000".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn ndjson(records: &[MessageRecord]) -> String {
        records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap() + "\n")
            .collect()
    }

    #[test]
    fn aggregates_counts() {
        let parsed = ParsedPartition {
            records: vec![
                record("telegram", "Alice", &["#待办", "#待回复"]),
                record("discord", "Bob", &["#待办"]),
                record("telegram", "Alice", &[]),
            ],
            unparseable: 0,
        };
        let d = aggregate(day(), &parsed);
        assert_eq!(d.total, 3);
        assert_eq!(
            d.by_platform,
            vec![("telegram".to_string(), 2), ("discord".to_string(), 1)]
        );
        assert_eq!(Digest::count_of(&d.by_sender, "Alice"), 2);
        assert_eq!(Digest::count_of(&d.tag_counts, "#待办"), 2);
        assert_eq!(Digest::count_of(&d.tag_counts, "#待回复"), 1);
        assert_eq!(Digest::count_of(&d.tag_counts, "#灵感"), 0);
    }

    #[test]
    fn top_senders_truncated_with_stable_ties() {
        let mut records = Vec::new();
        // s0..s11 once each, then s7 twice more.
        for i in 0..12 {
            records.push(record("p", &format!("s{}", i), &[]));
        }
        records.push(record("p", "s7", &[]));
        records.push(record("p", "s7", &[]));

        let d = aggregate(
            day(),
            &ParsedPartition {
                records,
                unparseable: 0,
            },
        );
        let names: Vec<&str> = d.by_sender.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["s7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s8", "s9"]
        );
        assert_eq!(d.by_sender[0].1, 3);
    }

    #[test]
    fn corrupt_lines_are_counted_not_fatal() {
        let mut text = ndjson(&[record("a", "A", &[])]);
        text.push_str("{not json\n\n");
        text.push_str(&ndjson(&[record("b", "B", &[])]));
        text.push_str("{\"msg_id\": \"truncated\"}\n");

        let parsed = parse_partition(text.as_bytes());
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.unparseable, 2);
    }

    #[test]
    fn invalid_utf8_line_is_counted_not_fatal() {
        let mut bytes = ndjson(&[record("a", "A", &[])]).into_bytes();
        bytes.extend_from_slice(b"\xff\xfe garbage\n");
        bytes.extend_from_slice(ndjson(&[record("b", "B", &[])]).as_bytes());

        let parsed = parse_partition(&bytes);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.unparseable, 1);
    }

    #[tokio::test]
    async fn invalid_utf8_partition_still_digests() {
        let store = InMemoryStore::new();
        let mut bytes = ndjson(&[record("p", "A", &[])]).into_bytes();
        bytes.extend_from_slice(b"\xff\xfe garbage\n");
        store.put_hot(day(), bytes);

        let out = generate_digest(&store, day(), Utc::now()).await.unwrap();
        let DigestOutcome::Generated { digest, .. } = out else {
            panic!("expected a digest, got {:?}", out);
        };
        assert_eq!(digest.total, 1);
        assert_eq!(digest.unparseable, 1);
    }

    #[tokio::test]
    async fn archived_day_still_digests() {
        let store = InMemoryStore::new();
        store.put_hot(day(), ndjson(&[record("p", "A", &[])]));
        store.relocate(day()).await.unwrap();

        let out = generate_digest(&store, day(), Utc::now()).await.unwrap();
        let DigestOutcome::Generated { digest, .. } = out else {
            panic!("expected a digest, got {:?}", out);
        };
        assert_eq!(digest.total, 1);
    }

    #[tokio::test]
    async fn digest_combines_cold_and_late_hot_lines() {
        let store = InMemoryStore::new();
        store.put_hot(day(), ndjson(&[record("p", "A", &[])]));
        store.relocate(day()).await.unwrap();
        store.put_hot(day(), ndjson(&[record("q", "B", &[])]));

        let out = generate_digest(&store, day(), Utc::now()).await.unwrap();
        let DigestOutcome::Generated { digest, .. } = out else {
            panic!("expected a digest, got {:?}", out);
        };
        assert_eq!(digest.total, 2);
        assert_eq!(
            digest.by_platform,
            vec![("p".to_string(), 1), ("q".to_string(), 1)]
        );
    }

    #[test]
    fn markdown_lists_sections() {
        let parsed = ParsedPartition {
            records: vec![record("telegram", "Alice", &["#灵感"])],
            unparseable: 1,
        };
        let d = aggregate(day(), &parsed);
        let at = Utc.with_ymd_and_hms(2026, 2, 18, 2, 0, 0).unwrap();
        let md = render_markdown(&d, at);
        assert!(md.starts_with("# Message digest - 2026-02-17\n"));
        assert!(md.contains("- Total messages: 1\n"));
        assert!(md.contains("- Unparseable lines skipped: 1\n"));
        assert!(md.contains("- telegram: 1\n"));
        assert!(md.contains("- Alice: 1\n"));
        assert!(md.contains("### Tags\n\n- #灵感: 1\n"));
        assert!(md.ends_with("_Generated at: 2026-02-18T02:00:00.000Z_\n"));
    }

    #[test]
    fn markdown_omits_tags_section_when_untagged() {
        let d = aggregate(
            day(),
            &ParsedPartition {
                records: vec![record("p", "A", &[])],
                unparseable: 0,
            },
        );
        assert!(!render_markdown(&d, Utc::now()).contains("### Tags"));
    }

    #[tokio::test]
    async fn missing_partition_is_no_data() {
        let store = InMemoryStore::new();
        let out = generate_digest(&store, day(), Utc::now()).await.unwrap();
        assert_eq!(out, DigestOutcome::NoData);
        assert!(store.digest(day()).is_none());
    }

    #[tokio::test]
    async fn regeneration_is_idempotent() {
        let store = InMemoryStore::new();
        store.put_hot(day(), &ndjson(&[record("p", "A", &["#t"])]));
        let at = Utc.with_ymd_and_hms(2026, 2, 18, 2, 0, 0).unwrap();

        let first = generate_digest(&store, day(), at).await.unwrap();
        let doc1 = store.digest(day()).unwrap();
        let second = generate_digest(&store, day(), at).await.unwrap();
        let doc2 = store.digest(day()).unwrap();

        assert_eq!(first, second);
        assert_eq!(doc1, doc2);
    }
}
