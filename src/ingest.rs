//! Stream writer: normalize, deduplicate, append.
//!
//! A raw message (any JSON object) becomes a [`MessageRecord`] with every
//! optional field defaulted, is tagged, fingerprinted, checked against the
//! [`FingerprintIndex`], and appended as one line to the hot partition for its
//! date.
//!
//! The index claim happens before the append. If the append fails the claim
//! is released and the error is returned; the message is never reported as
//! stored when it was not.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::digest::parse_partition;
use crate::error::{json_type, ValidationError};
use crate::identity::{derive_content_fingerprint, derive_message_id};
use crate::models::{
    Content, FingerprintEntry, MessageRecord, Sender, DEFAULT_CONTENT_TYPE, DEFAULT_SENDER_ID,
    DEFAULT_SENDER_NAME, DEFAULT_SENDER_ROLE,
};
use crate::store::{self, FingerprintIndex, PartitionStore, Tier};
use crate::tags::TagExtractor;

/// What happened to one ingested message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Appended to its partition.
    Stored(MessageRecord),
    /// Fingerprint already seen; nothing written.
    Duplicate(MessageRecord),
}

impl IngestOutcome {
    pub fn record(&self) -> &MessageRecord {
        match self {
            IngestOutcome::Stored(r) | IngestOutcome::Duplicate(r) => r,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate(_))
    }
}

/// A normalized record plus the partition it belongs to.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub record: MessageRecord,
    pub partition: NaiveDate,
}

/// CLI entry point for `marc ingest`.
pub async fn run_ingest(config: &Config, payload: &str) -> Result<IngestOutcome> {
    let raw: Value = serde_json::from_str(payload).map_err(ValidationError::Json)?;
    let tags = config.tags.extractor()?;
    let (partitions, index) = store::open(config).await?;

    let outcome = ingest(&partitions, &index, &tags, &raw, Utc::now()).await;
    index.close().await;
    let outcome = outcome?;

    match &outcome {
        IngestOutcome::Stored(record) => {
            println!("{}", serde_json::to_string_pretty(record)?);
        }
        IngestOutcome::Duplicate(record) => {
            println!("duplicate: {}", record.msg_id);
        }
    }
    Ok(outcome)
}

/// Normalize `raw` and persist it unless its fingerprint was already seen.
pub async fn ingest(
    partitions: &dyn PartitionStore,
    index: &dyn FingerprintIndex,
    tags: &TagExtractor,
    raw: &Value,
    now: DateTime<Utc>,
) -> Result<IngestOutcome> {
    let NormalizedMessage { record, partition } = normalize(raw, tags, now)?;

    let entry = FingerprintEntry::for_record(&record, partition);
    if !index.claim(&entry).await? {
        tracing::info!(
            msg_id = %record.msg_id,
            context_hash = %record.context_hash,
            "skip duplicate"
        );
        return Ok(IngestOutcome::Duplicate(record));
    }

    let line = serde_json::to_string(&record)?;
    if let Err(err) = partitions.append(partition, &line).await {
        if let Err(release_err) = index.release(&record.context_hash).await {
            tracing::warn!(
                context_hash = %record.context_hash,
                error = %release_err,
                "could not release fingerprint after failed write; run `marc reindex`"
            );
        }
        return Err(err.context(format!("message {} was not stored", record.msg_id)));
    }

    tracing::info!(
        msg_id = %record.msg_id,
        partition = %partition,
        tags = record.tags.len(),
        "write"
    );
    Ok(IngestOutcome::Stored(record))
}

/// Fill defaults, derive id, fingerprint and tags.
pub fn normalize(
    raw: &Value,
    tags: &TagExtractor,
    now: DateTime<Utc>,
) -> Result<NormalizedMessage, ValidationError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ValidationError::NotAnObject(json_type(raw)))?;

    let platform = opt_text(obj, "platform", "platform")?.ok_or(ValidationError::Missing("platform"))?;

    let (timestamp, timestamp_ms, partition) = match opt_text(obj, "timestamp", "timestamp")? {
        Some(ts) => {
            let (ms, date) =
                parse_timestamp(&ts).ok_or_else(|| ValidationError::Timestamp(ts.clone()))?;
            (ts, ms, date)
        }
        None => (
            now.to_rfc3339_opts(SecondsFormat::Millis, true),
            now.timestamp_millis(),
            now.date_naive(),
        ),
    };

    let sender = match sub_object(obj, "sender")? {
        Some(s) => Sender {
            id: opt_id(s, "id", "sender.id")?.unwrap_or_else(|| DEFAULT_SENDER_ID.to_string()),
            name: opt_text(s, "name", "sender.name")?
                .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string()),
            role: opt_text(s, "role", "sender.role")?
                .unwrap_or_else(|| DEFAULT_SENDER_ROLE.to_string()),
        },
        None => Sender::default(),
    };

    let content = match sub_object(obj, "content")? {
        Some(c) => Content {
            kind: opt_text(c, "type", "content.type")?
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            body: opt_text(c, "body", "content.body")?.unwrap_or_default(),
        },
        None => Content {
            kind: DEFAULT_CONTENT_TYPE.to_string(),
            body: String::new(),
        },
    };

    let msg_id = match opt_id(obj, "msg_id", "msg_id")? {
        Some(id) => id,
        None => derive_message_id(&platform, timestamp_ms, &content.body),
    };

    let context_hash = derive_content_fingerprint(&content.body, &timestamp, &sender.id);
    let tags = tags.extract(&content.body);

    let record = MessageRecord {
        msg_id,
        platform,
        chat_id: opt_id(obj, "chat_id", "chat_id")?,
        thread_id: opt_id(obj, "thread_id", "thread_id")?,
        sender,
        timestamp,
        content,
        reply_to: opt_id(obj, "reply_to", "reply_to")?,
        context_hash,
        tags,
    };

    Ok(NormalizedMessage { record, partition })
}

/// Epoch milliseconds and partition date of an ISO-8601 timestamp.
///
/// The date is the one written in the string (the offset's local date).
/// Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(ts: &str) -> Option<(i64, NaiveDate)> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some((dt.timestamp_millis(), dt.date_naive()));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(ts, fmt) {
            return Some((naive.and_utc().timestamp_millis(), naive.date()));
        }
    }
    None
}

/// A string field. Absent, null and empty all mean "use the default".
fn opt_text(
    obj: &Map<String, Value>,
    key: &str,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ValidationError::WrongType {
            field,
            expected: "a string",
            found: json_type(other),
        }),
    }
}

/// An opaque identifier: a string, or an integer stored as its decimal form.
fn opt_id(
    obj: &Map<String, Value>,
    key: &str,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match obj.get(key) {
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(Some(n.to_string())),
        Some(Value::Number(n)) => Err(ValidationError::WrongType {
            field,
            expected: "a string or integer",
            found: if n.is_f64() { "a fractional number" } else { "a number" },
        }),
        Some(Value::String(_)) | Some(Value::Null) | None => opt_text(obj, key, field),
        Some(other) => Err(ValidationError::WrongType {
            field,
            expected: "a string or integer",
            found: json_type(other),
        }),
    }
}

fn sub_object<'a>(
    obj: &'a Map<String, Value>,
    key: &'static str,
) -> Result<Option<&'a Map<String, Value>>, ValidationError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(m)) => Ok(Some(m)),
        Some(other) => Err(ValidationError::WrongType {
            field: key,
            expected: "an object",
            found: json_type(other),
        }),
    }
}

/// Counts from a [`rebuild_index`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub partitions: usize,
    pub records: usize,
    pub fingerprints: usize,
    pub unparseable: usize,
}

/// Rebuild the fingerprint index from every hot and cold partition.
pub async fn rebuild_index(
    partitions: &dyn PartitionStore,
    index: &dyn FingerprintIndex,
) -> Result<ReindexReport> {
    let mut report = ReindexReport::default();
    let mut entries = Vec::new();

    for tier in [Tier::Cold, Tier::Hot] {
        for date in partitions.list(tier).await? {
            let Some(bytes) = partitions.read(tier, date).await? else {
                continue;
            };
            let parsed = parse_partition(&bytes);
            report.partitions += 1;
            report.records += parsed.records.len();
            report.unparseable += parsed.unparseable;
            entries.extend(
                parsed
                    .records
                    .iter()
                    .map(|r| FingerprintEntry::for_record(r, date)),
            );
        }
    }

    report.fingerprints = index
        .rebuild(&entries)
        .await
        .context("Failed to rebuild fingerprint index")?;
    Ok(report)
}

/// CLI entry point for `marc reindex`.
pub async fn run_reindex(config: &Config) -> Result<()> {
    let (partitions, index) = store::open(config).await?;
    let report = rebuild_index(&partitions, &index).await;
    index.close().await;
    let report = report?;

    println!("reindex");
    println!("  partitions scanned: {}", report.partitions);
    println!("  records: {}", report.records);
    println!("  fingerprints: {}", report.fingerprints);
    if report.unparseable > 0 {
        println!("  unparseable lines skipped: {}", report.unparseable);
    }
    println!("ok");
    Ok(())
}
