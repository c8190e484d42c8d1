//! Message identifiers and content fingerprints.
//!
//! Both functions are pure and total. Callers substitute field defaults
//! (see [`crate::models`]) before calling.

use sha2::{Digest, Sha256};

/// Length of a [`derive_content_fingerprint`] result, in hex characters.
pub const FINGERPRINT_LEN: usize = 16;

const BODY_HASH_LEN: usize = 8;

/// `msg_{platform}_{epoch_ms}_{md5(body)[..8]}`.
pub fn derive_message_id(platform: &str, timestamp_ms: i64, body: &str) -> String {
    let digest = format!("{:x}", md5::compute(body.as_bytes()));
    format!(
        "msg_{}_{}_{}",
        platform,
        timestamp_ms,
        &digest[..BODY_HASH_LEN]
    )
}

/// Truncated SHA-256 of `{body}_{timestamp}_{sender_id}`.
///
/// A dedup heuristic, never a primary key: 64 bits is not collision-free.
pub fn derive_content_fingerprint(body: &str, timestamp: &str, sender_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hasher.update(b"_");
    hasher.update(timestamp.as_bytes());
    hasher.update(b"_");
    hasher.update(sender_id.as_bytes());
    let mut hash = hex::encode(hasher.finalize());
    hash.truncate(FINGERPRINT_LEN);
    hash
}
