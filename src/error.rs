//! Typed errors that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error` with context attached at the
//! point of failure.

/// A raw message that cannot be normalized into a record.
///
/// Nothing is persisted when this is returned. The CLI maps it to exit code 2.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    #[error("field `{field}` must be {expected}, got {found}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("field `timestamp` is not an ISO-8601 date-time: {0:?}")]
    Timestamp(String),
}

impl ValidationError {
    /// True if `err` or anything in its cause chain is a validation failure.
    pub fn is_in(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| cause.is::<ValidationError>())
    }
}

/// JSON type name, for error messages.
pub(crate) fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
