//! Error types shared by the model and the query builder.
//!
//! - [`ValidationError`]: bad data in one document. Recovered by rejecting
//!   that document and continuing with the rest of the batch.
//! - [`ContractError`]: a programming mistake by the caller. Aborts the
//!   call that triggered it.

use thiserror::Error;

/// A single document failed validation.
///
/// Carries the document id and title when they could be read from the raw
/// payload so a reject can be located in logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "invalid {kind} document {}: {reason}",
    .id.as_deref().unwrap_or("<unsaved>")
)]
pub struct ValidationError {
    pub kind: &'static str,
    pub id: Option<String>,
    pub title: Option<String>,
    pub reason: String,
}

impl ValidationError {
    pub fn new(kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            id: None,
            title: None,
            reason: reason.into(),
        }
    }

    /// Attach the id and title found in a raw payload.
    pub fn located(mut self, raw: &serde_json::Value) -> Self {
        self.id = raw.get("id").and_then(|v| v.as_str()).map(str::to_string);
        self.title = raw
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        self
    }
}

/// The caller broke the contract of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// Partial completeness was requested with an empty field list.
    #[error("partial completeness requires at least one required field")]
    MissingRequiredFields,

    /// A field name that the document kind does not model.
    #[error("field '{field}' is not modeled on {kind} documents")]
    UnknownField { kind: &'static str, field: String },

    /// Aggregations combined with a result count that needs pagination.
    #[error("aggregations are not allowed with multi-page queries (limit {limit}, page size {page_size})")]
    AggregationsWithLargeQuery { limit: usize, page_size: usize },

    /// An update was requested for a document that was never saved.
    #[error("{kind} document '{unique}' has no id and cannot be updated")]
    MissingId { kind: &'static str, unique: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validation_error_reads_location_from_raw() {
        let raw = json!({"id": "abc", "title": "Some title"});
        let err = ValidationError::new("article", "description too short").located(&raw);
        assert_eq!(err.id.as_deref(), Some("abc"));
        assert_eq!(err.title.as_deref(), Some("Some title"));
        assert_eq!(
            err.to_string(),
            "invalid article document abc: description too short"
        );
    }

    #[test]
    fn validation_error_without_id_displays_placeholder() {
        let err = ValidationError::new("cve", "missing cve");
        assert!(err.to_string().contains("<unsaved>"));
    }
}
