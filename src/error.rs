//! Errors surfaced by the store client.

use osinter_core::ContractError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The caller broke an operation's contract. Never retried.
    #[error(transparent)]
    Contract(#[from] ContractError),

    /// Connection failure or timeout talking to the backend.
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    /// The backend answered with a body we could not interpret.
    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single-document operation failed; carries the document's location.
    #[error("{kind} document '{unique}': {source}")]
    Document {
        kind: &'static str,
        unique: String,
        #[source]
        source: Box<StoreError>,
    },

    /// The transform worker pool could not be started or panicked.
    #[error("transform workers failed: {0}")]
    Worker(String),
}

impl StoreError {
    /// Whether this error is a programming mistake rather than a runtime failure.
    pub fn is_contract(&self) -> bool {
        match self {
            StoreError::Contract(_) => true,
            StoreError::Document { source, .. } => source.is_contract(),
            _ => false,
        }
    }

    pub(crate) fn located(self, kind: &'static str, unique: impl Into<String>) -> Self {
        StoreError::Document {
            kind,
            unique: unique.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_errors_stay_contract_errors_when_located() {
        let err = StoreError::from(ContractError::MissingRequiredFields).located("article", "u");
        assert!(err.is_contract());
        assert!(err.to_string().starts_with("article document 'u'"));

        let err = StoreError::Malformed("x".into()).located("cve", "CVE-1");
        assert!(!err.is_contract());
    }
}
