//! Topic clusters produced by the offline clustering job.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{trimmed, trimmed_opt, Document, DocumentKind};
use crate::query::ClusterSearchQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cluster;

impl DocumentKind for Cluster {
    type Base = BaseCluster;
    type Full = FullCluster;
    type Partial = PartialCluster;
    type Query = ClusterSearchQuery;

    const NAME: &'static str = "cluster";
    const UNIQUE_FIELD: &'static str = "nr";
    const BASE_FIELDS: &'static [&'static str] = &[
        "nr",
        "document_count",
        "title",
        "description",
        "summary",
        "keywords",
    ];
    const FULL_FIELDS: &'static [&'static str] = &["documents", "dating"];
    const SEARCH_FIELDS: &'static [(&'static str, u32)] =
        &[("title", 1), ("description", 1), ("summary", 1)];

    fn mappings() -> Value {
        json!({
            "properties": {
                "nr": { "type": "integer" },
                "document_count": { "type": "integer" },
                "title": { "type": "text" },
                "description": { "type": "text" },
                "summary": { "type": "text" },
                "keywords": { "type": "keyword" },
                "documents": { "type": "keyword" },
                "dating": { "type": "date" }
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterHighlights {
    pub title: Option<Vec<String>>,
    pub description: Option<Vec<String>>,
    pub summary: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseCluster {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Cluster number; `-1` marks the outlier bucket.
    pub nr: i64,
    pub document_count: u64,
    #[serde(deserialize_with = "trimmed")]
    pub title: String,
    #[serde(deserialize_with = "trimmed")]
    pub description: String,
    #[serde(deserialize_with = "trimmed")]
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing)]
    pub highlights: Option<ClusterHighlights>,
}

impl BaseCluster {
    pub fn is_outlier(&self) -> bool {
        self.nr == -1
    }
}

impl Document for BaseCluster {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullCluster {
    #[serde(flatten)]
    pub base: BaseCluster,
    /// Ids of the member articles.
    pub documents: BTreeSet<String>,
    pub dating: BTreeSet<DateTime<Utc>>,
}

impl Document for FullCluster {
    fn id(&self) -> Option<&str> {
        self.base.id()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialCluster {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub nr: Option<i64>,
    pub document_count: Option<u64>,
    #[serde(deserialize_with = "trimmed_opt")]
    pub title: Option<String>,
    #[serde(deserialize_with = "trimmed_opt")]
    pub description: Option<String>,
    #[serde(deserialize_with = "trimmed_opt")]
    pub summary: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub documents: Option<BTreeSet<String>>,
    pub dating: Option<BTreeSet<DateTime<Utc>>>,
    #[serde(skip_serializing)]
    pub highlights: Option<ClusterHighlights>,
}

impl Document for PartialCluster {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{validate_full, validate_partial, RequiredFields};

    fn payload() -> Value {
        json!({
            "id": "c7",
            "nr": 7,
            "document_count": 2,
            "title": "Phishing wave",
            "description": "Credential phishing against banks",
            "summary": "Several banks were targeted.",
            "keywords": ["phishing", "banking"],
            "documents": ["a1", "a2", "a1"],
            "dating": ["2024-03-01T10:00:00Z", "2024-03-02T10:00:00Z"]
        })
    }

    #[test]
    fn documents_are_a_set() {
        let doc = validate_full::<Cluster>(&payload()).unwrap();
        assert_eq!(doc.documents.len(), 2);
        assert!(!doc.base.is_outlier());
    }

    #[test]
    fn naive_dating_is_rejected() {
        let mut raw = payload();
        raw["dating"] = json!(["2024-03-01T10:00:00"]);
        let err = validate_full::<Cluster>(&raw).unwrap_err();
        assert_eq!(err.id.as_deref(), Some("c7"));
        assert_eq!(err.kind, "cluster");
    }

    #[test]
    fn partial_by_number() {
        let raw = json!({ "id": "c7", "nr": -1 });
        let required = RequiredFields::<Cluster>::new(["nr"]).unwrap();
        let doc = validate_partial::<Cluster>(&raw, &required).unwrap();
        assert_eq!(doc.nr, Some(-1));
    }
}
