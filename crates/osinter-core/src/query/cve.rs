use std::collections::BTreeSet;

use serde_json::json;

use super::{BoolClauses, QueryOptions, SearchQuery};
use crate::models::Cve;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CveDateField {
    #[default]
    PublishDate,
    ModifiedDate,
}

impl CveDateField {
    pub fn as_str(self) -> &'static str {
        match self {
            CveDateField::PublishDate => "publish_date",
            CveDateField::ModifiedDate => "modified_date",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CveSearchQuery {
    pub options: QueryOptions,
    pub date_field: CveDateField,
    /// Restrict to these CVE identifiers. Empty means no restriction.
    pub cves: BTreeSet<String>,
    pub min_doc_count: Option<u64>,
}

impl Default for CveSearchQuery {
    fn default() -> Self {
        Self {
            options: QueryOptions {
                sort_by: Some("document_count".to_string()),
                ..QueryOptions::default()
            },
            date_field: CveDateField::default(),
            cves: BTreeSet::new(),
            min_doc_count: None,
        }
    }
}

impl SearchQuery for CveSearchQuery {
    type Kind = Cve;

    fn options(&self) -> &QueryOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut QueryOptions {
        &mut self.options
    }

    fn date_field(&self) -> Option<&'static str> {
        Some(self.date_field.as_str())
    }

    fn apply_filters(&self, clauses: &mut BoolClauses) {
        if !self.cves.is_empty() {
            clauses
                .filter
                .push(json!({ "terms": { "cve": self.cves } }));
        }
        if let Some(min) = self.min_doc_count {
            clauses
                .filter
                .push(json!({ "range": { "document_count": { "gte": min } } }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Completeness;
    use crate::query::{build_query, QueryContext};
    use chrono::{TimeZone, Utc};

    #[test]
    fn cve_filters_and_date_field() {
        let query = CveSearchQuery {
            options: QueryOptions {
                last_date: Some(Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()),
                ..Default::default()
            },
            date_field: CveDateField::ModifiedDate,
            cves: ["CVE-2024-3094".to_string()].into(),
            min_doc_count: Some(3),
        };
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        assert_eq!(
            body["query"]["bool"]["filter"],
            json!([
                { "range": { "modified_date": { "lte": "2024-06-30T12:00:00Z" } } },
                { "terms": { "cve": ["CVE-2024-3094"] } },
                { "range": { "document_count": { "gte": 3 } } }
            ])
        );
        assert_eq!(body["sort"][0], json!({ "document_count": "desc" }));
    }
}
