use std::collections::BTreeSet;

use serde_json::json;

use super::{BoolClauses, QueryOptions, SearchQuery};
use crate::models::Article;

/// Which timestamp the date bounds of an article search apply to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArticleDateField {
    #[default]
    PublishDate,
    InsertedAt,
}

impl ArticleDateField {
    pub fn as_str(self) -> &'static str {
        match self {
            ArticleDateField::PublishDate => "publish_date",
            ArticleDateField::InsertedAt => "inserted_at",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleSearchQuery {
    pub options: QueryOptions,
    pub date_field: ArticleDateField,
    /// Profiles to include. Matched case-insensitively.
    pub sources: BTreeSet<String>,
    /// Profiles to leave out. Matched case-insensitively.
    pub exclude_sources: BTreeSet<String>,
    /// Only articles assigned to this ML cluster.
    pub cluster_id: Option<String>,
    /// Only articles tagged with this CVE identifier.
    pub cve: Option<String>,
}

fn lowercased(profiles: &BTreeSet<String>) -> Vec<String> {
    profiles
        .iter()
        .map(|p| p.to_lowercase())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl SearchQuery for ArticleSearchQuery {
    type Kind = Article;

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
        if !self.sources.is_empty() {
            clauses
                .filter
                .push(json!({ "terms": { "profile": lowercased(&self.sources) } }));
        }
        if !self.exclude_sources.is_empty() {
            clauses
                .must_not
                .push(json!({ "terms": { "profile": lowercased(&self.exclude_sources) } }));
        }
        if let Some(cluster) = &self.cluster_id {
            clauses
                .filter
                .push(json!({ "term": { "ml.cluster": { "value": cluster } } }));
        }
        if let Some(cve) = &self.cve {
            clauses
                .filter
                .push(json!({ "term": { "tags.interesting.values": { "value": cve } } }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Completeness;
    use crate::query::{build_query, QueryContext};

    #[test]
    fn source_filters_are_lowercased() {
        let query = ArticleSearchQuery {
            sources: ["BleepingComputer".to_string(), "bleepingcomputer".to_string()].into(),
            exclude_sources: ["TheRecord".to_string()].into(),
            ..Default::default()
        };
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        assert_eq!(
            body["query"]["bool"]["filter"],
            json!([{ "terms": { "profile": ["bleepingcomputer"] } }])
        );
        assert_eq!(
            body["query"]["bool"]["must_not"],
            json!([{ "terms": { "profile": ["therecord"] } }])
        );
    }

    #[test]
    fn cluster_and_cve_filters() {
        let query = ArticleSearchQuery {
            cluster_id: Some("12".into()),
            cve: Some("CVE-2024-3094".into()),
            date_field: ArticleDateField::InsertedAt,
            ..Default::default()
        };
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        let filter = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filter.len(), 2);
        assert_eq!(filter[0]["term"]["ml.cluster"]["value"], "12");
        assert_eq!(
            filter[1]["term"]["tags.interesting.values"]["value"],
            "CVE-2024-3094"
        );
        assert_eq!(query.date_field(), Some("inserted_at"));
    }
}
