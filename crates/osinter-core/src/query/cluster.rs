use serde_json::json;

use super::{BoolClauses, QueryOptions, SearchQuery};
use crate::models::Cluster;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSearchQuery {
    pub options: QueryOptions,
    pub cluster_nr: Option<i64>,
    /// Leave out the outlier bucket (`nr = -1`).
    pub exclude_outliers: bool,
}

impl Default for ClusterSearchQuery {
    fn default() -> Self {
        Self {
            options: QueryOptions {
                sort_by: Some("document_count".to_string()),
                ..QueryOptions::default()
            },
            cluster_nr: None,
            exclude_outliers: true,
        }
    }
}

impl SearchQuery for ClusterSearchQuery {
    type Kind = Cluster;

    fn options(&self) -> &QueryOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut QueryOptions {
        &mut self.options
    }

    fn apply_filters(&self, clauses: &mut BoolClauses) {
        if let Some(nr) = self.cluster_nr {
            clauses
                .filter
                .push(json!({ "term": { "nr": { "value": nr } } }));
        }
        if self.exclude_outliers {
            clauses
                .must_not
                .push(json!({ "term": { "nr": { "value": -1 } } }));
        }
    }

    fn everything() -> Self {
        Self {
            options: QueryOptions {
                limit: 0,
                ..QueryOptions::default()
            },
            cluster_nr: None,
            exclude_outliers: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Completeness;
    use crate::query::{build_query, QueryContext};

    #[test]
    fn defaults_sort_by_size_and_skip_outliers() {
        let body = build_query(
            &ClusterSearchQuery::default(),
            &QueryContext::default(),
            &Completeness::Base,
        )
        .unwrap();
        assert_eq!(body["sort"][0], json!({ "document_count": "desc" }));
        assert_eq!(
            body["query"]["bool"]["must_not"],
            json!([{ "term": { "nr": { "value": -1 } } }])
        );
    }

    #[test]
    fn cluster_number_zero_is_a_real_filter() {
        let query = ClusterSearchQuery {
            cluster_nr: Some(0),
            exclude_outliers: false,
            ..Default::default()
        };
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        assert_eq!(
            body["query"]["bool"]["filter"],
            json!([{ "term": { "nr": { "value": 0 } } }])
        );
        assert!(body["query"]["bool"]["must_not"].as_array().unwrap().is_empty());
    }
}
