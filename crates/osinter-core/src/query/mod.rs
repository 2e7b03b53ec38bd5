//! Search requests and the backend query payload builder.
//!
//! A search request is a kind-specific struct ([`ArticleSearchQuery`],
//! [`ClusterSearchQuery`], [`CveSearchQuery`]) wrapping the shared
//! [`QueryOptions`]. [`build_query`] renders any of them, together with a
//! [`Completeness`] mode, into the JSON body of a `_search` request.
//!
//! # Payload rules
//!
//! 1. `_source` projection follows the completeness mode: the Base field
//!    list, the caller's Partial field list, or everything for Full. The
//!    kind's excluded fields are always dropped.
//! 2. Highlighting wraps matches in every searched field with the marker.
//! 3. A search term becomes a weighted `multi_match` that must match.
//! 4. Semantic text adds one `text_expansion` clause per semantic field to
//!    `should`, so it adds to the lexical score instead of replacing it.
//! 5. Sort priority: explicit `sort_by`, then `_score` when any relevance
//!    signal is present, then the unique field as a tie-break when the
//!    query may span pages, then `_doc`.
//! 6. An id filter holding an empty set matches nothing.
//! 7. Aggregations are refused when the query may span pages.

mod article;
mod cluster;
mod cve;

use std::collections::BTreeSet;
use std::fmt::Debug;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ContractError;
use crate::models::{Completeness, DocumentKind};

pub use article::{ArticleDateField, ArticleSearchQuery};
pub use cluster::ClusterSearchQuery;
pub use cve::{CveDateField, CveSearchQuery};

/// Largest result window the backend serves in one request. Also the
/// per-request term-filter limit.
pub const PAGE_SIZE: usize = 10_000;

pub const DEFAULT_HIGHLIGHT_MARKER: &str = "**";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Options shared by every document kind's search request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Maximum number of documents; `0` means all of them.
    pub limit: usize,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    /// Free text matched lexically against the kind's search fields.
    pub search_term: Option<String>,
    /// Free text ranked against the kind's semantic fields.
    pub semantic_search: Option<String>,
    /// `Some(empty)` scopes the query to zero documents.
    pub ids: Option<BTreeSet<String>>,
    pub first_date: Option<DateTime<Utc>>,
    pub last_date: Option<DateTime<Utc>>,
    pub highlight: bool,
    pub highlight_marker: String,
    /// Dropped from `_source` on top of the kind's own exclusions.
    pub exclude_fields: Vec<String>,
    /// Raw aggregation definitions passed through to the backend.
    pub aggregations: Option<Value>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: PAGE_SIZE,
            sort_by: None,
            sort_order: SortOrder::default(),
            search_term: None,
            semantic_search: None,
            ids: None,
            first_date: None,
            last_date: None,
            highlight: false,
            highlight_marker: DEFAULT_HIGHLIGHT_MARKER.to_string(),
            exclude_fields: Vec::new(),
            aggregations: None,
        }
    }
}

/// Filter clauses of the top-level `bool` query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolClauses {
    pub filter: Vec<Value>,
    pub must: Vec<Value>,
    pub should: Vec<Value>,
    pub must_not: Vec<Value>,
}

/// A kind-specific search request.
pub trait SearchQuery: Clone + Default + Debug + Send + Sync + 'static {
    type Kind: DocumentKind;

    fn options(&self) -> &QueryOptions;

    fn options_mut(&mut self) -> &mut QueryOptions;

    /// Field the `first_date`/`last_date` bounds apply to, if the kind has one.
    fn date_field(&self) -> Option<&'static str> {
        None
    }

    /// Append the kind's own filters.
    fn apply_filters(&self, clauses: &mut BoolClauses);

    /// A request for every document of the kind, with no default narrowing.
    fn everything() -> Self {
        let mut query = Self::default();
        let options = query.options_mut();
        options.limit = 0;
        options.sort_by = None;
        query
    }
}

/// Deployment facts the builder needs beyond the request itself.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    /// Semantic expansion model; semantic ranking is skipped without one.
    pub semantic_model: Option<&'a str>,
    pub page_size: usize,
}

impl Default for QueryContext<'_> {
    fn default() -> Self {
        Self {
            semantic_model: None,
            page_size: PAGE_SIZE,
        }
    }
}

impl QueryContext<'_> {
    /// Whether a request for `limit` documents needs more than one page.
    pub fn is_multi_page(&self, limit: usize) -> bool {
        limit == 0 || limit > self.page_size
    }
}

/// Render a search request into a backend `_search` body.
pub fn build_query<Q: SearchQuery>(
    query: &Q,
    ctx: &QueryContext<'_>,
    completeness: &Completeness<Q::Kind>,
) -> Result<Value, ContractError> {
    let opts = query.options();
    let multi_page = ctx.is_multi_page(opts.limit);

    if opts.aggregations.is_some() && multi_page {
        return Err(ContractError::AggregationsWithLargeQuery {
            limit: opts.limit,
            page_size: ctx.page_size,
        });
    }

    let mut clauses = BoolClauses::default();
    let lexical = lexical_clause::<Q::Kind>(opts);
    let semantic = semantic_clauses::<Q::Kind>(opts, ctx);
    let relevance = lexical.is_some() || !semantic.is_empty();
    clauses.must.extend(lexical.clone());
    clauses.should.extend(semantic);

    match &opts.ids {
        Some(ids) if ids.is_empty() => clauses.filter.push(json!({ "match_none": {} })),
        Some(ids) => clauses.filter.push(json!({ "terms": { "_id": ids } })),
        None => {}
    }

    if let Some(field) = query.date_field() {
        let mut range = Map::new();
        if let Some(first) = opts.first_date {
            range.insert("gte".into(), json!(rfc3339(first)));
        }
        if let Some(last) = opts.last_date {
            range.insert("lte".into(), json!(rfc3339(last)));
        }
        if !range.is_empty() {
            clauses.filter.push(json!({ "range": { field: range } }));
        }
    }

    query.apply_filters(&mut clauses);

    let mut bool_query = Map::new();
    bool_query.insert("filter".into(), Value::Array(clauses.filter));
    bool_query.insert("must".into(), Value::Array(clauses.must));
    if lexical.is_none() && !clauses.should.is_empty() {
        bool_query.insert("minimum_should_match".into(), json!(1));
    }
    bool_query.insert("should".into(), Value::Array(clauses.should));
    bool_query.insert("must_not".into(), Value::Array(clauses.must_not));

    let size = if multi_page { ctx.page_size } else { opts.limit };

    let mut body = Map::new();
    body.insert("size".into(), json!(size));
    body.insert(
        "sort".into(),
        Value::Array(sort_keys::<Q::Kind>(opts, relevance, multi_page)),
    );
    body.insert("query".into(), json!({ "bool": bool_query }));
    body.insert("_source".into(), source_filter(opts, completeness));

    if opts.highlight {
        let fields: Map<String, Value> = Q::Kind::SEARCH_FIELDS
            .iter()
            .map(|(field, _)| (field.to_string(), json!({})))
            .collect();
        body.insert(
            "highlight".into(),
            json!({
                "pre_tags": [opts.highlight_marker],
                "post_tags": [opts.highlight_marker],
                "fields": fields,
            }),
        );
    }

    if let Some(aggs) = &opts.aggregations {
        body.insert("aggs".into(), aggs.clone());
    }

    Ok(Value::Object(body))
}

fn lexical_clause<K: DocumentKind>(opts: &QueryOptions) -> Option<Value> {
    let term = opts.search_term.as_deref().filter(|t| !t.trim().is_empty())?;
    if K::SEARCH_FIELDS.is_empty() {
        return None;
    }
    let fields: Vec<String> = K::SEARCH_FIELDS
        .iter()
        .map(|(field, boost)| format!("{}^{}", field, boost))
        .collect();
    Some(json!({ "multi_match": { "query": term, "fields": fields } }))
}

fn semantic_clauses<K: DocumentKind>(opts: &QueryOptions, ctx: &QueryContext<'_>) -> Vec<Value> {
    let (model, text) = match (
        ctx.semantic_model,
        opts.semantic_search.as_deref().filter(|t| !t.trim().is_empty()),
    ) {
        (Some(model), Some(text)) => (model, text),
        _ => return Vec::new(),
    };

    K::SEMANTIC_FIELDS
        .iter()
        .map(|semantic| {
            let clause = json!({
                "text_expansion": {
                    semantic.field: {
                        "model_id": model,
                        "model_text": text,
                        "boost": semantic.boost,
                    }
                }
            });
            match semantic.nested_path {
                Some(path) => json!({ "nested": { "path": path, "query": clause } }),
                None => clause,
            }
        })
        .collect()
}

fn sort_keys<K: DocumentKind>(opts: &QueryOptions, relevance: bool, multi_page: bool) -> Vec<Value> {
    let mut sort = Vec::new();
    let explicit = opts.sort_by.as_deref().filter(|s| !s.is_empty());
    if let Some(field) = explicit {
        sort.push(json!({ field: opts.sort_order.as_str() }));
    }
    if relevance {
        sort.push(json!({ "_score": "desc" }));
    }
    if multi_page && explicit != Some(K::UNIQUE_FIELD) {
        sort.push(json!({ K::UNIQUE_FIELD: "asc" }));
    }
    sort.push(json!("_doc"));
    sort
}

fn source_filter<K: DocumentKind>(opts: &QueryOptions, completeness: &Completeness<K>) -> Value {
    let mut excludes: Vec<String> = K::EXCLUDED_FIELDS.iter().map(|f| f.to_string()).collect();
    for field in &opts.exclude_fields {
        if !excludes.contains(field) {
            excludes.push(field.clone());
        }
    }

    let includes: Option<Vec<String>> = match completeness {
        Completeness::Base => Some(K::essential_fields().iter().map(|f| f.to_string()).collect()),
        Completeness::Full => None,
        Completeness::Partial(required) => Some(
            required
                .fields()
                .iter()
                .filter(|f| f.as_str() != "id")
                .cloned()
                .collect(),
        ),
    };

    match includes {
        // An empty includes list reads as "every field" on the backend.
        Some(includes) if includes.is_empty() => json!(false),
        Some(includes) => json!({ "includes": includes, "excludes": excludes }),
        None => json!({ "excludes": excludes }),
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Article, Cluster};
    use chrono::TimeZone;

    fn article_query(options: QueryOptions) -> ArticleSearchQuery {
        ArticleSearchQuery {
            options,
            ..Default::default()
        }
    }

    fn ctx_with_model() -> QueryContext<'static> {
        QueryContext {
            semantic_model: Some(".elser_model_2"),
            page_size: PAGE_SIZE,
        }
    }

    #[test]
    fn base_projection_uses_base_fields() {
        let body = build_query(
            &ArticleSearchQuery::default(),
            &QueryContext::default(),
            &Completeness::Base,
        )
        .unwrap();
        let includes = body["_source"]["includes"].as_array().unwrap();
        assert_eq!(includes.len(), Article::BASE_FIELDS.len());
        assert_eq!(body["_source"]["excludes"], json!(["embeddings"]));
        assert_eq!(body["size"], 10_000);
    }

    #[test]
    fn full_projection_has_no_includes() {
        let body = build_query(
            &ArticleSearchQuery::default(),
            &QueryContext::default(),
            &Completeness::Full,
        )
        .unwrap();
        assert!(body["_source"].get("includes").is_none());
    }

    #[test]
    fn id_only_partial_fetches_no_source() {
        let body = build_query(
            &ArticleSearchQuery::default(),
            &QueryContext::default(),
            &Completeness::partial(["id"]).unwrap(),
        )
        .unwrap();
        assert_eq!(body["_source"], json!(false));
    }

    #[test]
    fn partial_projection_is_exact_and_custom_excludes_are_added() {
        let query = article_query(QueryOptions {
            exclude_fields: vec!["summary".into(), "embeddings".into()],
            ..Default::default()
        });
        let body = build_query(
            &query,
            &QueryContext::default(),
            &Completeness::partial(["id", "url", "title"]).unwrap(),
        )
        .unwrap();
        assert_eq!(body["_source"]["includes"], json!(["url", "title"]));
        assert_eq!(body["_source"]["excludes"], json!(["embeddings", "summary"]));
    }

    #[test]
    fn search_term_ranks_with_weights_and_score_sort() {
        let query = article_query(QueryOptions {
            search_term: Some("ransomware".into()),
            ..Default::default()
        });
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        let must = &body["query"]["bool"]["must"];
        assert_eq!(
            must[0]["multi_match"]["fields"],
            json!(["title^5", "description^3", "content^1"])
        );
        assert_eq!(body["sort"][0], json!({ "_score": "desc" }));
        assert_eq!(body["sort"][1], json!("_doc"));
    }

    #[test]
    fn semantic_ranking_is_additive_and_nested_where_needed() {
        let query = article_query(QueryOptions {
            search_term: Some("ransomware".into()),
            semantic_search: Some("attacks on hospitals".into()),
            ..Default::default()
        });
        let body = build_query(&query, &ctx_with_model(), &Completeness::Base).unwrap();
        let bool_query = &body["query"]["bool"];
        assert_eq!(bool_query["must"].as_array().unwrap().len(), 1);
        let should = bool_query["should"].as_array().unwrap();
        assert_eq!(should.len(), 3);
        assert_eq!(should[0]["nested"]["path"], "embeddings.content_chunks");
        assert_eq!(
            should[1]["text_expansion"]["embeddings.description.elser.tokens"]["boost"],
            9
        );
        assert!(bool_query.get("minimum_should_match").is_none());
    }

    #[test]
    fn semantic_only_requires_a_semantic_match() {
        let query = article_query(QueryOptions {
            semantic_search: Some("attacks on hospitals".into()),
            ..Default::default()
        });
        let body = build_query(&query, &ctx_with_model(), &Completeness::Base).unwrap();
        assert_eq!(body["query"]["bool"]["minimum_should_match"], 1);
        assert_eq!(body["sort"][0], json!({ "_score": "desc" }));
    }

    #[test]
    fn semantic_text_without_model_is_ignored() {
        let query = article_query(QueryOptions {
            semantic_search: Some("attacks on hospitals".into()),
            ..Default::default()
        });
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        assert!(body["query"]["bool"]["should"].as_array().unwrap().is_empty());
        assert_eq!(body["sort"], json!(["_doc"]));
    }

    #[test]
    fn explicit_sort_takes_priority() {
        let query = article_query(QueryOptions {
            search_term: Some("x".into()),
            sort_by: Some("publish_date".into()),
            sort_order: SortOrder::Asc,
            ..Default::default()
        });
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        assert_eq!(body["sort"][0], json!({ "publish_date": "asc" }));
        assert_eq!(body["sort"][1], json!({ "_score": "desc" }));
    }

    #[test]
    fn multi_page_queries_get_a_tie_break() {
        let query = article_query(QueryOptions {
            limit: 0,
            ..Default::default()
        });
        let body = build_query(&query, &QueryContext::default(), &Completeness::Full).unwrap();
        assert_eq!(body["sort"], json!([{ "url": "asc" }, "_doc"]));
        assert_eq!(body["size"], 10_000);

        let single = build_query(
            &ArticleSearchQuery::default(),
            &QueryContext::default(),
            &Completeness::Full,
        )
        .unwrap();
        assert_eq!(single["sort"], json!(["_doc"]));
    }

    #[test]
    fn tie_break_is_not_repeated_when_it_is_the_sort_field() {
        let query = ClusterSearchQuery {
            options: QueryOptions {
                limit: 0,
                sort_by: Some("nr".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        assert_eq!(body["sort"], json!([{ "nr": "desc" }, "_doc"]));
    }

    #[test]
    fn empty_id_set_matches_nothing() {
        let query = article_query(QueryOptions {
            ids: Some(BTreeSet::new()),
            ..Default::default()
        });
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        assert_eq!(body["query"]["bool"]["filter"], json!([{ "match_none": {} }]));

        let query = article_query(QueryOptions {
            ids: Some(["b".to_string(), "a".to_string()].into()),
            ..Default::default()
        });
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        assert_eq!(
            body["query"]["bool"]["filter"],
            json!([{ "terms": { "_id": ["a", "b"] } }])
        );
    }

    #[test]
    fn date_bounds_may_be_open() {
        let query = article_query(QueryOptions {
            first_date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        });
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        assert_eq!(
            body["query"]["bool"]["filter"],
            json!([{ "range": { "publish_date": { "gte": "2024-01-01T00:00:00Z" } } }])
        );
    }

    #[test]
    fn highlight_uses_marker_on_search_fields() {
        let query = article_query(QueryOptions {
            highlight: true,
            highlight_marker: "==".into(),
            ..Default::default()
        });
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        assert_eq!(body["highlight"]["pre_tags"], json!(["=="]));
        let fields = body["highlight"]["fields"].as_object().unwrap();
        assert_eq!(fields.len(), 3);
        assert!(fields.contains_key("content"));
    }

    #[test]
    fn aggregations_are_refused_for_multi_page_queries() {
        let aggs = json!({ "sources": { "terms": { "field": "profile" } } });
        let query = article_query(QueryOptions {
            limit: 20_000,
            aggregations: Some(aggs.clone()),
            ..Default::default()
        });
        let err = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap_err();
        assert_eq!(
            err,
            ContractError::AggregationsWithLargeQuery {
                limit: 20_000,
                page_size: PAGE_SIZE
            }
        );

        let query = article_query(QueryOptions {
            limit: 10,
            aggregations: Some(aggs.clone()),
            ..Default::default()
        });
        let body = build_query(&query, &QueryContext::default(), &Completeness::Base).unwrap();
        assert_eq!(body["aggs"], aggs);
    }

    #[test]
    fn everything_has_no_limit() {
        let query = <Cluster as DocumentKind>::Query::everything();
        assert_eq!(query.options().limit, 0);
        assert!(!query.exclude_outliers);
    }
}
