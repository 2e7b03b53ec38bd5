//! Generic document-store client.
//!
//! [`DocumentStore<K>`] holds everything a kind needs to talk to its index:
//! the shared backend, the index name, the semantic settings and the
//! transform stages. It carries no mutable state, so one instance can be
//! shared across any number of concurrent callers.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`exists`](DocumentStore::exists) | Which unique values are already stored |
//! | [`query`](DocumentStore::query) | Search at Base / Full / Partial completeness |
//! | [`query_all`](DocumentStore::query_all) | Every document, streamed from a snapshot |
//! | [`scroll`](DocumentStore::scroll) | Full documents batch by batch |
//! | [`save`](DocumentStore::save) / [`save_many`](DocumentStore::save_many) | Index documents |
//! | [`update_many`](DocumentStore::update_many) | Partial in-place updates |
//! | [`delete`](DocumentStore::delete) | Remove by id |
//! | [`increment_counter`](DocumentStore::increment_counter) | Atomic server-side `+1` |

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;

use osinter_core::models::{validate_base, validate_full, validate_partial};
use osinter_core::pipeline::{prepare_source, Capabilities, TransformStage};
use osinter_core::query::build_query;
use osinter_core::{
    Batch, Completeness, ContractError, Document, DocumentKind, QueryContext, Reject,
    RequiredFields, SearchQuery, PAGE_SIZE,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::backend::{Backend, BulkOperation, Hit, UpdateAction};
use crate::bulk::{self, unique_value, PrepareJob, Prepared, WriteMode};
use crate::cursor::PitCursor;
use crate::error::{Result, StoreError};
use crate::progress::{BulkProgressEvent, BulkProgressReporter, NoProgress};

const INCREMENT_SCRIPT: &str = "if (ctx._source[params.field] == null) { ctx._source[params.field] = params.count } else { ctx._source[params.field] += params.count }";

/// Semantic ranking and backend-side enrichment for a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemanticSettings {
    /// Expansion model used for semantic ranking.
    pub model_id: Option<String>,
    /// Backend ingest pipeline documents are routed through on write.
    pub ingest_pipeline: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub page_size: usize,
    pub keep_alive: String,
    pub chunk_size: usize,
    pub worker_reserve: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            keep_alive: "1m".to_string(),
            chunk_size: 500,
            worker_reserve: 2,
        }
    }
}

/// Per-call switches for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Run the kind's transform stages.
    pub transforms: bool,
    /// Route writes through the configured ingest pipeline.
    pub ingest_pipeline: bool,
    /// Overrides the store's bulk chunk size.
    pub chunk_size: Option<usize>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            transforms: true,
            ingest_pipeline: true,
            chunk_size: None,
        }
    }
}

impl WriteOptions {
    /// No stages, no ingest pipeline.
    pub fn plain() -> Self {
        Self {
            transforms: false,
            ingest_pipeline: false,
            chunk_size: None,
        }
    }
}

/// Validated documents of a query plus what was rejected.
#[derive(Debug, Clone)]
pub struct QueryOutcome<T> {
    pub documents: Vec<T>,
    pub rejects: Vec<Reject>,
    /// Raw aggregation results, when the query asked for any.
    pub aggregations: Option<Value>,
}

/// Result of [`DocumentStore::query`], typed by the requested completeness.
#[derive(Debug, Clone)]
pub enum Documents<K: DocumentKind> {
    Base(QueryOutcome<K::Base>),
    Full(QueryOutcome<K::Full>),
    Partial(QueryOutcome<K::Partial>),
}

impl<K: DocumentKind> Documents<K> {
    pub fn len(&self) -> usize {
        match self {
            Documents::Base(o) => o.documents.len(),
            Documents::Full(o) => o.documents.len(),
            Documents::Partial(o) => o.documents.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rejects(&self) -> &[Reject] {
        match self {
            Documents::Base(o) => &o.rejects,
            Documents::Full(o) => &o.rejects,
            Documents::Partial(o) => &o.rejects,
        }
    }

    /// Documents as JSON values, in result order.
    pub fn to_values(&self) -> Result<Vec<Value>> {
        fn all<T: Document>(docs: &[T]) -> Result<Vec<Value>> {
            docs.iter()
                .map(|d| serde_json::to_value(d).map_err(StoreError::from))
                .collect()
        }
        match self {
            Documents::Base(o) => all(&o.documents),
            Documents::Full(o) => all(&o.documents),
            Documents::Partial(o) => all(&o.documents),
        }
    }
}

/// One document the backend refused during a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub unique: String,
    pub id: Option<String>,
    pub status: Option<u16>,
    pub reason: String,
}

/// Outcome of a bulk write: how many documents landed and which did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub written: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

pub struct DocumentStore<K: DocumentKind> {
    backend: Arc<dyn Backend>,
    index: String,
    semantic: SemanticSettings,
    stages: Vec<TransformStage>,
    settings: StoreSettings,
    progress: Arc<dyn BulkProgressReporter>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: DocumentKind> Clone for DocumentStore<K> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            index: self.index.clone(),
            semantic: self.semantic.clone(),
            stages: self.stages.clone(),
            settings: self.settings.clone(),
            progress: self.progress.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: DocumentKind> DocumentStore<K> {
    pub fn new(backend: Arc<dyn Backend>, index: impl Into<String>) -> Self {
        Self {
            backend,
            index: index.into(),
            semantic: SemanticSettings::default(),
            stages: K::transform_stages(),
            settings: StoreSettings::default(),
            progress: Arc::new(NoProgress),
            _kind: PhantomData,
        }
    }

    pub fn with_semantic(mut self, semantic: SemanticSettings) -> Self {
        self.semantic = semantic;
        self
    }

    /// Replace the kind's default transform stages.
    pub fn with_stages(mut self, stages: Vec<TransformStage>) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_settings(mut self, settings: StoreSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn BulkProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Capabilities available to transform stages for a write.
    pub fn capabilities(&self, options: &WriteOptions) -> Capabilities {
        Capabilities {
            semantic_model: self.semantic.model_id.is_some(),
            backend_pipeline: options.ingest_pipeline && self.semantic.ingest_pipeline.is_some(),
        }
    }

    fn context(&self) -> QueryContext<'_> {
        QueryContext {
            semantic_model: self.semantic.model_id.as_deref(),
            page_size: self.settings.page_size.max(1),
        }
    }

    fn pipeline(&self, options: &WriteOptions) -> Option<&str> {
        if options.ingest_pipeline {
            self.semantic.ingest_pipeline.as_deref()
        } else {
            None
        }
    }

    fn stages_for(&self, options: &WriteOptions) -> &[TransformStage] {
        if options.transforms {
            &self.stages
        } else {
            &[]
        }
    }

    // ─── Reads ──────────────────────────────────────────────────────

    /// The subset of `values` (unique-field values) already stored.
    pub async fn exists(&self, values: &BTreeSet<String>) -> Result<BTreeSet<String>> {
        let mut found = BTreeSet::new();
        let values: Vec<&String> = values.iter().collect();
        let page_size = self.settings.page_size.max(1);

        for chunk in values.chunks(page_size) {
            let body = json!({
                "size": chunk.len(),
                "query": { "bool": { "filter": [{ "terms": { K::UNIQUE_FIELD: chunk } }] } },
                "collapse": { "field": K::UNIQUE_FIELD },
                "_source": { "includes": [K::UNIQUE_FIELD] },
            });
            let response = self.backend.search(Some(&self.index), &body).await?;
            for hit in response.hits.hits {
                if let Some(value) = unique_value(hit.source.get(K::UNIQUE_FIELD)) {
                    if chunk.iter().any(|v| **v == value) {
                        found.insert(value);
                    }
                }
            }
        }
        debug!(kind = K::NAME, asked = values.len(), found = found.len(), "exists");
        Ok(found)
    }

    /// The values of `values` that are already stored, in input order.
    pub async fn filter_existing(&self, values: &[String]) -> Result<Vec<String>> {
        let existing = self.exists(&values.iter().cloned().collect()).await?;
        Ok(values
            .iter()
            .filter(|v| existing.contains(*v))
            .cloned()
            .collect())
    }

    /// Run a search and validate every hit at the requested completeness.
    ///
    /// Queries that fit in one page are a single request; larger ones (and
    /// `limit == 0`) are streamed from a point-in-time snapshot.
    pub async fn query(
        &self,
        query: &K::Query,
        completeness: &Completeness<K>,
    ) -> Result<Documents<K>> {
        let (hits, aggregations) = self.fetch(query, completeness).await?;
        let raws = hits.into_iter().map(Hit::into_raw);
        Ok(match completeness {
            Completeness::Base => {
                Documents::Base(self.outcome(Batch::convert(raws, validate_base::<K>), aggregations))
            }
            Completeness::Full => {
                Documents::Full(self.outcome(Batch::convert(raws, validate_full::<K>), aggregations))
            }
            Completeness::Partial(required) => Documents::Partial(self.outcome(
                Batch::convert(raws, |raw| validate_partial::<K>(raw, required)),
                aggregations,
            )),
        })
    }

    pub async fn query_base(&self, query: &K::Query) -> Result<QueryOutcome<K::Base>> {
        let (hits, aggregations) = self.fetch(query, &Completeness::Base).await?;
        let batch = Batch::convert(hits.into_iter().map(Hit::into_raw), validate_base::<K>);
        Ok(self.outcome(batch, aggregations))
    }

    pub async fn query_full(&self, query: &K::Query) -> Result<QueryOutcome<K::Full>> {
        let (hits, aggregations) = self.fetch(query, &Completeness::Full).await?;
        let batch = Batch::convert(hits.into_iter().map(Hit::into_raw), validate_full::<K>);
        Ok(self.outcome(batch, aggregations))
    }

    pub async fn query_partial(
        &self,
        query: &K::Query,
        required: &RequiredFields<K>,
    ) -> Result<QueryOutcome<K::Partial>> {
        let completeness = Completeness::Partial(required.clone());
        let (hits, aggregations) = self.fetch(query, &completeness).await?;
        let batch = Batch::convert(hits.into_iter().map(Hit::into_raw), |raw| {
            validate_partial::<K>(raw, required)
        });
        Ok(self.outcome(batch, aggregations))
    }

    /// Every document of the kind at Full completeness.
    pub async fn query_all(&self) -> Result<QueryOutcome<K::Full>> {
        self.query_full(&K::Query::everything()).await
    }

    /// Stream Full documents batch by batch from a snapshot.
    pub async fn scroll(&self, query: &K::Query) -> Result<Scroll<K>> {
        let ctx = self.context();
        let options = query.options();
        if options.aggregations.is_some() {
            return Err(ContractError::AggregationsWithLargeQuery {
                limit: options.limit,
                page_size: ctx.page_size,
            }
            .into());
        }
        let body = build_query(query, &ctx, &Completeness::Full)?;
        let cursor = PitCursor::open(
            self.backend.clone(),
            &self.index,
            body,
            options.limit,
            ctx.page_size,
            &self.settings.keep_alive,
        )
        .await?;
        Ok(Scroll {
            cursor,
            _kind: PhantomData,
        })
    }

    /// Distinct values of `field` with their document counts, up to one page.
    pub async fn unique_values(&self, field: &str) -> Result<BTreeMap<String, u64>> {
        let top = field.split('.').next().unwrap_or(field);
        if !K::is_modeled(top) {
            return Err(ContractError::UnknownField {
                kind: K::NAME,
                field: field.to_string(),
            }
            .into());
        }
        let body = json!({
            "size": 0,
            "aggs": { "values": { "terms": { "field": field, "size": self.settings.page_size } } }
        });
        let response = self.backend.search(Some(&self.index), &body).await?;
        let buckets = response
            .aggregations
            .as_ref()
            .and_then(|a| a.pointer("/values/buckets"))
            .and_then(Value::as_array)
            .ok_or_else(|| StoreError::Malformed("terms aggregation without buckets".into()))?;

        Ok(buckets
            .iter()
            .filter_map(|bucket| {
                let key = unique_value(bucket.get("key"))?;
                let count = bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
                Some((key, count))
            })
            .collect())
    }

    async fn fetch(
        &self,
        query: &K::Query,
        completeness: &Completeness<K>,
    ) -> Result<(Vec<Hit>, Option<Value>)> {
        let ctx = self.context();
        let body = build_query(query, &ctx, completeness)?;
        let limit = query.options().limit;

        if ctx.is_multi_page(limit) {
            let cursor = PitCursor::open(
                self.backend.clone(),
                &self.index,
                body,
                limit,
                ctx.page_size,
                &self.settings.keep_alive,
            )
            .await?;
            Ok((cursor.collect().await?, None))
        } else {
            let response = self.backend.search(Some(&self.index), &body).await?;
            Ok((response.hits.hits, response.aggregations))
        }
    }

    fn outcome<T>(&self, batch: Batch<T>, aggregations: Option<Value>) -> QueryOutcome<T> {
        log_rejects(K::NAME, &batch.rejects);
        QueryOutcome {
            documents: batch.valid,
            rejects: batch.rejects,
            aggregations,
        }
    }

    // ─── Writes ─────────────────────────────────────────────────────

    /// Index one Full document and return its id.
    pub async fn save(&self, doc: &K::Full, options: WriteOptions) -> Result<String> {
        let (id, source) = prepare_source(doc, self.stages_for(&options), self.capabilities(&options))
            .map_err(|e| StoreError::from(e).located(K::NAME, doc.id().unwrap_or("<unsaved>")))?;
        let unique = unique_value(source.get(K::UNIQUE_FIELD)).unwrap_or_default();

        let id = self
            .backend
            .index_document(&self.index, id.as_deref(), &source, self.pipeline(&options))
            .await
            .map_err(|e| e.located(K::NAME, unique.clone()))?;
        debug!(kind = K::NAME, %id, unique = %unique, "saved document");
        Ok(id)
    }

    /// Index many Full documents in chunks.
    ///
    /// A document whose transform stage is skipped for a missing capability
    /// is still written. Backend refusals are reported per document in the
    /// returned [`BulkReport`]; nothing is rolled back.
    pub async fn save_many(&self, docs: Vec<K::Full>, options: WriteOptions) -> Result<BulkReport> {
        let job = self.job(
            &options,
            WriteMode::Index {
                pipeline: self.pipeline(&options).map(str::to_string),
            },
        );
        let prepared = bulk::prepare(docs, job).await?;
        self.submit(prepared, &options).await
    }

    /// Partially update stored documents.
    ///
    /// With `fields`, only those fields are sent even though each document
    /// carries more; a listed field the document leaves unset is cleared.
    pub async fn update_many(
        &self,
        docs: Vec<K::Full>,
        fields: Option<&[String]>,
        options: WriteOptions,
    ) -> Result<BulkReport> {
        let fields = match fields {
            Some(fields) => {
                if let Some(unknown) = fields.iter().find(|f| !K::is_modeled(f)) {
                    return Err(ContractError::UnknownField {
                        kind: K::NAME,
                        field: unknown.clone(),
                    }
                    .into());
                }
                Some(fields.iter().filter(|f| *f != "id").cloned().collect())
            }
            None => None,
        };
        let job = self.job(&options, WriteMode::Update { fields });
        let prepared = bulk::prepare(docs, job).await?;
        self.submit(prepared, &options).await
    }

    /// Delete documents by id. Returns how many existed and were removed.
    pub async fn delete(&self, ids: &BTreeSet<String>) -> Result<usize> {
        let operations: Vec<BulkOperation> = ids
            .iter()
            .map(|id| BulkOperation::Delete {
                index: self.index.clone(),
                id: id.clone(),
            })
            .collect();

        let mut deleted = 0;
        for chunk in operations.chunks(self.settings.chunk_size.max(1)) {
            let response = self.backend.bulk(chunk).await?;
            for item in &response.items {
                if item.succeeded() {
                    deleted += 1;
                } else {
                    debug!(kind = K::NAME, id = ?item.id, status = item.status, "delete skipped");
                }
            }
        }
        info!(kind = K::NAME, index = %self.index, requested = ids.len(), deleted, "deleted documents");
        Ok(deleted)
    }

    /// Atomically add one to a counter field on the backend.
    pub async fn increment_counter(&self, id: &str, field: &str) -> Result<()> {
        if !K::COUNTER_FIELDS.contains(&field) {
            return Err(ContractError::UnknownField {
                kind: K::NAME,
                field: field.to_string(),
            }
            .into());
        }
        let mut params = Map::new();
        params.insert("field".into(), json!(field));
        params.insert("count".into(), json!(1));
        let action = UpdateAction::Script {
            source: INCREMENT_SCRIPT.to_string(),
            params,
        };
        self.backend
            .update(&self.index, id, &action)
            .await
            .map_err(|e| e.located(K::NAME, id))
    }

    /// Create the index with the kind's mapping if it does not exist yet.
    /// Returns whether it was created.
    pub async fn ensure_index(&self) -> Result<bool> {
        if self.backend.index_exists(&self.index).await? {
            return Ok(false);
        }
        self.backend.create_index(&self.index, &K::mappings()).await?;
        info!(kind = K::NAME, index = %self.index, "created index");
        Ok(true)
    }

    fn job(&self, options: &WriteOptions, mode: WriteMode) -> PrepareJob {
        PrepareJob {
            index: self.index.clone(),
            kind: K::NAME,
            unique_field: K::UNIQUE_FIELD,
            stages: self.stages_for(options).to_vec(),
            caps: self.capabilities(options),
            mode,
            workers: bulk::worker_count(self.settings.worker_reserve),
        }
    }

    async fn submit(&self, prepared: Vec<Prepared>, options: &WriteOptions) -> Result<BulkReport> {
        let total = prepared.len();
        let mut report = BulkReport::default();
        let mut operations = Vec::with_capacity(total);
        let mut uniques = Vec::with_capacity(total);

        for p in prepared {
            match p.operation {
                Ok(op) => {
                    operations.push(op);
                    uniques.push(p.unique);
                }
                Err(e) if e.is_contract() => return Err(e),
                Err(e) => {
                    warn!(kind = K::NAME, unique = %p.unique, error = %e, "could not prepare document");
                    report.failures.push(BulkFailure {
                        unique: p.unique,
                        id: None,
                        status: None,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let chunk_size = options.chunk_size.unwrap_or(self.settings.chunk_size).max(1);
        let mut submitted = 0;
        for (chunk, chunk_uniques) in operations.chunks(chunk_size).zip(uniques.chunks(chunk_size)) {
            let response = self.backend.bulk(chunk).await?;
            if response.items.len() != chunk.len() {
                return Err(StoreError::Malformed(format!(
                    "bulk response has {} items for {} operations",
                    response.items.len(),
                    chunk.len()
                )));
            }
            for ((item, op), unique) in response.items.iter().zip(chunk).zip(chunk_uniques) {
                if item.succeeded() {
                    report.written += 1;
                } else {
                    let reason = item.reason();
                    warn!(kind = K::NAME, unique = %unique, status = item.status, reason = %reason, "bulk item failed");
                    report.failures.push(BulkFailure {
                        unique: unique.clone(),
                        id: item.id.clone().or_else(|| op.id().map(str::to_string)),
                        status: Some(item.status),
                        reason,
                    });
                }
            }
            submitted += chunk.len();
            self.progress.report(BulkProgressEvent::Writing {
                kind: K::NAME,
                n: submitted as u64,
                total: total as u64,
            });
        }

        info!(
            kind = K::NAME,
            index = %self.index,
            written = report.written,
            failed = report.failed(),
            "bulk write finished"
        );
        Ok(report)
    }
}

/// Full documents streamed from a point-in-time snapshot.
pub struct Scroll<K: DocumentKind> {
    cursor: PitCursor,
    _kind: PhantomData<fn() -> K>,
}

impl<K: DocumentKind> Scroll<K> {
    /// Next validated batch, or `None` when the snapshot is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Batch<K::Full>>> {
        let Some(hits) = self.cursor.next_batch().await? else {
            return Ok(None);
        };
        let batch = Batch::convert(hits.into_iter().map(Hit::into_raw), validate_full::<K>);
        log_rejects(K::NAME, &batch.rejects);
        Ok(Some(batch))
    }

    /// Stop early and release the snapshot.
    pub async fn close(self) {
        self.cursor.close().await;
    }
}

fn log_rejects(kind: &'static str, rejects: &[Reject]) {
    for reject in rejects {
        warn!(
            kind,
            id = reject.error.id.as_deref().unwrap_or("<unsaved>"),
            title = reject.error.title.as_deref().unwrap_or(""),
            reason = %reject.error.reason,
            "rejected document"
        );
    }
}
