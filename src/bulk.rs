//! Parallel transform and serialization for bulk writes.
//!
//! Transform stages can be CPU-bound (content chunking hashes every
//! paragraph), so documents are rendered into [`BulkOperation`]s on a rayon
//! pool sized to the available cores minus a reserve. The pool runs on a
//! blocking thread; submitting the operations to the backend stays on the
//! caller's task.

use osinter_core::pipeline::{prepare_source, Capabilities, Source, TransformStage};
use osinter_core::{ContractError, Document};
use rayon::prelude::*;
use serde_json::Value;

use crate::backend::BulkOperation;
use crate::error::{Result, StoreError};

/// Number of transform workers: available cores minus `reserve`, at least one.
pub fn worker_count(reserve: usize) -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(reserve)
        .max(1)
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteMode {
    /// Full replacement, optionally routed through a backend ingest pipeline.
    Index { pipeline: Option<String> },
    /// Partial update; `fields` narrows the sent document to those keys.
    Update { fields: Option<Vec<String>> },
}

/// Everything a worker needs to render one document.
#[derive(Debug, Clone)]
pub struct PrepareJob {
    pub index: String,
    pub kind: &'static str,
    pub unique_field: &'static str,
    pub stages: Vec<TransformStage>,
    pub caps: Capabilities,
    pub mode: WriteMode,
    pub workers: usize,
}

/// One rendered document, in input order.
#[derive(Debug)]
pub struct Prepared {
    /// Natural key of the document, for diagnostics.
    pub unique: String,
    pub operation: Result<BulkOperation>,
}

/// Render `docs` into bulk operations on the worker pool, preserving order.
pub async fn prepare<D: Document>(docs: Vec<D>, job: PrepareJob) -> Result<Vec<Prepared>> {
    tokio::task::spawn_blocking(move || {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(job.workers.max(1))
            .thread_name(|i| format!("osinter-transform-{}", i))
            .build()
            .map_err(|e| StoreError::Worker(e.to_string()))?;
        Ok(pool.install(|| docs.par_iter().map(|doc| job.prepare_one(doc)).collect()))
    })
    .await
    .map_err(|e| StoreError::Worker(e.to_string()))?
}

impl PrepareJob {
    fn prepare_one<D: Document>(&self, doc: &D) -> Prepared {
        let (id, source) = match prepare_source(doc, &self.stages, self.caps) {
            Ok(rendered) => rendered,
            Err(e) => {
                return Prepared {
                    unique: doc.id().unwrap_or("<unsaved>").to_string(),
                    operation: Err(e.into()),
                }
            }
        };
        let unique = unique_value(source.get(self.unique_field))
            .unwrap_or_else(|| "<unknown>".to_string());

        let operation = match &self.mode {
            WriteMode::Index { pipeline } => Ok(BulkOperation::Index {
                index: self.index.clone(),
                id,
                source,
                pipeline: pipeline.clone(),
            }),
            WriteMode::Update { fields } => match id {
                Some(id) => Ok(BulkOperation::Update {
                    index: self.index.clone(),
                    id,
                    doc: narrow(source, fields.as_deref()),
                }),
                None => Err(ContractError::MissingId {
                    kind: self.kind,
                    unique: unique.clone(),
                }
                .into()),
            },
        };
        Prepared { unique, operation }
    }
}

/// Keep only `fields`; a listed field the document does not carry is sent
/// as `null` so the stored value is cleared.
fn narrow(source: Source, fields: Option<&[String]>) -> Source {
    match fields {
        None => source,
        Some(fields) => fields
            .iter()
            .map(|f| (f.clone(), source.get(f).cloned().unwrap_or(Value::Null)))
            .collect(),
    }
}

/// Render a unique-field value as the string used for lookups and logs.
pub(crate) fn unique_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
