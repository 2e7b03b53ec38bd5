//! Search backend abstraction.
//!
//! The [`Backend`] trait is the only place the store client touches the
//! network. Two implementations ship with the crate:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`HttpBackend`] | Elasticsearch-compatible REST API over HTTP(S) |
//! | [`InMemoryBackend`] | Tests and local experiments; interprets the query subset the builder emits |
//!
//! Implementations must be `Send + Sync`; the client shares one backend
//! across concurrent callers behind an `Arc`.

pub mod http;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{Result, StoreError};

pub use http::HttpBackend;
pub use memory::InMemoryBackend;

/// One search hit as returned by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
    #[serde(default)]
    pub highlight: Option<Map<String, Value>>,
    /// Sort values, present when the request sorted; drives `search_after`.
    #[serde(default)]
    pub sort: Option<Vec<Value>>,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
}

impl Hit {
    /// Flatten into the raw payload the document model validates:
    /// `_source` plus `id` and, when present, `highlights`.
    pub fn into_raw(self) -> Value {
        let mut raw = self.source;
        raw.insert("id".to_string(), Value::String(self.id));
        if let Some(highlight) = self.highlight {
            if !highlight.is_empty() {
                raw.insert("highlights".to_string(), Value::Object(highlight));
            }
        }
        Value::Object(raw)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Hits {
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: Hits,
    /// Possibly rotated point-in-time id; always use the latest one.
    #[serde(default)]
    pub pit_id: Option<String>,
    #[serde(default)]
    pub aggregations: Option<Value>,
}

/// A single entry of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    Index {
        index: String,
        id: Option<String>,
        source: Map<String, Value>,
        pipeline: Option<String>,
    },
    Update {
        index: String,
        id: String,
        doc: Map<String, Value>,
    },
    Delete {
        index: String,
        id: String,
    },
}

impl BulkOperation {
    pub fn id(&self) -> Option<&str> {
        match self {
            BulkOperation::Index { id, .. } => id.as_deref(),
            BulkOperation::Update { id, .. } | BulkOperation::Delete { id, .. } => Some(id),
        }
    }

    /// Append this operation to an NDJSON bulk body.
    pub fn write_ndjson(&self, out: &mut String) -> Result<()> {
        match self {
            BulkOperation::Index {
                index,
                id,
                source,
                pipeline,
            } => {
                let mut meta = Map::new();
                meta.insert("_index".into(), json!(index));
                if let Some(id) = id {
                    meta.insert("_id".into(), json!(id));
                }
                if let Some(pipeline) = pipeline {
                    meta.insert("pipeline".into(), json!(pipeline));
                }
                push_line(out, &json!({ "index": meta }))?;
                push_line(out, &Value::Object(source.clone()))?;
            }
            BulkOperation::Update { index, id, doc } => {
                push_line(out, &json!({ "update": { "_index": index, "_id": id } }))?;
                push_line(out, &json!({ "doc": doc }))?;
            }
            BulkOperation::Delete { index, id } => {
                push_line(out, &json!({ "delete": { "_index": index, "_id": id } }))?;
            }
        }
        Ok(())
    }
}

fn push_line(out: &mut String, value: &Value) -> Result<()> {
    out.push_str(&serde_json::to_string(value)?);
    out.push('\n');
    Ok(())
}

/// Outcome of one bulk entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BulkItem {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub error: Option<Value>,
}

impl BulkItem {
    pub fn succeeded(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn reason(&self) -> String {
        match &self.error {
            Some(err) => err
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string()),
            None => format!("status {}", self.status),
        }
    }
}

/// Bulk response with items in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    pub errors: bool,
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    /// Parse the wire shape, where each item is keyed by its action name.
    pub fn from_value(value: Value) -> Result<Self> {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(default)]
            errors: bool,
            #[serde(default)]
            items: Vec<BTreeMap<String, BulkItem>>,
        }
        let wire: Wire = serde_json::from_value(value)?;
        let items = wire
            .items
            .into_iter()
            .map(|entry| {
                entry
                    .into_values()
                    .next()
                    .ok_or_else(|| StoreError::Malformed("empty bulk item".to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            errors: wire.errors,
            items,
        })
    }
}

/// Body of a single-document partial update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    Doc(Map<String, Value>),
    /// Server-side painless script; runs atomically on the backend.
    Script {
        source: String,
        params: Map<String, Value>,
    },
}

impl UpdateAction {
    pub fn body(&self) -> Value {
        match self {
            UpdateAction::Doc(doc) => json!({ "doc": doc }),
            UpdateAction::Script { source, params } => json!({
                "script": { "source": source, "lang": "painless", "params": params }
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskDetails {
    #[serde(default)]
    pub status: Map<String, Value>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub running_time_in_nanos: u64,
}

/// Snapshot of a server-side task.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskInfo {
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub task: TaskDetails,
}

/// Operations the store client needs from a search backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`search`](Backend::search) | Run a query; `index` is `None` for point-in-time searches |
/// | [`open_point_in_time`](Backend::open_point_in_time) / [`close_point_in_time`](Backend::close_point_in_time) | Snapshot handles for pagination |
/// | [`bulk`](Backend::bulk) | Batched index/update/delete |
/// | [`index_document`](Backend::index_document) | Single-document write, returns the id |
/// | [`update`](Backend::update) | Partial update or atomic script |
/// | [`get_task`](Backend::get_task) / [`cancel_task`](Backend::cancel_task) | Server-side task control |
/// | [`index_exists`](Backend::index_exists) / [`create_index`](Backend::create_index) | Index lifecycle |
#[async_trait]
pub trait Backend: Send + Sync {
    async fn search(&self, index: Option<&str>, body: &Value) -> Result<SearchResponse>;

    async fn open_point_in_time(&self, index: &str, keep_alive: &str) -> Result<String>;

    async fn close_point_in_time(&self, pit_id: &str) -> Result<()>;

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse>;

    async fn index_document(
        &self,
        index: &str,
        id: Option<&str>,
        source: &Map<String, Value>,
        pipeline: Option<&str>,
    ) -> Result<String>;

    async fn update(&self, index: &str, id: &str, action: &UpdateAction) -> Result<()>;

    async fn get_task(&self, task_id: &str) -> Result<TaskInfo>;

    async fn cancel_task(&self, task_id: &str) -> Result<()>;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    async fn create_index(&self, index: &str, mappings: &Value) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_into_raw_merges_id_and_highlights() {
        let hit: Hit = serde_json::from_value(json!({
            "_id": "abc",
            "_source": { "title": "Hello" },
            "highlight": { "title": ["**Hello**"] },
            "sort": [1, "x"]
        }))
        .unwrap();
        let raw = hit.into_raw();
        assert_eq!(raw["id"], "abc");
        assert_eq!(raw["highlights"]["title"][0], "**Hello**");
    }

    #[test]
    fn bulk_ndjson_lines() {
        let mut out = String::new();
        BulkOperation::Index {
            index: "articles".into(),
            id: Some("a".into()),
            source: json!({ "title": "t" }).as_object().unwrap().clone(),
            pipeline: Some("elser".into()),
        }
        .write_ndjson(&mut out)
        .unwrap();
        BulkOperation::Delete {
            index: "articles".into(),
            id: "b".into(),
        }
        .write_ndjson(&mut out)
        .unwrap();

        let lines: Vec<Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["index"]["pipeline"], "elser");
        assert_eq!(lines[1]["title"], "t");
        assert_eq!(lines[2]["delete"]["_id"], "b");
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn bulk_response_keeps_item_order() {
        let resp = BulkResponse::from_value(json!({
            "errors": true,
            "items": [
                { "index": { "_id": "a", "status": 201 } },
                { "update": { "_id": "b", "status": 404, "error": { "type": "document_missing_exception", "reason": "[b]: document missing" } } }
            ]
        }))
        .unwrap();
        assert!(resp.errors);
        assert!(resp.items[0].succeeded());
        assert!(!resp.items[1].succeeded());
        assert_eq!(resp.items[1].reason(), "[b]: document missing");
    }
}
