//! In-memory [`Backend`] for tests and local experiments.
//!
//! All indices live in one `RwLock`, so every write (including scripted
//! counter increments) is atomic with respect to other callers.
//!
//! The search side interprets the query subset the builder emits:
//! `bool` (`must`/`filter`/`should`/`must_not`, `minimum_should_match`),
//! `term`, `terms`, `range`, `match_all`, `match_none`, `multi_match`
//! (term-count scoring), `nested` and `text_expansion` (never matches, there
//! is no expansion model). Sorting understands `_score`, `_doc` and plain
//! fields, with `search_after`. Point-in-time handles are full snapshots.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use super::{
    Backend, BulkItem, BulkOperation, BulkResponse, Hit, Hits, SearchResponse, TaskDetails,
    TaskInfo, UpdateAction,
};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
struct StoredDoc {
    seq: u64,
    source: Map<String, Value>,
}

type Docs = BTreeMap<String, StoredDoc>;

#[derive(Default)]
struct Index {
    docs: Docs,
    mappings: Option<Value>,
}

struct ScriptedTask {
    statuses: VecDeque<TaskInfo>,
    cancel_requested: bool,
}

#[derive(Default)]
struct State {
    indices: HashMap<String, Index>,
    pits: HashMap<String, Docs>,
    tasks: HashMap<String, ScriptedTask>,
    next_seq: u64,
    next_pit: u64,
    searches: usize,
}

impl State {
    fn insert(&mut self, index: &str, id: String, source: Map<String, Value>) -> u16 {
        self.next_seq += 1;
        let seq = self.next_seq;
        let docs = &mut self.indices.entry(index.to_string()).or_default().docs;
        match docs.insert(id, StoredDoc { seq, source }) {
            Some(_) => 200,
            None => 201,
        }
    }
}

/// In-memory search backend.
#[derive(Default)]
pub struct InMemoryBackend {
    state: RwLock<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of documents currently stored in `index`.
    pub fn document_count(&self, index: &str) -> usize {
        self.read()
            .indices
            .get(index)
            .map_or(0, |idx| idx.docs.len())
    }

    /// Stored `_source` of one document.
    pub fn source(&self, index: &str, id: &str) -> Option<Map<String, Value>> {
        self.read()
            .indices
            .get(index)
            .and_then(|idx| idx.docs.get(id))
            .map(|doc| doc.source.clone())
    }

    pub fn mappings(&self, index: &str) -> Option<Value> {
        self.read()
            .indices
            .get(index)
            .and_then(|idx| idx.mappings.clone())
    }

    /// Number of search requests served so far.
    pub fn search_count(&self) -> usize {
        self.read().searches
    }

    /// Number of point-in-time handles still open.
    pub fn open_pits(&self) -> usize {
        self.read().pits.len()
    }

    /// Register a server-side task that reports `statuses` in order, one per
    /// poll. The last status repeats once the sequence is exhausted.
    pub fn add_task(&self, task_id: &str, statuses: Vec<TaskInfo>) {
        self.write().tasks.insert(
            task_id.to_string(),
            ScriptedTask {
                statuses: statuses.into(),
                cancel_requested: false,
            },
        );
    }

    pub fn task_cancel_requested(&self, task_id: &str) -> bool {
        self.read()
            .tasks
            .get(task_id)
            .is_some_and(|t| t.cancel_requested)
    }
}

fn not_found(kind: &str, what: &str) -> StoreError {
    StoreError::Backend {
        status: 404,
        body: json!({ "error": { "type": kind, "reason": what } }).to_string(),
    }
}

fn bad_request(reason: impl Into<String>) -> StoreError {
    StoreError::Backend {
        status: 400,
        body: json!({ "error": { "type": "parsing_exception", "reason": reason.into() } })
            .to_string(),
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn search(&self, index: Option<&str>, body: &Value) -> Result<SearchResponse> {
        let mut state = self.write();
        state.searches += 1;

        let pit_id = body
            .pointer("/pit/id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let docs: &Docs = match (&pit_id, index) {
            (Some(pit), _) => state
                .pits
                .get(pit)
                .ok_or_else(|| not_found("search_context_missing_exception", pit))?,
            (None, Some(index)) => state
                .indices
                .get(index)
                .map(|idx| &idx.docs)
                .ok_or_else(|| not_found("index_not_found_exception", index))?,
            (None, None) => return Err(bad_request("search without index or point in time")),
        };

        let mut response = run_search(docs, body)?;
        response.pit_id = pit_id;
        Ok(response)
    }

    async fn open_point_in_time(&self, index: &str, _keep_alive: &str) -> Result<String> {
        let mut state = self.write();
        let snapshot = state
            .indices
            .get(index)
            .map(|idx| idx.docs.clone())
            .ok_or_else(|| not_found("index_not_found_exception", index))?;
        state.next_pit += 1;
        let pit_id = format!("pit-{}", state.next_pit);
        state.pits.insert(pit_id.clone(), snapshot);
        Ok(pit_id)
    }

    async fn close_point_in_time(&self, pit_id: &str) -> Result<()> {
        match self.write().pits.remove(pit_id) {
            Some(_) => Ok(()),
            None => Err(not_found("search_context_missing_exception", pit_id)),
        }
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        let mut state = self.write();
        let mut items = Vec::with_capacity(operations.len());

        for op in operations {
            let item = match op {
                BulkOperation::Index {
                    index, id, source, ..
                } => {
                    let id = id
                        .clone()
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    let status = state.insert(index, id.clone(), source.clone());
                    BulkItem {
                        id: Some(id),
                        status,
                        error: None,
                    }
                }
                BulkOperation::Update { index, id, doc } => {
                    let stored = state
                        .indices
                        .get_mut(index)
                        .and_then(|idx| idx.docs.get_mut(id));
                    match stored {
                        Some(stored) => {
                            merge(&mut stored.source, doc);
                            BulkItem {
                                id: Some(id.clone()),
                                status: 200,
                                error: None,
                            }
                        }
                        None => BulkItem {
                            id: Some(id.clone()),
                            status: 404,
                            error: Some(json!({
                                "type": "document_missing_exception",
                                "reason": format!("[{}]: document missing", id),
                            })),
                        },
                    }
                }
                BulkOperation::Delete { index, id } => {
                    let removed = state
                        .indices
                        .get_mut(index)
                        .and_then(|idx| idx.docs.remove(id));
                    BulkItem {
                        id: Some(id.clone()),
                        status: if removed.is_some() { 200 } else { 404 },
                        error: None,
                    }
                }
            };
            items.push(item);
        }

        Ok(BulkResponse {
            errors: items.iter().any(|i| !i.succeeded()),
            items,
        })
    }

    async fn index_document(
        &self,
        index: &str,
        id: Option<&str>,
        source: &Map<String, Value>,
        _pipeline: Option<&str>,
    ) -> Result<String> {
        let id = id.map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
        self.write().insert(index, id.clone(), source.clone());
        Ok(id)
    }

    async fn update(&self, index: &str, id: &str, action: &UpdateAction) -> Result<()> {
        let mut state = self.write();
        let stored = state
            .indices
            .get_mut(index)
            .and_then(|idx| idx.docs.get_mut(id))
            .ok_or_else(|| not_found("document_missing_exception", id))?;

        match action {
            UpdateAction::Doc(doc) => merge(&mut stored.source, doc),
            UpdateAction::Script { params, .. } => {
                let field = params
                    .get("field")
                    .and_then(Value::as_str)
                    .ok_or_else(|| bad_request("only counter scripts are supported"))?;
                let count = params.get("count").and_then(Value::as_u64).unwrap_or(1);
                let current = stored.source.get(field).and_then(Value::as_u64).unwrap_or(0);
                stored
                    .source
                    .insert(field.to_string(), json!(current + count));
            }
        }
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskInfo> {
        let mut state = self.write();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| not_found("resource_not_found_exception", task_id))?;
        let mut info = if task.statuses.len() > 1 {
            task.statuses.pop_front().unwrap_or_default()
        } else {
            task.statuses.front().cloned().unwrap_or_default()
        };
        if task.cancel_requested {
            info.task.cancelled = true;
        }
        Ok(info)
    }

    async fn cancel_task(&self, task_id: &str) -> Result<()> {
        let mut state = self.write();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| not_found("resource_not_found_exception", task_id))?;
        task.cancel_requested = true;
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(self.read().indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, mappings: &Value) -> Result<()> {
        let mut state = self.write();
        if state.indices.contains_key(index) {
            return Err(bad_request(format!("index [{}] already exists", index)));
        }
        state.indices.insert(
            index.to_string(),
            Index {
                docs: Docs::new(),
                mappings: Some(mappings.clone()),
            },
        );
        Ok(())
    }
}

/// Recursive object merge, the way partial updates behave on the backend.
fn merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(inner)) => merge(existing, inner),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

// ─── Search evaluation ──────────────────────────────────────────────

struct Matched<'a> {
    id: &'a str,
    doc: &'a StoredDoc,
    score: f64,
    sort: Vec<Value>,
}

#[derive(Clone, Copy)]
enum SortKey<'a> {
    Score(bool),
    Doc(bool),
    Field(&'a str, bool),
}

fn run_search(docs: &Docs, body: &Value) -> Result<SearchResponse> {
    let match_all = json!({ "match_all": {} });
    let query = body.get("query").unwrap_or(&match_all);
    let size = body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
    let sort_keys = parse_sort(body.get("sort"))?;

    let mut matched = Vec::new();
    for (id, doc) in docs {
        if let Some(score) = evaluate(query, id, &doc.source)? {
            matched.push(Matched {
                id,
                doc,
                score,
                sort: Vec::new(),
            });
        }
    }

    let aggregations = match body.get("aggs").or_else(|| body.get("aggregations")) {
        Some(aggs) => Some(aggregate(aggs, &matched)?),
        None => None,
    };

    for m in &mut matched {
        m.sort = sort_keys
            .iter()
            .map(|key| match key {
                SortKey::Score(_) => json!(m.score),
                SortKey::Doc(_) => json!(m.doc.seq),
                SortKey::Field(field, _) => values_at(&m.doc.source, field)
                    .into_iter()
                    .next()
                    .cloned()
                    .unwrap_or(Value::Null),
            })
            .collect();
    }
    if sort_keys.is_empty() {
        matched.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.doc.seq.cmp(&b.doc.seq)));
    } else {
        matched.sort_by(|a, b| compare_keys(&sort_keys, &a.sort, &b.sort));
    }

    if let Some(after) = body.get("search_after").and_then(Value::as_array) {
        matched.retain(|m| compare_keys(&sort_keys, &m.sort, after) == Ordering::Greater);
    }
    // Collapse keeps the top hit per distinct field value.
    if let Some(field) = body.pointer("/collapse/field").and_then(Value::as_str) {
        let mut seen = HashSet::new();
        matched.retain(|m| {
            let key = values_at(&m.doc.source, field).first().map(|v| v.to_string());
            seen.insert(key)
        });
    }
    matched.truncate(size);

    let highlighter = Highlighter::from_body(body, query);
    let fetch_source = body.get("_source") != Some(&Value::Bool(false));
    let (includes, excludes) = source_filter(body.get("_source"));

    let hits = matched
        .into_iter()
        .map(|m| {
            let highlight = highlighter
                .as_ref()
                .map(|h| h.highlight(&m.doc.source))
                .filter(|h| !h.is_empty());
            Hit {
                id: m.id.to_string(),
                source: if fetch_source {
                    project(&m.doc.source, &includes, &excludes)
                } else {
                    Map::new()
                },
                highlight,
                sort: (!sort_keys.is_empty()).then_some(m.sort),
                score: Some(m.score),
            }
        })
        .collect();

    Ok(SearchResponse {
        hits: Hits { hits },
        pit_id: None,
        aggregations,
    })
}

fn parse_sort(sort: Option<&Value>) -> Result<Vec<SortKey<'_>>> {
    let entries = match sort {
        None => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries.iter().collect::<Vec<_>>(),
        Some(single) => vec![single],
    };
    entries
        .into_iter()
        .map(|entry| {
            let (field, order) = match entry {
                Value::String(field) => (field.as_str(), None),
                Value::Object(map) if map.len() == 1 => {
                    let (field, spec) = map.iter().next().ok_or_else(|| bad_request("empty sort"))?;
                    let order = spec
                        .as_str()
                        .or_else(|| spec.get("order").and_then(Value::as_str));
                    (field.as_str(), order)
                }
                other => return Err(bad_request(format!("unsupported sort {}", other))),
            };
            Ok(match field {
                "_score" => SortKey::Score(order.map_or(true, |o| o == "desc")),
                "_doc" => SortKey::Doc(order == Some("desc")),
                field => SortKey::Field(field, order == Some("desc")),
            })
        })
        .collect()
}

static NULL: Value = Value::Null;

fn compare_keys(keys: &[SortKey<'_>], a: &[Value], b: &[Value]) -> Ordering {
    for (i, key) in keys.iter().enumerate() {
        let desc = match key {
            SortKey::Score(desc) | SortKey::Doc(desc) | SortKey::Field(_, desc) => *desc,
        };
        let (x, y) = (a.get(i).unwrap_or(&NULL), b.get(i).unwrap_or(&NULL));
        // Missing values sort last in both directions.
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ord = compare_values(x, y);
                if desc {
                    ord.reverse()
                } else {
                    ord
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => match (parse_date(x), parse_date(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Every value at a dotted path, descending through arrays.
fn values_at<'a>(source: &'a Map<String, Value>, path: &str) -> Vec<&'a Value> {
    let mut current: Vec<&Value> = Vec::new();
    let mut parts = path.split('.');
    if let Some(first) = parts.next() {
        current.extend(source.get(first));
    }
    for part in parts {
        current = current
            .into_iter()
            .flat_map(|v| match v {
                Value::Array(items) => items.iter().filter_map(|i| i.get(part)).collect(),
                other => other.get(part).into_iter().collect::<Vec<_>>(),
            })
            .collect();
    }
    current
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        })
        .collect()
}

fn field_values<'a>(id: &'a str, source: &'a Map<String, Value>, field: &str) -> Vec<Value> {
    if field == "_id" {
        return vec![Value::String(id.to_string())];
    }
    values_at(source, field).into_iter().cloned().collect()
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        // Numeric fields accept their string form in term queries.
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        _ => a == b,
    }
}

fn clauses(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    }
}

fn single_entry<'a>(value: &'a Value, kind: &str) -> Result<(&'a String, &'a Value)> {
    value
        .as_object()
        .and_then(|m| m.iter().next())
        .ok_or_else(|| bad_request(format!("[{}] query malformed", kind)))
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Score of `source` against `query`, or `None` if it does not match.
fn evaluate(query: &Value, id: &str, source: &Map<String, Value>) -> Result<Option<f64>> {
    let (kind, body) = single_entry(query, "query")?;
    match kind.as_str() {
        "match_all" => Ok(Some(1.0)),
        "match_none" => Ok(None),
        "bool" => evaluate_bool(body, id, source),
        "term" => {
            let (field, spec) = single_entry(body, "term")?;
            let expected = spec.get("value").unwrap_or(spec);
            let hit = field_values(id, source, field)
                .iter()
                .any(|v| values_equal(v, expected));
            Ok(hit.then_some(1.0))
        }
        "terms" => {
            let (field, spec) = single_entry(body, "terms")?;
            let wanted = spec
                .as_array()
                .ok_or_else(|| bad_request("[terms] expects an array"))?;
            let hit = field_values(id, source, field)
                .iter()
                .any(|v| wanted.iter().any(|w| values_equal(v, w)));
            Ok(hit.then_some(1.0))
        }
        "range" => {
            let (field, spec) = single_entry(body, "range")?;
            let values = field_values(id, source, field);
            let hit = values.iter().any(|v| {
                let check = |bound: &str, ok: fn(Ordering) -> bool| {
                    spec.get(bound).map_or(true, |b| ok(compare_values(v, b)))
                };
                check("gte", |o| o != Ordering::Less)
                    && check("gt", |o| o == Ordering::Greater)
                    && check("lte", |o| o != Ordering::Greater)
                    && check("lt", |o| o == Ordering::Less)
            });
            Ok(hit.then_some(1.0))
        }
        "multi_match" => {
            let text = body.get("query").and_then(Value::as_str).unwrap_or_default();
            let wanted = tokens(text);
            let fields = body
                .get("fields")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut best = 0.0_f64;
            for field in fields.iter().filter_map(Value::as_str) {
                let (name, boost) = match field.split_once('^') {
                    Some((name, boost)) => (name, boost.parse::<f64>().unwrap_or(1.0)),
                    None => (field, 1.0),
                };
                let count = values_at(source, name)
                    .iter()
                    .filter_map(|v| v.as_str())
                    .flat_map(tokens)
                    .filter(|t| wanted.contains(t))
                    .count();
                best = best.max(boost * count as f64);
            }
            Ok((best > 0.0).then_some(best))
        }
        "nested" => {
            let inner = body
                .get("query")
                .ok_or_else(|| bad_request("[nested] requires a query"))?;
            evaluate(inner, id, source)
        }
        "text_expansion" => Ok(None),
        other => Err(bad_request(format!("unknown query [{}]", other))),
    }
}

fn evaluate_bool(body: &Value, id: &str, source: &Map<String, Value>) -> Result<Option<f64>> {
    let must = clauses(body.get("must"));
    let filter = clauses(body.get("filter"));
    let should = clauses(body.get("should"));
    let must_not = clauses(body.get("must_not"));

    let mut score = 0.0;
    for clause in &must {
        match evaluate(clause, id, source)? {
            Some(s) => score += s,
            None => return Ok(None),
        }
    }
    for clause in &filter {
        if evaluate(clause, id, source)?.is_none() {
            return Ok(None);
        }
    }
    for clause in &must_not {
        if evaluate(clause, id, source)?.is_some() {
            return Ok(None);
        }
    }

    let default_minimum = if must.is_empty() && filter.is_empty() && !should.is_empty() {
        1
    } else {
        0
    };
    let minimum = body
        .get("minimum_should_match")
        .and_then(Value::as_u64)
        .map_or(default_minimum, |m| m as usize);
    let mut matched_should = 0;
    for clause in &should {
        if let Some(s) = evaluate(clause, id, source)? {
            matched_should += 1;
            score += s;
        }
    }
    if matched_should < minimum {
        return Ok(None);
    }
    Ok(Some(if score > 0.0 { score } else { 1.0 }))
}

fn aggregate(aggs: &Value, matched: &[Matched<'_>]) -> Result<Value> {
    let defs = aggs
        .as_object()
        .ok_or_else(|| bad_request("aggregations must be an object"))?;
    let mut out = Map::new();
    for (name, def) in defs {
        let terms = def
            .get("terms")
            .ok_or_else(|| bad_request(format!("aggregation [{}] is not a terms aggregation", name)))?;
        let field = terms
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_request(format!("aggregation [{}] has no field", name)))?;
        let size = terms.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;

        let mut counts: BTreeMap<String, (Value, u64)> = BTreeMap::new();
        for m in matched {
            let mut seen = Vec::new();
            for value in values_at(&m.doc.source, field) {
                let key = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if seen.contains(&key) {
                    continue;
                }
                seen.push(key.clone());
                counts.entry(key).or_insert_with(|| (value.clone(), 0)).1 += 1;
            }
        }
        let mut buckets: Vec<(Value, u64)> = counts.into_values().collect();
        buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| compare_values(&a.0, &b.0)));
        buckets.truncate(size);
        let buckets: Vec<Value> = buckets
            .into_iter()
            .map(|(key, count)| json!({ "key": key, "doc_count": count }))
            .collect();
        out.insert(name.clone(), json!({ "buckets": buckets }));
    }
    Ok(Value::Object(out))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn source_filter(spec: Option<&Value>) -> (Vec<String>, Vec<String>) {
    match spec {
        Some(Value::Object(map)) => (
            string_list(map.get("includes")),
            string_list(map.get("excludes")),
        ),
        Some(other @ (Value::Array(_) | Value::String(_))) => (string_list(Some(other)), Vec::new()),
        _ => (Vec::new(), Vec::new()),
    }
}

fn project(
    source: &Map<String, Value>,
    includes: &[String],
    excludes: &[String],
) -> Map<String, Value> {
    let mut out: Map<String, Value> = source
        .iter()
        .filter(|(key, _)| {
            includes.is_empty()
                || includes.iter().any(|inc| {
                    inc == *key || inc.starts_with(&format!("{}.", key))
                })
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for exclude in excludes {
        remove_path(&mut out, exclude);
    }
    out
}

fn remove_path(map: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            map.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(inner)) = map.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

struct Highlighter {
    pre: String,
    post: String,
    fields: Vec<String>,
    words: Vec<String>,
}

impl Highlighter {
    fn from_body(body: &Value, query: &Value) -> Option<Self> {
        let spec = body.get("highlight")?;
        let first_tag = |key: &str| {
            spec.get(key)
                .and_then(Value::as_array)
                .and_then(|tags| tags.first())
                .and_then(Value::as_str)
                .unwrap_or("<em>")
                .to_string()
        };
        let fields = spec
            .get("fields")
            .and_then(Value::as_object)
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        let mut words = Vec::new();
        collect_match_words(query, &mut words);
        Some(Self {
            pre: first_tag("pre_tags"),
            post: first_tag("post_tags"),
            fields,
            words,
        })
    }

    fn highlight(&self, source: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        if self.words.is_empty() {
            return out;
        }
        for field in &self.fields {
            let fragments: Vec<Value> = values_at(source, field)
                .into_iter()
                .filter_map(Value::as_str)
                .filter_map(|text| self.mark(text))
                .map(Value::String)
                .collect();
            if !fragments.is_empty() {
                out.insert(field.clone(), Value::Array(fragments));
            }
        }
        out
    }

    fn mark(&self, text: &str) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        let mut word = String::new();
        let mut marked = false;
        let mut flush = |word: &mut String, out: &mut String| {
            if word.is_empty() {
                return;
            }
            if self.words.contains(&word.to_lowercase()) {
                out.push_str(&self.pre);
                out.push_str(word);
                out.push_str(&self.post);
                marked = true;
            } else {
                out.push_str(word);
            }
            word.clear();
        };
        for c in text.chars() {
            if c.is_alphanumeric() {
                word.push(c);
            } else {
                flush(&mut word, &mut out);
                out.push(c);
            }
        }
        flush(&mut word, &mut out);
        marked.then_some(out)
    }
}

fn collect_match_words(query: &Value, words: &mut Vec<String>) {
    match query {
        Value::Object(map) => {
            for (key, value) in map {
                if key == "multi_match" {
                    if let Some(text) = value.get("query").and_then(Value::as_str) {
                        words.extend(tokens(text));
                    }
                } else {
                    collect_match_words(value, words);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|i| collect_match_words(i, words)),
        _ => {}
    }
}

/// Task status helper for tests that script server-side tasks.
pub fn task_status(completed: bool, status: Value, running_secs: u64) -> TaskInfo {
    TaskInfo {
        completed,
        task: TaskDetails {
            status: status.as_object().cloned().unwrap_or_default(),
            cancelled: false,
            running_time_in_nanos: running_secs * 1_000_000_000,
        },
    }
}
