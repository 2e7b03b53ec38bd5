//! Document model shared by every producer and consumer of the store.
//!
//! Each document kind ([`Article`], [`Cluster`], [`Cve`]) comes in three
//! completeness variants:
//!
//! - **Base**: the fields needed to list or display a document cheaply,
//!   plus optional search highlights.
//! - **Full**: Base plus the heavy fields. The only variant written back
//!   to storage.
//! - **Partial**: every field optional. Validated against a
//!   [`RequiredFields`] list supplied by the caller at validation time.
//!
//! The field lists on [`DocumentKind`] are the single source of truth for
//! both validation and query projection: the Base field list *is* the
//! essential-field allow-list used by the query builder.

pub mod article;
pub mod cluster;
pub mod cve;

use std::fmt::Debug;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{ContractError, ValidationError};
use crate::pipeline::TransformStage;
use crate::query::SearchQuery;

pub use article::{
    Article, ArticleHighlights, BaseArticle, FullArticle, MlAttributes, MlClassification,
    PartialArticle, TagOfInterest, Tags,
};
pub use cluster::{BaseCluster, Cluster, ClusterHighlights, FullCluster, PartialCluster};
pub use cve::{
    BaseCve, Cve, CveHighlights, CveReference, CveStatus, Cvss2, Cvss2Data, Cvss3, Cvss3Data,
    FullCve, PartialCve, Severity,
};

/// A semantic (learned expansion) field consulted during semantic ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemanticField {
    /// Full path of the token field, e.g. `embeddings.title.elser.tokens`.
    pub field: &'static str,
    /// Set when the field lives inside a `nested` object.
    pub nested_path: Option<&'static str>,
    pub boost: u32,
}

/// A single document variant that can be read from or written to the store.
pub trait Document: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Backend-assigned identifier; `None` only for documents not yet saved.
    fn id(&self) -> Option<&str>;

    /// Value-level rules serde cannot express (minimum lengths, URL shape).
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Static wiring for one document kind.
///
/// Implemented by zero-sized marker types so the generic store client can
/// be parameterized over a kind without carrying any runtime state.
pub trait DocumentKind:
    Debug + Clone + Copy + PartialEq + Eq + Default + Send + Sync + 'static
{
    type Base: Document;
    type Full: Document;
    type Partial: Document;
    type Query: SearchQuery<Kind = Self>;

    /// Human-readable kind name used in logs and errors.
    const NAME: &'static str;
    /// Natural key used for deduplication before an id is known.
    const UNIQUE_FIELD: &'static str;
    /// Fields present on the Base variant. Doubles as the essential-field list.
    const BASE_FIELDS: &'static [&'static str];
    /// Heavy fields only present on the Full variant.
    const FULL_FIELDS: &'static [&'static str];
    /// Lexically searched fields and their relative boost.
    const SEARCH_FIELDS: &'static [(&'static str, u32)];
    /// Fields consulted for semantic ranking when a model is configured.
    const SEMANTIC_FIELDS: &'static [SemanticField] = &[];
    /// Backend-only fields never returned in `_source`.
    const EXCLUDED_FIELDS: &'static [&'static str] = &[];
    /// Numeric fields that may be atomically incremented.
    const COUNTER_FIELDS: &'static [&'static str] = &[];

    /// Index mapping (field name → storage type) used at index creation.
    ///
    /// Kept by hand beside the struct definitions; it is not derived from
    /// them, so both must be changed together.
    fn mappings() -> Value;

    /// Transform stages run on Full documents before they are written.
    fn transform_stages() -> Vec<TransformStage> {
        Vec::new()
    }

    fn essential_fields() -> &'static [&'static str] {
        Self::BASE_FIELDS
    }

    /// Whether `field` is a top-level field of the Full variant (or `id`).
    fn is_modeled(field: &str) -> bool {
        field == "id" || Self::BASE_FIELDS.contains(&field) || Self::FULL_FIELDS.contains(&field)
    }
}

/// The externally supplied list of fields a Partial document must carry.
///
/// Construction checks the caller contract (non-empty, every field modeled
/// on `K`), so holding a `RequiredFields<K>` proves the list is usable.
pub struct RequiredFields<K: DocumentKind> {
    fields: Vec<String>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: DocumentKind> RequiredFields<K> {
    pub fn new<I, S>(fields: I) -> Result<Self, ContractError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for field in fields {
            let field = field.into();
            if !K::is_modeled(&field) {
                return Err(ContractError::UnknownField {
                    kind: K::NAME,
                    field,
                });
            }
            if !out.contains(&field) {
                out.push(field);
            }
        }
        if out.is_empty() {
            return Err(ContractError::MissingRequiredFields);
        }
        Ok(Self {
            fields: out,
            _kind: PhantomData,
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl<K: DocumentKind> Clone for RequiredFields<K> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: DocumentKind> Debug for RequiredFields<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequiredFields")
            .field("kind", &K::NAME)
            .field("fields", &self.fields)
            .finish()
    }
}

impl<K: DocumentKind> PartialEq for RequiredFields<K> {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

/// How much of a document a read requests.
#[derive(Debug, Clone, PartialEq)]
pub enum Completeness<K: DocumentKind> {
    /// Essential fields only.
    Base,
    /// Every stored field except the kind's excluded fields.
    Full,
    /// Exactly the listed fields, each of which must come back non-null.
    Partial(RequiredFields<K>),
}

impl<K: DocumentKind> Completeness<K> {
    pub fn partial<I, S>(fields: I) -> Result<Self, ContractError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RequiredFields::new(fields).map(Completeness::Partial)
    }
}

/// A raw payload that failed validation, with the reason.
#[derive(Debug, Clone)]
pub struct Reject {
    pub raw: Value,
    pub error: ValidationError,
}

/// Outcome of converting a batch of raw payloads: the valid documents and
/// the rejects. A bad payload never fails the whole batch.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub valid: Vec<T>,
    pub rejects: Vec<Reject>,
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self {
            valid: Vec::new(),
            rejects: Vec::new(),
        }
    }
}

impl<T> Batch<T> {
    pub fn convert<I, F>(raws: I, mut convert: F) -> Self
    where
        I: IntoIterator<Item = Value>,
        F: FnMut(&Value) -> Result<T, ValidationError>,
    {
        let mut batch = Batch::default();
        for raw in raws {
            match convert(&raw) {
                Ok(doc) => batch.valid.push(doc),
                Err(error) => batch.rejects.push(Reject { raw, error }),
            }
        }
        batch
    }

    pub fn extend(&mut self, other: Batch<T>) {
        self.valid.extend(other.valid);
        self.rejects.extend(other.rejects);
    }
}

pub fn validate_base<K: DocumentKind>(raw: &Value) -> Result<K::Base, ValidationError> {
    validate::<K, K::Base>(raw)
}

pub fn validate_full<K: DocumentKind>(raw: &Value) -> Result<K::Full, ValidationError> {
    validate::<K, K::Full>(raw)
}

/// Validate a Partial document: present fields must be well-formed and
/// every field in `required` must be non-null.
pub fn validate_partial<K: DocumentKind>(
    raw: &Value,
    required: &RequiredFields<K>,
) -> Result<K::Partial, ValidationError> {
    let doc = validate::<K, K::Partial>(raw)?;
    let rendered = serde_json::to_value(&doc)
        .map_err(|e| ValidationError::new(K::NAME, e.to_string()).located(raw))?;
    for field in required.fields() {
        if rendered.get(field).map_or(true, Value::is_null) {
            return Err(
                ValidationError::new(K::NAME, format!("missing value for {}", field)).located(raw),
            );
        }
    }
    Ok(doc)
}

fn validate<K: DocumentKind, T: Document>(raw: &Value) -> Result<T, ValidationError> {
    let doc = T::deserialize(raw)
        .map_err(|e| ValidationError::new(K::NAME, e.to_string()).located(raw))?;
    doc.check()
        .map_err(|reason| ValidationError::new(K::NAME, reason).located(raw))?;
    Ok(doc)
}

// ─── Field helpers shared by the kinds ──────────────────────────────

pub(crate) fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(|s| s.trim().to_string())
}

pub(crate) fn trimmed_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(|s| s.map(|s| s.trim().to_string()))
}

pub(crate) fn min_len(field: &str, value: &str, min: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len < min {
        return Err(format!(
            "{} must be at least {} characters, got {}",
            field, min, len
        ));
    }
    Ok(())
}

/// Accepts absolute `http` and `https` URLs with a host.
pub(crate) fn check_http_url(field: &str, value: &str) -> Result<(), String> {
    if value.chars().any(char::is_whitespace) {
        return Err(format!("{} is not a valid URL: '{}'", field, value));
    }
    let url = Url::parse(value)
        .map_err(|e| format!("{} is not a valid URL: '{}' ({})", field, value, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("{} must be an http(s) URL, got '{}'", field, value));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(format!("{} has no host: '{}'", field, value));
    }
    Ok(())
}
