//! Transform stages applied to Full documents before they are written.
//!
//! A stage may depend on capabilities of the deployment (a configured
//! semantic model, a configured backend ingest pipeline). When a required
//! capability is missing the stage is skipped and the document passes
//! through untouched; it is still written.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::chunk::{chunk_text, DEFAULT_MAX_TOKENS};

pub type Source = Map<String, Value>;

/// A named document transformation.
///
/// `call` is a plain function pointer so stages hold no state and can be
/// sent freely to worker threads.
#[derive(Debug, Clone, Copy)]
pub struct TransformStage {
    pub name: &'static str,
    pub call: fn(Source) -> Source,
    pub requires_semantic_model: bool,
    pub requires_backend_pipeline: bool,
}

/// What the current deployment offers to transform stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub semantic_model: bool,
    pub backend_pipeline: bool,
}

impl TransformStage {
    pub fn applies(&self, caps: Capabilities) -> bool {
        (!self.requires_semantic_model || caps.semantic_model)
            && (!self.requires_backend_pipeline || caps.backend_pipeline)
    }
}

pub fn run_stages(mut source: Source, stages: &[TransformStage], caps: Capabilities) -> Source {
    for stage in stages.iter().filter(|s| s.applies(caps)) {
        source = (stage.call)(source);
    }
    source
}

/// Render a document into the source map sent to the backend.
///
/// The `id` is removed (it travels as the operation's `_id`), top-level
/// nulls are dropped, then the applicable stages run in order.
pub fn prepare_source<T: Serialize>(
    doc: &T,
    stages: &[TransformStage],
    caps: Capabilities,
) -> Result<(Option<String>, Source), serde_json::Error> {
    let mut source = match serde_json::to_value(doc)? {
        Value::Object(map) => map,
        other => {
            return Err(serde::ser::Error::custom(format!(
                "documents must serialize to an object, got {}",
                other
            )))
        }
    };
    let id = match source.remove("id") {
        Some(Value::String(id)) => Some(id),
        _ => None,
    };
    source.retain(|_, v| !v.is_null());
    Ok((id, run_stages(source, stages, caps)))
}

/// Split `content` into `embeddings.content_chunks` for the ingest pipeline.
pub fn content_chunks_stage() -> TransformStage {
    TransformStage {
        name: "content_chunks",
        call: add_content_chunks,
        requires_semantic_model: true,
        requires_backend_pipeline: true,
    }
}

fn add_content_chunks(mut source: Source) -> Source {
    let chunks = match source.get("content").and_then(Value::as_str) {
        Some(content) => chunk_text(content, DEFAULT_MAX_TOKENS),
        None => return source,
    };
    let chunks = match serde_json::to_value(chunks) {
        Ok(v) => v,
        Err(_) => return source,
    };

    let embeddings = source
        .entry("embeddings")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(map) = embeddings {
        map.insert("content_chunks".to_string(), chunks);
    }
    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shout(mut source: Source) -> Source {
        if let Some(Value::String(title)) = source.get_mut("title") {
            *title = title.to_uppercase();
        }
        source
    }

    fn shout_stage(requires_semantic_model: bool) -> TransformStage {
        TransformStage {
            name: "shout",
            call: shout,
            requires_semantic_model,
            requires_backend_pipeline: false,
        }
    }

    #[test]
    fn stage_without_capability_is_a_no_op() {
        let doc = json!({ "id": "a", "title": "hello", "author": null });
        let (id, source) =
            prepare_source(&doc, &[shout_stage(true)], Capabilities::default()).unwrap();
        assert_eq!(id.as_deref(), Some("a"));
        assert_eq!(source.get("title"), Some(&json!("hello")));
        assert!(!source.contains_key("author"));
        assert!(!source.contains_key("id"));
    }

    #[test]
    fn stage_runs_when_capabilities_are_present() {
        let caps = Capabilities {
            semantic_model: true,
            backend_pipeline: false,
        };
        let (_, source) = prepare_source(&json!({ "title": "hello" }), &[shout_stage(true)], caps)
            .unwrap();
        assert_eq!(source.get("title"), Some(&json!("HELLO")));
    }

    #[test]
    fn content_chunks_need_both_capabilities() {
        let stage = content_chunks_stage();
        assert!(!stage.applies(Capabilities {
            semantic_model: true,
            backend_pipeline: false
        }));
        assert!(stage.applies(Capabilities {
            semantic_model: true,
            backend_pipeline: true
        }));
    }

    #[test]
    fn content_chunks_are_added_under_embeddings() {
        let source = json!({ "content": "One.\n\nTwo." });
        let source = match source {
            Value::Object(map) => add_content_chunks(map),
            _ => unreachable!(),
        };
        let chunks = &source["embeddings"]["content_chunks"];
        assert_eq!(chunks.as_array().unwrap().len(), 1);
        assert_eq!(chunks[0]["text"], "One.\n\nTwo.");
    }

    #[test]
    fn non_object_documents_are_an_error() {
        assert!(prepare_source(&json!([1, 2]), &[], Capabilities::default()).is_err());
    }
}
