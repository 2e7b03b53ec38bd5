//! News articles gathered by the scraper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{check_http_url, min_len, trimmed, trimmed_opt, Document, DocumentKind, SemanticField};
use crate::pipeline::{content_chunks_stage, TransformStage};
use crate::query::ArticleSearchQuery;

/// Marker type wiring articles into the generic store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Article;

impl DocumentKind for Article {
    type Base = BaseArticle;
    type Full = FullArticle;
    type Partial = PartialArticle;
    type Query = ArticleSearchQuery;

    const NAME: &'static str = "article";
    const UNIQUE_FIELD: &'static str = "url";
    const BASE_FIELDS: &'static [&'static str] = &[
        "title",
        "description",
        "url",
        "image_url",
        "profile",
        "source",
        "author",
        "publish_date",
        "inserted_at",
        "read_times",
        "similar",
        "ml",
        "tags",
        "summary",
    ];
    const FULL_FIELDS: &'static [&'static str] = &["formatted_content", "content"];
    const SEARCH_FIELDS: &'static [(&'static str, u32)] =
        &[("title", 5), ("description", 3), ("content", 1)];
    const SEMANTIC_FIELDS: &'static [SemanticField] = &[
        SemanticField {
            field: "embeddings.content_chunks.elser.tokens",
            nested_path: Some("embeddings.content_chunks"),
            boost: 15,
        },
        SemanticField {
            field: "embeddings.description.elser.tokens",
            nested_path: None,
            boost: 9,
        },
        SemanticField {
            field: "embeddings.title.elser.tokens",
            nested_path: None,
            boost: 15,
        },
    ];
    const EXCLUDED_FIELDS: &'static [&'static str] = &["embeddings"];
    const COUNTER_FIELDS: &'static [&'static str] = &["read_times"];

    fn mappings() -> Value {
        let elser_tokens = json!({
            "properties": {
                "elser": { "properties": { "tokens": { "type": "sparse_vector" } } }
            }
        });
        json!({
            "properties": {
                "title": { "type": "text" },
                "description": { "type": "text" },
                "content": { "type": "text" },
                "formatted_content": { "type": "text" },
                "summary": { "type": "text" },
                "url": { "type": "keyword" },
                "profile": { "type": "keyword" },
                "source": { "type": "keyword" },
                "image_url": { "type": "keyword" },
                "author": { "type": "keyword" },
                "inserted_at": { "type": "date" },
                "publish_date": { "type": "date" },
                "read_times": { "type": "unsigned_long" },
                "tags": {
                    "type": "object",
                    "properties": {
                        "interesting": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "keyword" },
                                "values": { "type": "keyword" }
                            }
                        },
                        "automatic": { "type": "keyword" }
                    }
                },
                "similar": { "type": "keyword" },
                "ml": {
                    "type": "object",
                    "properties": {
                        "cluster": { "type": "keyword" },
                        "coordinates": { "type": "float" },
                        "labels": { "type": "keyword" },
                        "incident": { "type": "integer" }
                    }
                },
                "embeddings": {
                    "properties": {
                        "title": elser_tokens,
                        "description": elser_tokens,
                        "content_chunks": {
                            "type": "nested",
                            "properties": {
                                "text": { "type": "text", "index": false },
                                "hash": { "type": "keyword", "index": false },
                                "elser": { "properties": { "tokens": { "type": "sparse_vector" } } }
                            }
                        }
                    }
                }
            }
        })
    }

    fn transform_stages() -> Vec<TransformStage> {
        vec![content_chunks_stage()]
    }
}

/// Matched fragments per searched field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleHighlights {
    pub title: Option<Vec<String>>,
    pub description: Option<Vec<String>>,
    pub content: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlClassification {
    pub processed: bool,
    pub incident: bool,
    pub campaign: bool,
    pub vulnerability: bool,
    pub threat_actor: bool,
    pub research: bool,
    pub malware: bool,
}

/// Output of the clustering pipeline for one article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlAttributes {
    pub cluster: String,
    pub coordinates: (f64, f64),
    pub labels: Vec<String>,
    pub incident: i64,
    pub classification: MlClassification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagOfInterest {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    pub automatic: Vec<String>,
    pub interesting: Vec<TagOfInterest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseArticle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(deserialize_with = "trimmed")]
    pub title: String,
    #[serde(deserialize_with = "trimmed")]
    pub description: String,
    pub url: String,
    pub image_url: String,
    pub profile: String,
    pub source: String,
    #[serde(default)]
    pub author: Option<String>,
    pub publish_date: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub inserted_at: DateTime<Utc>,
    #[serde(default)]
    pub read_times: u64,
    #[serde(default)]
    pub similar: Vec<String>,
    #[serde(default)]
    pub ml: MlAttributes,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, skip_serializing)]
    pub highlights: Option<ArticleHighlights>,
}

impl Document for BaseArticle {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn check(&self) -> Result<(), String> {
        min_len("title", &self.title, 3)?;
        min_len("description", &self.description, 10)?;
        check_http_url("url", &self.url)?;
        if !self.image_url.is_empty() {
            check_http_url("image_url", &self.image_url)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullArticle {
    #[serde(flatten)]
    pub base: BaseArticle,
    pub formatted_content: String,
    pub content: String,
}

impl Document for FullArticle {
    fn id(&self) -> Option<&str> {
        self.base.id()
    }

    fn check(&self) -> Result<(), String> {
        self.base.check()?;
        min_len("formatted_content", &self.formatted_content, 10)?;
        min_len("content", &self.content, 10)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialArticle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(deserialize_with = "trimmed_opt")]
    pub title: Option<String>,
    #[serde(deserialize_with = "trimmed_opt")]
    pub description: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub profile: Option<String>,
    pub source: Option<String>,
    pub author: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub inserted_at: Option<DateTime<Utc>>,
    pub read_times: Option<u64>,
    pub similar: Option<Vec<String>>,
    pub ml: Option<MlAttributes>,
    pub tags: Option<Tags>,
    pub summary: Option<String>,
    pub formatted_content: Option<String>,
    pub content: Option<String>,
    #[serde(skip_serializing)]
    pub highlights: Option<ArticleHighlights>,
}

impl Document for PartialArticle {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn check(&self) -> Result<(), String> {
        if let Some(title) = &self.title {
            min_len("title", title, 3)?;
        }
        if let Some(description) = &self.description {
            min_len("description", description, 10)?;
        }
        if let Some(url) = &self.url {
            check_http_url("url", url)?;
        }
        if let Some(image_url) = self.image_url.as_deref().filter(|u| !u.is_empty()) {
            check_http_url("image_url", image_url)?;
        }
        if let Some(formatted) = &self.formatted_content {
            min_len("formatted_content", formatted, 10)?;
        }
        if let Some(content) = &self.content {
            min_len("content", content, 10)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{validate_base, validate_full};
    use std::collections::BTreeSet;

    fn full_payload() -> Value {
        json!({
            "id": "a1",
            "title": "  Ransomware hits hospital  ",
            "description": "A long enough description of the incident.",
            "url": "https://news.example.com/ransomware",
            "image_url": "https://news.example.com/img.png",
            "profile": "examplenews",
            "source": "Example News",
            "publish_date": "2024-03-01T10:00:00+01:00",
            "formatted_content": "# Heading\n\nSome formatted content",
            "content": "Some plain content for the article body.",
            "embeddings": { "title": { "elser": { "tokens": { "ransom": 1.2 } } } }
        })
    }

    #[test]
    fn full_article_validates_and_trims() {
        let doc = validate_full::<Article>(&full_payload()).unwrap();
        assert_eq!(doc.base.title, "Ransomware hits hospital");
        assert_eq!(doc.base.read_times, 0);
        assert_eq!(doc.base.publish_date.to_rfc3339(), "2024-03-01T09:00:00+00:00");
        assert_eq!(doc.id(), Some("a1"));
    }

    #[test]
    fn naive_timestamps_are_rejected() {
        let mut raw = full_payload();
        raw["publish_date"] = json!("2024-03-01T10:00:00");
        assert!(validate_full::<Article>(&raw).is_err());
    }

    #[test]
    fn base_does_not_need_content() {
        let mut raw = full_payload();
        raw.as_object_mut().unwrap().remove("content");
        assert!(validate_base::<Article>(&raw).is_ok());
        assert!(validate_full::<Article>(&raw).is_err());
    }

    #[test]
    fn highlights_are_read_but_never_serialized() {
        let mut raw = full_payload();
        raw["highlights"] = json!({ "title": ["**Ransomware** hits hospital"] });
        let doc = validate_full::<Article>(&raw).unwrap();
        assert!(doc.base.highlights.is_some());

        let out = serde_json::to_value(&doc).unwrap();
        assert!(out.get("highlights").is_none());
    }

    #[test]
    fn serialized_full_fields_match_declared_fields() {
        let doc = validate_full::<Article>(&full_payload()).unwrap();
        let out = serde_json::to_value(&doc).unwrap();
        let serialized: BTreeSet<&str> = out
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .filter(|k| *k != "id")
            .collect();
        let declared: BTreeSet<&str> = Article::BASE_FIELDS
            .iter()
            .chain(Article::FULL_FIELDS)
            .copied()
            .collect();
        assert_eq!(serialized, declared);
    }

    #[test]
    fn mapping_covers_declared_fields() {
        let mappings = Article::mappings();
        for field in Article::BASE_FIELDS.iter().chain(Article::FULL_FIELDS) {
            assert!(
                mappings["properties"].get(*field).is_some(),
                "mapping is missing {}",
                field
            );
        }
    }

    #[test]
    fn bad_image_url_is_rejected_but_empty_is_fine() {
        let mut raw = full_payload();
        raw["image_url"] = json!("");
        assert!(validate_full::<Article>(&raw).is_ok());
        raw["image_url"] = json!("javascript:alert(1)");
        assert!(validate_full::<Article>(&raw).is_err());
    }
}
