//! Elasticsearch-compatible REST backend.
//!
//! Every request carries the fixed timeout from the configuration. Non-2xx
//! responses become [`StoreError::Backend`] with the response body; nothing
//! is retried here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{Backend, BulkOperation, BulkResponse, SearchResponse, TaskInfo, UpdateAction};
use crate::error::{Result, StoreError};

/// Connection options for [`HttpBackend`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub timeout: Duration,
    /// Extra trusted CA certificate (PEM).
    pub ca_cert_pem: Option<Vec<u8>>,
    pub verify_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            ca_cert_pem: None,
            verify_tls: true,
            username: None,
            password: None,
        }
    }
}

pub struct HttpBackend {
    client: Client,
    base: Url,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct IdResponse {
    #[serde(alias = "_id")]
    id: String,
}

impl HttpBackend {
    pub fn new(url: &str, options: HttpOptions) -> Result<Self> {
        let base = Url::parse(url)
            .map_err(|e| StoreError::Malformed(format!("invalid backend url '{}': {}", url, e)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Malformed(format!(
                "backend url '{}' cannot carry a path",
                url
            )));
        }

        let mut builder = Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(!options.verify_tls);
        if let Some(pem) = &options.ca_cert_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }

        Ok(Self {
            client: builder.build()?,
            base,
            username: options.username,
            password: options.password,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let url = self.endpoint(segments);
        debug!(%method, %url, "backend request");
        let req = self.client.request(method, url);
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_ref()),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Backend {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let bytes = self.send(req).await?.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Malformed(format!("{}: {}", e, String::from_utf8_lossy(&bytes))))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn search(&self, index: Option<&str>, body: &Value) -> Result<SearchResponse> {
        let req = match index {
            Some(index) => self.request(Method::POST, &[index, "_search"]),
            None => self.request(Method::POST, &["_search"]),
        };
        self.send_json(req.json(body)).await
    }

    async fn open_point_in_time(&self, index: &str, keep_alive: &str) -> Result<String> {
        let req = self
            .request(Method::POST, &[index, "_pit"])
            .query(&[("keep_alive", keep_alive)]);
        let resp: IdResponse = self.send_json(req).await?;
        Ok(resp.id)
    }

    async fn close_point_in_time(&self, pit_id: &str) -> Result<()> {
        let req = self
            .request(Method::DELETE, &["_pit"])
            .json(&json!({ "id": pit_id }));
        self.send(req).await?;
        Ok(())
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        let mut body = String::new();
        for op in operations {
            op.write_ndjson(&mut body)?;
        }
        let req = self
            .request(Method::POST, &["_bulk"])
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let value: Value = self.send_json(req).await?;
        BulkResponse::from_value(value)
    }

    async fn index_document(
        &self,
        index: &str,
        id: Option<&str>,
        source: &Map<String, Value>,
        pipeline: Option<&str>,
    ) -> Result<String> {
        let mut req = match id {
            Some(id) => self.request(Method::PUT, &[index, "_doc", id]),
            None => self.request(Method::POST, &[index, "_doc"]),
        };
        if let Some(pipeline) = pipeline {
            req = req.query(&[("pipeline", pipeline)]);
        }
        let resp: IdResponse = self.send_json(req.json(source)).await?;
        Ok(resp.id)
    }

    async fn update(&self, index: &str, id: &str, action: &UpdateAction) -> Result<()> {
        let req = self
            .request(Method::POST, &[index, "_update", id])
            .json(&action.body());
        self.send(req).await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskInfo> {
        self.send_json(self.request(Method::GET, &["_tasks", task_id]))
            .await
    }

    async fn cancel_task(&self, task_id: &str) -> Result<()> {
        self.send(self.request(Method::POST, &["_tasks", task_id, "_cancel"]))
            .await?;
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self.request(Method::HEAD, &[index]).send().await?;
        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => Err(StoreError::Backend {
                status,
                body: String::new(),
            }),
        }
    }

    async fn create_index(&self, index: &str, mappings: &Value) -> Result<()> {
        let req = self
            .request(Method::PUT, &[index])
            .json(&json!({ "mappings": mappings }));
        self.send(req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> HttpBackend {
        HttpBackend::new(&server.uri(), HttpOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn search_parses_hits_and_aggregations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/articles/_search"))
            .and(body_json(json!({ "size": 1 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": { "hits": [
                    { "_id": "a", "_source": { "title": "x" }, "sort": ["u", 3] }
                ] },
                "aggregations": { "sources": { "buckets": [] } }
            })))
            .mount(&server)
            .await;

        let resp = backend(&server)
            .search(Some("articles"), &json!({ "size": 1 }))
            .await
            .unwrap();
        assert_eq!(resp.hits.hits.len(), 1);
        assert_eq!(resp.hits.hits[0].sort, Some(vec![json!("u"), json!(3)]));
        assert!(resp.aggregations.is_some());
    }

    #[tokio::test]
    async fn error_status_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_search"))
            .respond_with(ResponseTemplate::new(400).set_body_string("search_phase_execution_exception"))
            .mount(&server)
            .await;

        let err = backend(&server).search(None, &json!({})).await.unwrap_err();
        match err {
            StoreError::Backend { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("search_phase"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn point_in_time_uses_keep_alive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/articles/_pit"))
            .and(query_param("keep_alive", "1m"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "pit-1" })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/_pit"))
            .and(body_json(json!({ "id": "pit-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "succeeded": true })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server);
        let pit = backend.open_point_in_time("articles", "1m").await.unwrap();
        assert_eq!(pit, "pit-1");
        backend.close_point_in_time(&pit).await.unwrap();
    }

    #[tokio::test]
    async fn bulk_sends_ndjson() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": false,
                "items": [{ "delete": { "_id": "a", "status": 200 } }]
            })))
            .mount(&server)
            .await;

        let resp = backend(&server)
            .bulk(&[BulkOperation::Delete {
                index: "articles".into(),
                id: "a".into(),
            }])
            .await
            .unwrap();
        assert_eq!(resp.items.len(), 1);
        assert!(resp.items[0].succeeded());
    }

    #[tokio::test]
    async fn index_document_with_pipeline_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/articles/_doc"))
            .and(query_param("pipeline", "elser"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "_id": "new-id", "result": "created" })))
            .mount(&server)
            .await;

        let source = json!({ "title": "t" }).as_object().unwrap().clone();
        let id = backend(&server)
            .index_document("articles", None, &source, Some("elser"))
            .await
            .unwrap();
        assert_eq!(id, "new-id");
    }

    #[tokio::test]
    async fn missing_index_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/articles"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(!backend(&server).index_exists("articles").await.unwrap());
    }

    #[tokio::test]
    async fn task_status_and_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_tasks/node:42"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "completed": false,
                "task": {
                    "status": { "updated": 10, "total": 100 },
                    "cancelled": false,
                    "running_time_in_nanos": 2_000_000_000u64
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(
            &server.uri(),
            HttpOptions {
                username: Some("elastic".into()),
                password: Some("changeme".into()),
                ..HttpOptions::default()
            },
        )
        .unwrap();
        let info = backend.get_task("node:42").await.unwrap();
        assert!(!info.completed);
        assert_eq!(info.task.status["updated"], 10);
    }
}
