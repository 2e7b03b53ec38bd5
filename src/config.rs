use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the backend password when `backend.username` is set.
pub const PASSWORD_ENV: &str = "OSINTER_BACKEND_PASSWORD";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub indices: IndicesConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub username: Option<String>,
}

fn default_verify_tls() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndicesConfig {
    #[serde(default = "default_articles_index")]
    pub articles: String,
    #[serde(default = "default_clusters_index")]
    pub clusters: String,
    #[serde(default = "default_cves_index")]
    pub cves: String,
}

impl Default for IndicesConfig {
    fn default() -> Self {
        Self {
            articles: default_articles_index(),
            clusters: default_clusters_index(),
            cves: default_cves_index(),
        }
    }
}

fn default_articles_index() -> String {
    "osinter_articles".to_string()
}
fn default_clusters_index() -> String {
    "osinter_clusters".to_string()
}
fn default_cves_index() -> String {
    "osinter_cves".to_string()
}

/// Semantic ranking and backend-side enrichment. Both are off unless named.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SemanticConfig {
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub ingest_pipeline: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            keep_alive: default_keep_alive(),
        }
    }
}

fn default_page_size() -> usize {
    osinter_core::PAGE_SIZE
}
fn default_keep_alive() -> String {
    "1m".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BulkConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_worker_reserve")]
    pub worker_reserve: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            worker_reserve: default_worker_reserve(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_worker_reserve() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct TasksConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    2
}

impl TasksConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn check_index_name(key: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("indices.{} must not be empty", key);
    }
    if name.chars().any(|c| c.is_uppercase()) {
        anyhow::bail!("indices.{} must be lowercase, got '{}'", key, name);
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate backend
    Url::parse(&config.backend.url)
        .with_context(|| format!("backend.url is not a valid URL: '{}'", config.backend.url))?;
    if config.backend.timeout_secs == 0 {
        anyhow::bail!("backend.timeout_secs must be >= 1");
    }

    check_index_name("articles", &config.indices.articles)?;
    check_index_name("clusters", &config.indices.clusters)?;
    check_index_name("cves", &config.indices.cves)?;

    if config.pagination.page_size == 0 {
        anyhow::bail!("pagination.page_size must be >= 1");
    }
    if config.bulk.chunk_size == 0 {
        anyhow::bail!("bulk.chunk_size must be >= 1");
    }
    if config.tasks.poll_interval_secs == 0 {
        anyhow::bail!("tasks.poll_interval_secs must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config("[backend]\nurl = \"http://localhost:9200\"\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.indices.articles, "osinter_articles");
        assert_eq!(config.pagination.page_size, 10_000);
        assert_eq!(config.pagination.keep_alive, "1m");
        assert_eq!(config.bulk.chunk_size, 500);
        assert_eq!(config.tasks.poll_interval(), Duration::from_secs(2));
        assert!(config.backend.verify_tls);
        assert!(config.semantic.model_id.is_none());
    }

    #[test]
    fn full_config_parses() {
        let file = write_config(
            r#"
[backend]
url = "https://es.internal:9200"
cert_path = "./.elasticsearch.crt"
timeout_secs = 10
username = "elastic"

[indices]
articles = "news"

[semantic]
model_id = ".elser_model_2"
ingest_pipeline = "elser-pipeline"

[pagination]
page_size = 250
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backend.timeout(), Duration::from_secs(10));
        assert_eq!(config.indices.articles, "news");
        assert_eq!(config.indices.cves, "osinter_cves");
        assert_eq!(config.semantic.ingest_pipeline.as_deref(), Some("elser-pipeline"));
        assert_eq!(config.pagination.page_size, 250);
    }

    #[test]
    fn rejects_uppercase_index_names() {
        let file = write_config("[backend]\nurl = \"http://localhost:9200\"\n[indices]\nclusters = \"Clusters\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("indices.clusters"));
    }

    #[test]
    fn rejects_zero_sizes() {
        let file = write_config("[backend]\nurl = \"http://localhost:9200\"\n[bulk]\nchunk_size = 0\n");
        assert!(load_config(file.path()).is_err());
        let file =
            write_config("[backend]\nurl = \"http://localhost:9200\"\n[pagination]\npage_size = 0\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/osinter.example.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.indices.cves, "osinter_cves");
    }

    #[test]
    fn rejects_unparseable_url() {
        let file = write_config("[backend]\nurl = \"not a url\"\n");
        assert!(load_config(file.path()).is_err());
    }
}
