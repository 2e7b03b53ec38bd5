//! Concrete stores for the three document kinds, wired from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use osinter_core::models::{Article, Cluster, Cve};

use crate::backend::http::HttpOptions;
use crate::backend::{Backend, HttpBackend};
use crate::config::{Config, PASSWORD_ENV};
use crate::progress::BulkProgressReporter;
use crate::store::{DocumentStore, SemanticSettings, StoreSettings};

pub type ArticleStore = DocumentStore<Article>;
pub type ClusterStore = DocumentStore<Cluster>;
pub type CveStore = DocumentStore<Cve>;

/// Build the HTTP backend described by `config.backend`.
pub fn connect(config: &Config) -> Result<Arc<dyn Backend>> {
    let backend = &config.backend;
    let ca_cert_pem = match &backend.cert_path {
        Some(path) => Some(
            std::fs::read(path)
                .with_context(|| format!("Failed to read CA certificate: {}", path.display()))?,
        ),
        None => None,
    };
    let password = match &backend.username {
        Some(_) => Some(
            std::env::var(PASSWORD_ENV)
                .with_context(|| format!("{} must be set when backend.username is", PASSWORD_ENV))?,
        ),
        None => None,
    };
    let options = HttpOptions {
        timeout: backend.timeout(),
        ca_cert_pem,
        verify_tls: backend.verify_tls,
        username: backend.username.clone(),
        password,
    };
    let http = HttpBackend::new(&backend.url, options)
        .with_context(|| format!("Failed to set up backend client for {}", backend.url))?;
    Ok(Arc::new(http))
}

fn settings(config: &Config) -> StoreSettings {
    StoreSettings {
        page_size: config.pagination.page_size,
        keep_alive: config.pagination.keep_alive.clone(),
        chunk_size: config.bulk.chunk_size,
        worker_reserve: config.bulk.worker_reserve,
    }
}

/// All three stores over one shared backend.
#[derive(Clone)]
pub struct Stores {
    pub articles: ArticleStore,
    pub clusters: ClusterStore,
    pub cves: CveStore,
}

impl Stores {
    /// Only articles carry semantic fields, so only the article store gets
    /// the semantic settings.
    pub fn new(
        backend: Arc<dyn Backend>,
        config: &Config,
        progress: Arc<dyn BulkProgressReporter>,
    ) -> Self {
        let semantic = SemanticSettings {
            model_id: config.semantic.model_id.clone(),
            ingest_pipeline: config.semantic.ingest_pipeline.clone(),
        };
        Self {
            articles: ArticleStore::new(backend.clone(), &config.indices.articles)
                .with_semantic(semantic)
                .with_settings(settings(config))
                .with_progress(progress.clone()),
            clusters: ClusterStore::new(backend.clone(), &config.indices.clusters)
                .with_settings(settings(config))
                .with_progress(progress.clone()),
            cves: CveStore::new(backend, &config.indices.cves)
                .with_settings(settings(config))
                .with_progress(progress),
        }
    }

    /// Create every missing index. Returns the names of the created ones.
    pub async fn ensure_indices(&self) -> crate::error::Result<Vec<String>> {
        let mut created = Vec::new();
        if self.articles.ensure_index().await? {
            created.push(self.articles.index().to_string());
        }
        if self.clusters.ensure_index().await? {
            created.push(self.clusters.index().to_string());
        }
        if self.cves.ensure_index().await? {
            created.push(self.cves.index().to_string());
        }
        Ok(created)
    }
}
