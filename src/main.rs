//! # OSINTer CLI (`osinter`)
//!
//! Operational commands against the document store: index setup, dedup
//! checks, searches, deletes and waiting on server-side tasks.
//!
//! ## Usage
//!
//! ```bash
//! osinter --config ./config/osinter.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `osinter init` | Create missing indices with their mappings |
//! | `osinter exists <kind> <values..>` | Print which unique values are stored |
//! | `osinter search <kind>` | Search and print documents as JSON |
//! | `osinter delete <kind> <ids..>` | Delete documents by id |
//! | `osinter unique <kind> <field>` | Distinct values of a field with counts |
//! | `osinter await-task <task_id>` | Poll a server-side task until it finishes |
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); results go to stdout.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use osinter_core::{Completeness, DocumentKind, SearchQuery};
use osinter_store::backend::Backend;
use osinter_store::config;
use osinter_store::kinds::{self, Stores};
use osinter_store::progress::ProgressMode;
use osinter_store::store::DocumentStore;
use osinter_store::task::{self, CancelPrompt, FixedAnswer, StdinPrompt, TaskAwaiter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "osinter",
    about = "OSINTer document store: articles, clusters and CVEs on an Elasticsearch-compatible backend",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/osinter.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Article,
    Cluster,
    Cve,
}

#[derive(Subcommand)]
enum Commands {
    /// Create every missing index with its field mapping. Idempotent.
    Init,

    /// Print the given unique-field values that are already stored.
    Exists {
        kind: Kind,
        values: Vec<String>,
    },

    /// Search documents and print them as a JSON array.
    Search {
        kind: Kind,

        /// Free text matched against the kind's search fields.
        #[arg(long)]
        term: Option<String>,

        /// Free text for semantic ranking (needs `semantic.model_id`).
        #[arg(long)]
        semantic: Option<String>,

        /// Maximum number of documents; 0 means all of them.
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Include highlighted fragments.
        #[arg(long)]
        highlight: bool,

        /// Return Full documents instead of Base.
        #[arg(long)]
        full: bool,
    },

    /// Delete documents by id.
    Delete {
        kind: Kind,
        ids: Vec<String>,
    },

    /// Distinct values of a field with their document counts.
    Unique {
        kind: Kind,
        field: String,
    },

    /// Poll a server-side task until it finishes. Ctrl-C stops waiting.
    AwaitTask {
        task_id: String,

        /// Status field reported as progress against `total`.
        #[arg(long, default_value = "updated")]
        status_field: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let backend = kinds::connect(&cfg)?;
    let stores = Stores::new(
        backend.clone(),
        &cfg,
        ProgressMode::default_for_tty().reporter(),
    );

    match cli.command {
        Commands::Init => {
            let created = stores.ensure_indices().await?;
            if created.is_empty() {
                println!("All indices already exist.");
            } else {
                println!("Created indices: {}", created.join(", "));
            }
        }
        Commands::Exists { kind, values } => {
            let values: BTreeSet<String> = values.into_iter().collect();
            let found = match kind {
                Kind::Article => stores.articles.exists(&values).await?,
                Kind::Cluster => stores.clusters.exists(&values).await?,
                Kind::Cve => stores.cves.exists(&values).await?,
            };
            for value in found {
                println!("{}", value);
            }
        }
        Commands::Search {
            kind,
            term,
            semantic,
            limit,
            highlight,
            full,
        } => {
            let request = SearchRequest {
                term,
                semantic,
                limit,
                highlight,
                full,
            };
            let docs = match kind {
                Kind::Article => search(&stores.articles, &request).await?,
                Kind::Cluster => search(&stores.clusters, &request).await?,
                Kind::Cve => search(&stores.cves, &request).await?,
            };
            println!("{}", serde_json::to_string_pretty(&docs)?);
        }
        Commands::Delete { kind, ids } => {
            let ids: BTreeSet<String> = ids.into_iter().collect();
            let deleted = match kind {
                Kind::Article => stores.articles.delete(&ids).await?,
                Kind::Cluster => stores.clusters.delete(&ids).await?,
                Kind::Cve => stores.cves.delete(&ids).await?,
            };
            println!("Deleted {} of {} documents.", deleted, ids.len());
        }
        Commands::Unique { kind, field } => {
            let values = match kind {
                Kind::Article => stores.articles.unique_values(&field).await?,
                Kind::Cluster => stores.clusters.unique_values(&field).await?,
                Kind::Cve => stores.cves.unique_values(&field).await?,
            };
            for (value, count) in values {
                println!("{}\t{}", value, count);
            }
        }
        Commands::AwaitTask {
            task_id,
            status_field,
        } => {
            await_task(backend, &cfg, &task_id, &status_field).await?;
        }
    }

    Ok(())
}

struct SearchRequest {
    term: Option<String>,
    semantic: Option<String>,
    limit: usize,
    highlight: bool,
    full: bool,
}

async fn search<K: DocumentKind>(
    store: &DocumentStore<K>,
    request: &SearchRequest,
) -> Result<Vec<serde_json::Value>> {
    let mut query = K::Query::default();
    let options = query.options_mut();
    options.search_term = request.term.clone();
    options.semantic_search = request.semantic.clone();
    options.limit = request.limit;
    options.highlight = request.highlight;

    let completeness = if request.full {
        Completeness::Full
    } else {
        Completeness::Base
    };
    let docs = store.query(&query, &completeness).await?;
    if !docs.rejects().is_empty() {
        eprintln!("{} documents failed validation and were skipped", docs.rejects().len());
    }
    Ok(docs.to_values()?)
}

async fn await_task(
    backend: Arc<dyn Backend>,
    cfg: &config::Config,
    task_id: &str,
    status_field: &str,
) -> Result<()> {
    let awaiter = TaskAwaiter::new(backend, cfg.tasks.poll_interval());
    let formatter = task::progress_formatter(status_field);
    let prompt: Arc<dyn CancelPrompt> = if atty::is(atty::Stream::Stdin) {
        Arc::new(StdinPrompt)
    } else {
        Arc::new(FixedAnswer(false))
    };
    let cancel = task::interrupt_on(tokio::signal::ctrl_c());

    let summary = awaiter.wait(task_id, &formatter, cancel, prompt).await?;
    println!(
        "Task {} {} after {}s",
        summary.task_id,
        summary.state.as_str(),
        summary.elapsed.as_secs()
    );
    Ok(())
}
