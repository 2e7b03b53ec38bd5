//! # OSINTer Store
//!
//! Typed document-store client for OSINT articles, topic clusters and CVEs
//! kept in an Elasticsearch-compatible search backend.
//!
//! The document model, validation and query building live in the I/O-free
//! [`osinter_core`] crate. This crate adds the backend plumbing: the
//! [`Backend`](backend::Backend) trait with HTTP and in-memory
//! implementations, the generic [`DocumentStore`](store::DocumentStore),
//! point-in-time pagination, the parallel bulk transform pool and the
//! server-side task awaiter.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ osinter-core │──▶│  DocumentStore<K> │──▶│   Backend    │
//! │ model+query  │   │ cursor / bulk     │   │ HTTP / memory│
//! └──────────────┘   └──────────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`backend`] | Backend trait, HTTP and in-memory implementations |
//! | [`store`] | Generic store client |
//! | [`cursor`] | Point-in-time pagination |
//! | [`bulk`] | Parallel transform + serialization for bulk writes |
//! | [`task`] | Polling and cancelling server-side tasks |
//! | [`kinds`] | Article / Cluster / CVE stores wired from configuration |
//! | [`config`] | TOML configuration parsing |
//! | [`progress`] | Bulk write progress on stderr |
//! | [`error`] | Store error type |

pub mod backend;
pub mod bulk;
pub mod config;
pub mod cursor;
pub mod error;
pub mod kinds;
pub mod progress;
pub mod store;
pub mod task;

pub use osinter_core;
