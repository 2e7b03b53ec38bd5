//! # OSINTer Core
//!
//! Shared, I/O-free logic for the OSINTer document store: the document
//! model with its three completeness variants, per-document validation,
//! the per-kind query builders, and the transform stages applied before
//! documents are persisted.
//!
//! This crate contains no tokio, HTTP, or filesystem dependencies. The
//! `osinter-store` crate wires it to a search backend.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Article, Cluster and CVE documents (Base / Full / Partial) and validation |
//! | [`query`] | Search queries and the backend query payload builder |
//! | [`pipeline`] | Capability-flagged transform stages run before writes |
//! | [`chunk`] | Paragraph-boundary content chunking used by the article stage |
//! | [`error`] | Validation and caller-contract errors |

pub mod chunk;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod query;

pub use error::{ContractError, ValidationError};
pub use models::{Batch, Completeness, Document, DocumentKind, Reject, RequiredFields};
pub use pipeline::{Capabilities, TransformStage};
pub use query::{QueryContext, SearchQuery, SortOrder, PAGE_SIZE};
