//! Prova — a deployment-evidence service.
//!
//! Prova ingests heterogeneous lifecycle signals (source-control webhooks, a
//! GitOps controller, cluster observations) into an append-only canonical
//! event log and answers two correlated questions about any application:
//! what happened (a subject-scoped timeline) and what changed (raw events
//! folded into deployment operations with result, health progression and
//! evidence).
//!
//! The [`Service`] is the boundary everything external talks to: it
//! validates and stamps incoming events, computes integrity hashes,
//! delegates to the repository, runs change aggregation over timeline
//! snapshots, and orchestrates evidence-pack export. The workspace crates
//! are re-exported here:
//!
//! - [`prova_core`] — canonical event, integrity hash, CloudEvents parsing,
//!   subject triple
//! - [`store`](prova_store) — the append-only repository and its engines
//! - [`changes`](prova_changes) — the derived change view
//! - [`collector`](prova_collector) — the GitOps controller collector
//! - [`export`](prova_export) — evidence packs and artifact sinks
//! - [`webhook`](prova_webhook) — the provider adapter contract
//!
//! # Example
//!
//! ```rust,ignore
//! use prova::{Service, MemoryRepository, FilesystemSink};
//!
//! let service = Service::new(
//!     Box::new(MemoryRepository::new()),
//!     Box::new(FilesystemSink::new("/var/lib/prova/artifacts")),
//! );
//!
//! let receipt = service.ingest_payload(
//!     "application/cloudevents+json",
//!     body,
//! ).await?;
//! ```

#![forbid(unsafe_code)]

mod service;

pub use service::*;

pub use prova_changes as changes;
pub use prova_collector as collector;
pub use prova_export as export;
pub use prova_store as store;
pub use prova_webhook as webhook;

pub use prova_changes::{ChangeDetail, ChangeEvidence, ChangeList, ChangeQuery};
pub use prova_collector::{Collector, FileCheckpointStore};
pub use prova_core::{Event, Subject};
pub use prova_export::{ArtifactSink, FilesystemSink};
#[cfg(feature = "memory")]
pub use prova_store::MemoryRepository;
#[cfg(feature = "pg")]
pub use prova_store::PgRepository;
#[cfg(feature = "sqlite")]
pub use prova_store::SqliteRepository;
pub use prova_store::{
    ExportJob, IngestReceipt, IngestStatus, Repository, SubjectInfo, TimelineQuery,
    TimelineResult,
};
