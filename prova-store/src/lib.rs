//! Append-only event repository for the Prova deployment-evidence service.
//!
//! The [`Repository`] trait is the single coordination point of the service:
//! idempotent ingest, subject-scoped timeline queries with opaque cursors,
//! extension-key correlation lookups, and export-job records. Three
//! interchangeable engines are provided behind cargo features:
//!
//! - **`memory`** — single-process store guarded by a reader/writer lock
//! - **`pg`** — PostgreSQL, one row per event, JSONB extension lookups
//! - **`sqlite`** — SQLite, RFC 3339 text timestamps, `json_extract` lookups
//!
//! Events are immutable after ingest; the only permitted mutation is insert,
//! and [`Repository::delete_event`] always fails with
//! [`StoreError::AppendOnly`].

#![forbid(unsafe_code)]

mod engine;
mod error;
#[cfg(any(feature = "pg", feature = "sqlite"))]
pub mod migrate;
mod repository;

pub use engine::*;
pub use error::*;
pub use repository::*;
