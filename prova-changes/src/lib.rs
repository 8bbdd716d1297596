//! Change aggregation for the Prova deployment-evidence service.
//!
//! A *change* is a logical deployment operation derived — never stored — from
//! the raw events that share a change identity. This crate folds a timeline
//! slice into change summaries: result and health merging, health progression
//! around the operation window, post-deploy degradation, evidence freshness,
//! external correlation fields, and approval evidence. Results are filtered,
//! sorted `(completed_at DESC, id ASC)` and paginated with opaque cursors.

#![forbid(unsafe_code)]

mod aggregate;
mod change;
mod error;
mod query;
mod view;

pub use aggregate::*;
pub use change::*;
pub use error::*;
pub use query::*;
pub use view::*;
