//! Evidence-pack export for the Prova deployment-evidence service.
//!
//! An evidence pack is a self-contained JSON artifact describing one change:
//! a primary change summary plus the sorted timeline of included events. Two
//! hashes accompany it — `checksum_sha256` over the sorted timeline JSON, and
//! `deterministic_hash_sha256` over the canonical change document, which is
//! byte-stable across runs regardless of job id or generation time.

#![forbid(unsafe_code)]

mod error;
mod pack;
mod sink;

pub use error::*;
pub use pack::*;
pub use sink::*;
