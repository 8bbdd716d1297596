//! Webhook adapter contract for the Prova deployment-evidence service.
//!
//! Provider-specific webhook decoders live outside the core; this crate
//! defines the narrow capability set an adapter advertises — provider id,
//! event-type and event-id headers, an authorize check, and a pure parse
//! function producing canonical events — plus a registry keyed by provider
//! id. Adapters never touch storage.

#![forbid(unsafe_code)]

mod adapter;
mod auth;
mod error;

pub use adapter::*;
pub use auth::*;
pub use error::*;
