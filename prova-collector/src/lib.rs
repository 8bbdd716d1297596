//! GitOps collector for the Prova deployment-evidence service.
//!
//! The collector observes a continuous-delivery controller's per-application
//! state — either through a subscribed update stream or a periodic fetch —
//! and turns it into durable canonical events with deterministic identities,
//! so that re-observing the same controller state is always a no-op. A
//! per-application checkpoint survives restarts and keeps replays idempotent.

#![forbid(unsafe_code)]

mod application;
mod checkpoint;
mod collector;
mod error;
mod normalize;
mod source;

pub use application::*;
pub use checkpoint::*;
pub use collector::*;
pub use error::*;
pub use normalize::*;
pub use source::*;
