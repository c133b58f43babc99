//! Guidepost core - tour group staffing and ticket bucket allocation.
//!
//! This crate holds the engines behind the `guidepost` tools:
//!
//! - `groups`: participants, group totals and transfers between groups
//! - `guides`: guide references, identity resolution and assignment
//! - `tickets`: per-tour ticket requirements and bucket allocation
//! - `sync`: the persistence reconciler, retry policy and presentation sinks
//! - `store`: the record store seam with REST and in-memory implementations
//! - `session`: one tour's working state tying the engines together
//! - `cache`, `config`: local snapshots and application configuration

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod groups;
pub mod guides;
pub mod models;
pub mod session;
pub mod store;
pub mod sync;
pub mod tickets;
pub mod utils;

pub use context::EngineContext;
pub use error::EngineError;
pub use session::TourSession;
