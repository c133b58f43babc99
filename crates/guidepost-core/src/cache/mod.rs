//! Local caching of tour, group, bucket and guide views.
//!
//! This module provides the `CacheManager` for storing JSON snapshots of
//! views read from storage. Snapshots are considered stale after 60 minutes
//! and are removed when a persisted change invalidates them.

pub mod manager;

pub use manager::{CacheManager, CachedData};
