//! Keyed response cache used by the fetch orchestrator.
//!
//! This module provides:
//! - The [`CacheBackend`] contract (`get`/`set` with optional TTL)
//! - An in-memory store with per-entry expiry timers
//! - A no-op store for consumers without a configured cache

mod storage;
mod traits;

pub use storage::{MemoryCache, NoopCache};
pub use traits::CacheBackend;
pub(crate) use traits::is_truthy;
