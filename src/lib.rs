//! Stale-while-revalidate HTTP requests.
//!
//! Reads go through a [`FetchOrchestrator`]: the cached payload for a request
//! is published right away, the network is always consulted, and the cache
//! and observable [`RequestState`] are only updated when the response differs.
//! Failures are retried up to the descriptor's budget and surfaced as a
//! normalized [`ApiError`]. Writes go through a [`MutationOrchestrator`],
//! which shares the retry and error path but never touches the cache.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod key;
pub mod logging;
pub mod mutation;
pub mod query;
pub mod request;
pub mod retry;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::{CacheBackend, MemoryCache, NoopCache};
pub use context::ApiContext;
pub use error::{normalize, ApiError, FetchError};
pub use key::RequestKey;
pub use mutation::MutationOrchestrator;
pub use query::{FetchOptions, FetchOrchestrator};
pub use request::{Method, RequestBody, RequestDescriptor};
pub use retry::Backoff;
pub use state::RequestState;
pub use transport::{ReqwestTransport, Transport};
