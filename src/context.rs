//! Provider-level wiring shared by orchestrators: cache handle and base URL.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheBackend, MemoryCache, NoopCache};
use crate::key::RequestKey;

/// Cache and base URL handed to every orchestrator.
///
/// Each [`ApiContext::scoped`] context owns an isolated store. Consumers that
/// should see each other's entries must share one context (it is cheap to
/// clone) or build their contexts from the same [`CacheBackend`]. There is no
/// implicit process-wide cache.
///
/// The default context caches nothing.
#[derive(Clone)]
pub struct ApiContext {
  cache: Arc<dyn CacheBackend>,
  base_api_url: Option<String>,
}

impl Default for ApiContext {
  fn default() -> Self {
    Self::with_cache(Arc::new(NoopCache))
  }
}

impl ApiContext {
  /// Context with its own in-memory cache.
  pub fn scoped() -> Self {
    Self::with_cache(Arc::new(MemoryCache::new()))
  }

  pub fn with_cache(cache: Arc<dyn CacheBackend>) -> Self {
    Self {
      cache,
      base_api_url: None,
    }
  }

  /// Prefix prepended to every request URL.
  pub fn with_base_url(mut self, base_api_url: impl Into<String>) -> Self {
    self.base_api_url = Some(base_api_url.into()).filter(|url| !url.is_empty());
    self
  }

  pub fn base_api_url(&self) -> Option<&str> {
    self.base_api_url.as_deref()
  }

  pub fn cache(&self) -> &Arc<dyn CacheBackend> {
    &self.cache
  }

  pub fn get_cache(&self, key: &RequestKey) -> Option<Value> {
    self.cache.get(key.as_str())
  }

  pub fn set_cache(&self, key: &RequestKey, value: Value, ttl: Option<Duration>) -> Value {
    self.cache.set(key.as_str(), value, ttl)
  }
}

impl fmt::Debug for ApiContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ApiContext")
      .field("base_api_url", &self.base_api_url)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_default_context_caches_nothing() {
    let context = ApiContext::default();
    let key = RequestKey::from("k");
    context.set_cache(&key, json!(1), None);
    assert_eq!(context.get_cache(&key), None);
  }

  #[test]
  fn test_scoped_contexts_are_isolated() {
    let a = ApiContext::scoped();
    let b = ApiContext::scoped();
    let key = RequestKey::from("k");

    a.set_cache(&key, json!("a"), None);
    assert_eq!(b.get_cache(&key), None);
  }

  #[test]
  fn test_cloned_context_shares_cache() {
    let a = ApiContext::scoped();
    let b = a.clone().with_base_url("https://api.example.com");
    let key = RequestKey::from("k");

    a.set_cache(&key, json!("shared"), None);
    assert_eq!(b.get_cache(&key), Some(json!("shared")));
    assert_eq!(b.base_api_url(), Some("https://api.example.com"));
    assert_eq!(a.base_api_url(), None);
  }

  #[test]
  fn test_empty_base_url_is_ignored() {
    let context = ApiContext::scoped().with_base_url("");
    assert_eq!(context.base_api_url(), None);
  }
}
