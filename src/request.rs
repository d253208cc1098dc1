//! Request descriptors: what a caller asks the orchestrators to fetch or send.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  #[default]
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      other => Err(format!("unsupported HTTP method: {}", other)),
    }
  }
}

/// Payload sent with a request.
///
/// JSON payloads are serialized and sent with `content-type: application/json`.
/// Binary and form payloads are sent as-is and never get a forced JSON content type.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
  Json(Value),
  Binary(Vec<u8>),
  Form(Vec<(String, String)>),
}

impl RequestBody {
  /// Whether this payload is JSON (and therefore gets the default JSON content type).
  pub fn is_json(&self) -> bool {
    matches!(self, RequestBody::Json(_))
  }

  /// Stable JSON representation used when deriving a cache key.
  ///
  /// Binary payloads are represented by their SHA-256 digest so large uploads
  /// don't end up inside the key.
  pub(crate) fn key_repr(&self) -> Value {
    match self {
      RequestBody::Json(value) => value.clone(),
      RequestBody::Binary(bytes) => {
        let digest = Sha256::digest(bytes);
        serde_json::json!({ "binary": hex::encode(digest) })
      }
      RequestBody::Form(pairs) => serde_json::json!({ "form": pairs }),
    }
  }
}

impl From<Value> for RequestBody {
  fn from(value: Value) -> Self {
    RequestBody::Json(value)
  }
}

impl From<Vec<u8>> for RequestBody {
  fn from(bytes: Vec<u8>) -> Self {
    RequestBody::Binary(bytes)
  }
}

/// Everything that defines one logical request.
///
/// Descriptors are plain values: the orchestrators read them, never mutate them.
/// Build one with [`RequestDescriptor::get`] or [`RequestDescriptor::new`] and the
/// `with_*` methods.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
  /// Explicit cache key. When unset (or empty) the key is derived from url, method and body.
  pub id: Option<String>,
  pub url: String,
  pub method: Method,
  pub body: Option<RequestBody>,
  /// Extra headers; these override the default `content-type`.
  pub headers: BTreeMap<String, String>,
  /// Time-to-live of the cache entry written for this request
  pub cache_expiry: Option<Duration>,
  /// Retry budget: number of re-attempts after the first failure
  pub retry: u32,
  /// Interval of the recurring revalidation, if any
  pub poll_interval: Option<Duration>,
  /// Whether the request fires automatically
  pub enabled: bool,
}

impl RequestDescriptor {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      id: None,
      url: url.into(),
      method,
      body: None,
      headers: BTreeMap::new(),
      cache_expiry: None,
      retry: 0,
      poll_interval: None,
      enabled: true,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn with_cache_expiry(mut self, ttl: Duration) -> Self {
    self.cache_expiry = Some(ttl);
    self
  }

  pub fn with_retry(mut self, retry: u32) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = Some(interval);
    self
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  /// Legacy spelling of `enabled(false)`: the request only fires through
  /// an explicit `trigger_api()` call.
  pub fn manual_trigger(self, manual: bool) -> Self {
    self.enabled(!manual)
  }

  /// Poll interval if polling is active for this descriptor.
  pub fn active_poll_interval(&self) -> Option<Duration> {
    self
      .poll_interval
      .filter(|interval| self.enabled && !interval.is_zero())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_method_parse_is_case_insensitive() {
    assert_eq!("patch".parse::<Method>(), Ok(Method::Patch));
    assert_eq!("DELETE".parse::<Method>(), Ok(Method::Delete));
    assert!("TRACE".parse::<Method>().is_err());
  }

  #[test]
  fn test_method_serializes_uppercase() {
    assert_eq!(serde_json::to_value(Method::Post).unwrap(), json!("POST"));
  }

  #[test]
  fn test_manual_trigger_is_inverse_of_enabled() {
    let descriptor = RequestDescriptor::get("/users").manual_trigger(true);
    assert!(!descriptor.enabled);

    let descriptor = descriptor.manual_trigger(false);
    assert!(descriptor.enabled);
  }

  #[test]
  fn test_poll_interval_inactive_when_disabled_or_zero() {
    let polling = RequestDescriptor::get("/users").with_poll_interval(Duration::from_secs(1));
    assert_eq!(polling.active_poll_interval(), Some(Duration::from_secs(1)));

    assert_eq!(polling.clone().enabled(false).active_poll_interval(), None);
    assert_eq!(
      polling.with_poll_interval(Duration::ZERO).active_poll_interval(),
      None
    );
  }

  #[test]
  fn test_binary_key_repr_uses_digest() {
    let body = RequestBody::Binary(vec![1, 2, 3]);
    let repr = body.key_repr();
    let digest = repr["binary"].as_str().unwrap();
    assert_eq!(digest.len(), 64);
    assert!(!body.is_json());
  }
}
