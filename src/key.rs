//! Cache key derivation for request descriptors.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::request::RequestDescriptor;

/// Identifier under which a response is stored and looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Short SHA-256 prefix of the key, stable across runs. Used in log fields
  /// where the full canonical key would be too noisy.
  pub fn fingerprint(&self) -> String {
    let digest = Sha256::digest(self.0.as_bytes());
    hex::encode(&digest[..6])
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for RequestKey {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

impl From<String> for RequestKey {
  fn from(key: String) -> Self {
    Self(key)
  }
}

impl From<&str> for RequestKey {
  fn from(key: &str) -> Self {
    Self(key.to_string())
  }
}

/// Prefix `url` with the configured base URL, if any.
pub fn final_url(base_api_url: Option<&str>, url: &str) -> String {
  match base_api_url {
    Some(base) => format!("{}{}", base, url),
    None => url.to_string(),
  }
}

/// Resolve the cache key of a descriptor.
///
/// An explicit, non-empty `id` is returned verbatim. Otherwise the key is the
/// compact JSON serialization of `{body, method, url}` (keys in sorted order),
/// where `url` already carries the base URL prefix.
pub fn resolve(descriptor: &RequestDescriptor, base_api_url: Option<&str>) -> RequestKey {
  if let Some(id) = descriptor.id.as_deref().filter(|id| !id.is_empty()) {
    return RequestKey(id.to_string());
  }

  let fields = json!({
    "url": final_url(base_api_url, &descriptor.url),
    "method": descriptor.method.as_str(),
    "body": descriptor.body.as_ref().map(|body| body.key_repr()),
  });

  RequestKey(fields.to_string())
}
