//! Core trait for cache backends.

use serde_json::Value;
use std::time::Duration;

/// Keyed store of last-known response values.
///
/// This is the whole contract the orchestrators depend on: how the store is
/// shared between consumers is decided by whoever builds the
/// [`ApiContext`](crate::ApiContext).
pub trait CacheBackend: Send + Sync {
  /// Look up the value stored under `key`. No side effects.
  fn get(&self, key: &str) -> Option<Value>;

  /// Store `value` under `key`, replacing any existing entry.
  ///
  /// A positive `ttl` schedules deletion of `key` once it elapses.
  fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Value;
}

/// JavaScript-style truthiness of a JSON value.
///
/// Cache presence and error unwrapping both test values this way, so a cached
/// `0`, `""`, `false` or `null` counts as a miss.
pub(crate) fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
    Value::String(s) => !s.is_empty(),
    Value::Array(_) | Value::Object(_) => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_truthiness() {
    assert!(!is_truthy(&json!(null)));
    assert!(!is_truthy(&json!(false)));
    assert!(!is_truthy(&json!(0)));
    assert!(!is_truthy(&json!(0.0)));
    assert!(!is_truthy(&json!("")));

    assert!(is_truthy(&json!(true)));
    assert!(is_truthy(&json!(-1)));
    assert!(is_truthy(&json!("0")));
    assert!(is_truthy(&json!([])));
    assert!(is_truthy(&json!({})));
  }
}
