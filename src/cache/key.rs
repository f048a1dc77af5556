//! Cache key derivation.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Error raised when a filter set cannot be turned into a cache key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to serialize filters for `{operation}`: {message}")]
pub struct KeyError {
  pub operation: String,
  pub message: String,
}

/// Key under which an operation's result is cached.
///
/// Rendered as `{operation}_{canonical_json}`. Object keys are sorted
/// recursively so two logically identical filter sets always produce the
/// same key regardless of field order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn derive<F: Serialize + ?Sized>(operation: &str, filters: &F) -> Result<Self, KeyError> {
    let value = serde_json::to_value(filters).map_err(|e| KeyError {
      operation: operation.to_string(),
      message: e.to_string(),
    })?;

    let mut out = String::with_capacity(operation.len() + 64);
    out.push_str(operation);
    out.push('_');
    write_canonical(&value, &mut out);
    Ok(Self(out))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for CacheKey {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<_> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      out.push('{');
      for (i, (k, v)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        // Strings always serialize
        out.push_str(&Value::String(k.clone()).to_string());
        out.push(':');
        write_canonical(v, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}
