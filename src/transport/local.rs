use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use super::{Operation, OperationError, OperationFuture, Transport};
use crate::store::FilterSet;

/// Transport backed by in-process async closures.
///
/// # Example
///
/// ```ignore
/// let transport = LocalTransport::new();
/// transport.register("getAlerts", |filters| async move {
///     Ok(serde_json::json!([{ "severity": "high", "title": filters.company_id }]))
/// });
/// ```
#[derive(Default)]
pub struct LocalTransport {
  operations: RwLock<HashMap<String, Operation>>,
}

impl LocalTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register (or replace) the operation called `name`.
  pub fn register<F, Fut>(&self, name: impl Into<String>, operation: F)
  where
    F: Fn(FilterSet) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
  {
    let operation: Operation =
      Arc::new(move |filters: FilterSet| -> OperationFuture { Box::pin(operation(filters)) });
    self
      .operations
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(name.into(), operation);
  }

  pub fn unregister(&self, name: &str) {
    self
      .operations
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .remove(name);
  }
}

impl Transport for LocalTransport {
  fn resolve(&self, name: &str) -> Option<Operation> {
    self
      .operations
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .get(name)
      .cloned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_registered_operation_resolves() {
    let transport = LocalTransport::new();
    transport.register("echo", |filters: FilterSet| async move {
      Ok(json!({ "status": filters.status }))
    });

    let op = transport.resolve("echo").unwrap();
    let filters = FilterSet {
      status: "paid".into(),
      ..FilterSet::default()
    };
    assert_eq!(op(filters).await, Ok(json!({"status": "paid"})));
  }

  #[test]
  fn test_missing_operation_is_none() {
    let transport = LocalTransport::new();
    transport.register("gone", |_| async { Ok(json!(null)) });
    transport.unregister("gone");
    assert!(transport.resolve("gone").is_none());
    assert!(transport.resolve("never").is_none());
  }
}
