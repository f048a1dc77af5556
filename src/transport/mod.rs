//! Boundary to whatever actually produces analytics payloads.
//!
//! The data layer only sees named operations that take a [`FilterSet`] and
//! resolve to a JSON payload. Whether that is HTTP, IPC or an in-process
//! closure is up to the [`Transport`] implementation; tests wire closures
//! through `LocalTransport`.

mod http;
#[cfg(test)]
mod local;

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::store::FilterSet;

pub use http::HttpTransport;
#[cfg(test)]
pub use local::LocalTransport;

/// Failure reported by a single operation invocation.
///
/// Aborting an invocation is not a failure: the orchestrator drops the
/// future instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct OperationError(pub String);

/// Future returned by an [`Operation`].
pub type OperationFuture = BoxFuture<'static, Result<Value, OperationError>>;

/// A named, invocable data-fetch operation.
pub type Operation = Arc<dyn Fn(FilterSet) -> OperationFuture + Send + Sync>;

/// Source of operations.
pub trait Transport: Send + Sync {
  /// Look up an operation by name. `None` means it is not wired up.
  fn resolve(&self, name: &str) -> Option<Operation>;
}
