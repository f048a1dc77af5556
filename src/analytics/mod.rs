//! Per-view query hooks.
//!
//! Every dashboard view is an [`AnalyticsQuery`]: an operation name, a typed
//! payload and a pure derivation into presentation-ready aggregates. A
//! [`QueryHook`] drives one query through the fetch orchestrator and keeps
//! its state in step with the coordination store.

mod format;
mod hook;
mod views;

pub mod aging;
pub mod alerts;
pub mod companies;
pub mod customers;
pub mod payment_delay;
pub mod revenue;
pub mod status;
pub mod summary;
pub mod tax;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub use format::Formatter;
pub use hook::{HookOptions, QueryHook};
pub use views::{Panel, View};

/// Operation names of every view, in dashboard order.
pub const OPERATIONS: [&str; 9] = [
  summary::SummaryQuery::OPERATION,
  revenue::RevenueQuery::OPERATION,
  status::StatusQuery::OPERATION,
  customers::CustomersQuery::OPERATION,
  companies::CompaniesQuery::OPERATION,
  aging::AgingQuery::OPERATION,
  payment_delay::PaymentDelayQuery::OPERATION,
  alerts::AlertsQuery::OPERATION,
  tax::TaxQuery::OPERATION,
];

/// One analytics view: what to fetch and how to shape it.
pub trait AnalyticsQuery: Send + Sync + 'static {
  /// Transport operation name
  const OPERATION: &'static str;
  /// Human readable view name
  const TITLE: &'static str;

  type Payload: DeserializeOwned + Serialize + Send + Sync + 'static;
  type Derived: Send + Sync + 'static;

  /// Aggregates shown by the view. Must be pure.
  fn derive(payload: &Self::Payload, fmt: &Formatter) -> Self::Derived;

  /// One-line summary for logs and the CLI.
  fn headline(derived: &Self::Derived) -> String;

  /// Rows handed to the exporter. Lists export one row per element.
  fn records(payload: &Self::Payload) -> Vec<Value> {
    match serde_json::to_value(payload) {
      Ok(Value::Array(rows)) => rows,
      Ok(Value::Null) | Err(_) => Vec::new(),
      Ok(other) => vec![other],
    }
  }
}

/// Reads `null` the same as a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Absent amounts count as zero.
pub(crate) fn amount(value: Option<f64>) -> f64 {
  value.unwrap_or(0.0)
}

pub(crate) fn count(value: Option<u64>) -> u64 {
  value.unwrap_or(0)
}

/// `part / whole`, or 0 when `whole` is 0.
pub(crate) fn ratio(part: f64, whole: f64) -> f64 {
  if whole == 0.0 {
    0.0
  } else {
    part / whole
  }
}
