use futures::future::BoxFuture;
use std::fmt;
use std::str::FromStr;

use super::aging::AgingQuery;
use super::alerts::AlertsQuery;
use super::companies::CompaniesQuery;
use super::customers::CustomersQuery;
use super::payment_delay::PaymentDelayQuery;
use super::revenue::RevenueQuery;
use super::status::StatusQuery;
use super::summary::SummaryQuery;
use super::tax::TaxQuery;
use super::{AnalyticsQuery, QueryHook};
use crate::export::{ExportBlob, ExportError, ExportFormat};
use crate::services::DataLayer;

/// A mounted view with its query type erased.
pub trait Panel: Send {
  fn title(&self) -> &'static str;
  fn operation(&self) -> &'static str;
  fn poll(&mut self) -> bool;
  fn resolve(&mut self) -> BoxFuture<'_, bool>;
  fn refetch(&mut self);
  fn revision(&self) -> u64;
  fn is_loading(&self) -> bool;
  fn error(&self) -> Option<&str>;
  fn headline(&self) -> Option<String>;
  fn export(&self, format: ExportFormat) -> Result<ExportBlob, ExportError>;
}

impl<Q: AnalyticsQuery> Panel for QueryHook<Q> {
  fn title(&self) -> &'static str {
    QueryHook::title(self)
  }

  fn operation(&self) -> &'static str {
    Q::OPERATION
  }

  fn poll(&mut self) -> bool {
    QueryHook::poll(self)
  }

  fn resolve(&mut self) -> BoxFuture<'_, bool> {
    Box::pin(QueryHook::resolve(self))
  }

  fn refetch(&mut self) {
    QueryHook::refetch(self)
  }

  fn revision(&self) -> u64 {
    QueryHook::revision(self)
  }

  fn is_loading(&self) -> bool {
    QueryHook::is_loading(self)
  }

  fn error(&self) -> Option<&str> {
    QueryHook::error(self)
  }

  fn headline(&self) -> Option<String> {
    QueryHook::headline(self)
  }

  fn export(&self, format: ExportFormat) -> Result<ExportBlob, ExportError> {
    QueryHook::export(self, format)
  }
}

/// Every dashboard view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
  Summary,
  Revenue,
  Status,
  Customers,
  Companies,
  Aging,
  PaymentDelay,
  Alerts,
  Tax,
}

impl View {
  pub const ALL: [View; 9] = [
    View::Summary,
    View::Revenue,
    View::Status,
    View::Customers,
    View::Companies,
    View::Aging,
    View::PaymentDelay,
    View::Alerts,
    View::Tax,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      View::Summary => "summary",
      View::Revenue => "revenue",
      View::Status => "status",
      View::Customers => "customers",
      View::Companies => "companies",
      View::Aging => "aging",
      View::PaymentDelay => "payment-delay",
      View::Alerts => "alerts",
      View::Tax => "tax",
    }
  }

  pub fn operation(&self) -> &'static str {
    match self {
      View::Summary => SummaryQuery::OPERATION,
      View::Revenue => RevenueQuery::OPERATION,
      View::Status => StatusQuery::OPERATION,
      View::Customers => CustomersQuery::OPERATION,
      View::Companies => CompaniesQuery::OPERATION,
      View::Aging => AgingQuery::OPERATION,
      View::PaymentDelay => PaymentDelayQuery::OPERATION,
      View::Alerts => AlertsQuery::OPERATION,
      View::Tax => TaxQuery::OPERATION,
    }
  }

  /// Mount this view's hook on `layer`.
  pub fn mount(&self, layer: &DataLayer) -> Box<dyn Panel> {
    match self {
      View::Summary => Box::new(layer.hook::<SummaryQuery>()),
      View::Revenue => Box::new(layer.hook::<RevenueQuery>()),
      View::Status => Box::new(layer.hook::<StatusQuery>()),
      View::Customers => Box::new(layer.hook::<CustomersQuery>()),
      View::Companies => Box::new(layer.hook::<CompaniesQuery>()),
      View::Aging => Box::new(layer.hook::<AgingQuery>()),
      View::PaymentDelay => Box::new(layer.hook::<PaymentDelayQuery>()),
      View::Alerts => Box::new(layer.hook::<AlertsQuery>()),
      View::Tax => Box::new(layer.hook::<TaxQuery>()),
    }
  }
}

impl fmt::Display for View {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for View {
  type Err = String;

  /// Accepts the short name or the operation name.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.to_ascii_lowercase().replace('_', "-");
    View::ALL
      .into_iter()
      .find(|v| v.name() == wanted || v.operation().eq_ignore_ascii_case(s))
      .ok_or_else(|| format!("unknown view '{}'", s))
  }
}
