use serde::{Deserialize, Serialize};

use super::{amount, ratio, AnalyticsQuery, Formatter};

/// Outstanding amounts bucketed by days past due.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceAging {
  pub current: Option<f64>,
  #[serde(rename = "days1To30")]
  pub days_1_to_30: Option<f64>,
  #[serde(rename = "days31To60")]
  pub days_31_to_60: Option<f64>,
  #[serde(rename = "days61To90")]
  pub days_61_to_90: Option<f64>,
  #[serde(rename = "over90")]
  pub over_90: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgingBucket {
  pub label: &'static str,
  pub amount: f64,
  pub share: f64,
  pub amount_label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgingProfile {
  pub total_outstanding: f64,
  /// Everything past due
  pub overdue: f64,
  pub overdue_share: f64,
  /// Share more than 60 days past due
  pub severe_share: f64,
  pub buckets: Vec<AgingBucket>,
  pub total_label: String,
  pub overdue_label: String,
}

pub struct AgingQuery;

impl AnalyticsQuery for AgingQuery {
  const OPERATION: &'static str = "getInvoiceAging";
  const TITLE: &'static str = "Invoice aging";

  type Payload = InvoiceAging;
  type Derived = AgingProfile;

  fn derive(a: &InvoiceAging, fmt: &Formatter) -> AgingProfile {
    let raw = [
      ("current", amount(a.current)),
      ("1-30 days", amount(a.days_1_to_30)),
      ("31-60 days", amount(a.days_31_to_60)),
      ("61-90 days", amount(a.days_61_to_90)),
      ("90+ days", amount(a.over_90)),
    ];
    let total_outstanding: f64 = raw.iter().map(|(_, v)| v).sum();
    let overdue = total_outstanding - amount(a.current);
    let severe = amount(a.days_61_to_90) + amount(a.over_90);

    let buckets = raw
      .iter()
      .map(|&(label, value)| AgingBucket {
        label,
        amount: value,
        share: ratio(value, total_outstanding),
        amount_label: fmt.currency(value),
      })
      .collect();

    AgingProfile {
      total_outstanding,
      overdue,
      overdue_share: ratio(overdue, total_outstanding),
      severe_share: ratio(severe, total_outstanding),
      buckets,
      total_label: fmt.currency(total_outstanding),
      overdue_label: fmt.currency(overdue),
    }
  }

  fn headline(p: &AgingProfile) -> String {
    format!(
      "{} outstanding, {} overdue ({:.0}% past due)",
      p.total_label,
      p.overdue_label,
      p.overdue_share * 100.0
    )
  }
}
