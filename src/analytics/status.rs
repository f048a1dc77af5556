use serde::{Deserialize, Serialize};

use super::{amount, count, ratio, AnalyticsQuery, Formatter};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusBucket {
  #[serde(deserialize_with = "super::null_as_default")]
  pub status: String,
  pub count: Option<u64>,
  pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusShare {
  pub status: String,
  pub count: u64,
  /// Share of all invoices
  pub share: f64,
  pub amount_label: String,
  pub share_label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusBreakdown {
  pub total_count: u64,
  pub total_amount: f64,
  /// Largest first
  pub shares: Vec<StatusShare>,
}

pub struct StatusQuery;

impl AnalyticsQuery for StatusQuery {
  const OPERATION: &'static str = "getStatusDistribution";
  const TITLE: &'static str = "Status distribution";

  type Payload = Vec<StatusBucket>;
  type Derived = StatusBreakdown;

  fn derive(buckets: &Vec<StatusBucket>, fmt: &Formatter) -> StatusBreakdown {
    let total_count: u64 = buckets.iter().map(|b| count(b.count)).sum();
    let total_amount = buckets.iter().map(|b| amount(b.amount)).sum();

    let mut shares: Vec<StatusShare> = buckets
      .iter()
      .map(|b| {
        let share = ratio(count(b.count) as f64, total_count as f64);
        StatusShare {
          status: b.status.clone(),
          count: count(b.count),
          share,
          amount_label: fmt.currency(amount(b.amount)),
          share_label: fmt.percent(share),
        }
      })
      .collect();
    shares.sort_by(|a, b| b.count.cmp(&a.count));

    StatusBreakdown {
      total_count,
      total_amount,
      shares,
    }
  }

  fn headline(b: &StatusBreakdown) -> String {
    let parts: Vec<String> = b
      .shares
      .iter()
      .map(|s| format!("{} {}", s.status, s.share_label))
      .collect();
    format!("{} invoices: {}", b.total_count, parts.join(", "))
  }
}
