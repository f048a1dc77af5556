use serde::{Deserialize, Serialize};

use super::{amount, count, ratio, AnalyticsQuery, Formatter};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RevenuePoint {
  /// Bucket label, e.g. "2024-03" for monthly granularity
  #[serde(deserialize_with = "super::null_as_default")]
  pub period: String,
  pub revenue: Option<f64>,
  pub invoice_count: Option<u64>,
  pub paid_amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevenueTrend {
  pub total_revenue: f64,
  pub total_invoices: u64,
  pub average_per_period: f64,
  /// Last bucket against the one before it
  pub growth_rate: Option<f64>,
  pub peak_period: Option<String>,
  pub total_label: String,
  pub average_label: String,
}

pub struct RevenueQuery;

impl AnalyticsQuery for RevenueQuery {
  const OPERATION: &'static str = "getRevenueOverTime";
  const TITLE: &'static str = "Revenue over time";

  type Payload = Vec<RevenuePoint>;
  type Derived = RevenueTrend;

  fn derive(points: &Vec<RevenuePoint>, fmt: &Formatter) -> RevenueTrend {
    let total_revenue: f64 = points.iter().map(|p| amount(p.revenue)).sum();
    let total_invoices = points.iter().map(|p| count(p.invoice_count)).sum();
    let average_per_period = ratio(total_revenue, points.len() as f64);

    let growth_rate = match points.as_slice() {
      [.., previous, last] => {
        let previous = amount(previous.revenue);
        (previous != 0.0).then(|| (amount(last.revenue) - previous) / previous)
      }
      _ => None,
    };

    let peak_period = points
      .iter()
      .max_by(|a, b| amount(a.revenue).total_cmp(&amount(b.revenue)))
      .map(|p| p.period.clone());

    RevenueTrend {
      total_revenue,
      total_invoices,
      average_per_period,
      growth_rate,
      peak_period,
      total_label: fmt.currency(total_revenue),
      average_label: fmt.currency(average_per_period),
    }
  }

  fn headline(t: &RevenueTrend) -> String {
    let growth = t
      .growth_rate
      .map(|g| format!("{:+.1}%", g * 100.0))
      .unwrap_or_else(|| "n/a".to_string());
    format!(
      "{} total, {} per period, growth {}",
      t.total_label, t.average_label, growth
    )
  }
}
