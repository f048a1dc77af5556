use serde::{Deserialize, Serialize};

use super::{amount, count, ratio, AnalyticsQuery, Formatter};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryMetrics {
  pub total_invoices: Option<u64>,
  pub total_revenue: Option<f64>,
  pub paid_amount: Option<f64>,
  pub outstanding_amount: Option<f64>,
  pub overdue_amount: Option<f64>,
  pub overdue_count: Option<u64>,
  pub customer_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryView {
  pub total_invoices: u64,
  pub total_revenue: f64,
  pub collected: f64,
  pub outstanding: f64,
  pub overdue: f64,
  pub average_invoice: f64,
  /// Share of revenue already paid
  pub collection_rate: f64,
  /// Share of invoices that are overdue
  pub overdue_rate: f64,
  pub revenue_label: String,
  pub outstanding_label: String,
  pub overdue_label: String,
  pub average_label: String,
  pub collection_rate_label: String,
}

pub struct SummaryQuery;

impl AnalyticsQuery for SummaryQuery {
  const OPERATION: &'static str = "getSummaryMetrics";
  const TITLE: &'static str = "Summary";

  type Payload = SummaryMetrics;
  type Derived = SummaryView;

  fn derive(p: &SummaryMetrics, fmt: &Formatter) -> SummaryView {
    let total_invoices = count(p.total_invoices);
    let total_revenue = amount(p.total_revenue);
    let collected = amount(p.paid_amount);
    let outstanding = amount(p.outstanding_amount);
    let overdue = amount(p.overdue_amount);
    let average_invoice = ratio(total_revenue, total_invoices as f64);
    let collection_rate = ratio(collected, total_revenue);

    SummaryView {
      total_invoices,
      total_revenue,
      collected,
      outstanding,
      overdue,
      average_invoice,
      collection_rate,
      overdue_rate: ratio(count(p.overdue_count) as f64, total_invoices as f64),
      revenue_label: fmt.currency(total_revenue),
      outstanding_label: fmt.currency(outstanding),
      overdue_label: fmt.currency(overdue),
      average_label: fmt.currency(average_invoice),
      collection_rate_label: fmt.percent(collection_rate),
    }
  }

  fn headline(v: &SummaryView) -> String {
    format!(
      "{} invoices, revenue {}, collected {}, outstanding {} ({} overdue)",
      v.total_invoices, v.revenue_label, v.collection_rate_label, v.outstanding_label, v.overdue_label
    )
  }
}
