use serde::{Deserialize, Serialize};

use super::{amount, count, ratio, AnalyticsQuery, Formatter};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymentDelayRow {
  #[serde(deserialize_with = "super::null_as_default")]
  pub customer_id: String,
  pub customer_name: Option<String>,
  pub average_days_late: Option<f64>,
  pub on_time_count: Option<u64>,
  pub late_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentBehaviour {
  /// Average days late weighted by paid invoices
  pub average_days_late: f64,
  pub on_time_rate: f64,
  pub paid_invoices: u64,
  /// Customer with the highest average delay
  pub slowest_payer: Option<String>,
  pub on_time_label: String,
}

pub struct PaymentDelayQuery;

impl AnalyticsQuery for PaymentDelayQuery {
  const OPERATION: &'static str = "getPaymentDelay";
  const TITLE: &'static str = "Payment delay";

  type Payload = Vec<PaymentDelayRow>;
  type Derived = PaymentBehaviour;

  fn derive(rows: &Vec<PaymentDelayRow>, fmt: &Formatter) -> PaymentBehaviour {
    let invoices = |r: &PaymentDelayRow| count(r.on_time_count) + count(r.late_count);
    let paid_invoices: u64 = rows.iter().map(invoices).sum();
    let on_time: u64 = rows.iter().map(|r| count(r.on_time_count)).sum();
    let weighted_days: f64 = rows
      .iter()
      .map(|r| amount(r.average_days_late) * invoices(r) as f64)
      .sum();
    let on_time_rate = ratio(on_time as f64, paid_invoices as f64);

    let slowest_payer = rows
      .iter()
      .filter(|r| amount(r.average_days_late) > 0.0)
      .max_by(|a, b| amount(a.average_days_late).total_cmp(&amount(b.average_days_late)))
      .map(|r| r.customer_name.clone().unwrap_or_else(|| r.customer_id.clone()));

    PaymentBehaviour {
      average_days_late: ratio(weighted_days, paid_invoices as f64),
      on_time_rate,
      paid_invoices,
      slowest_payer,
      on_time_label: fmt.percent(on_time_rate),
    }
  }

  fn headline(b: &PaymentBehaviour) -> String {
    let mut line = format!(
      "{:.1} days late on average, {} paid on time",
      b.average_days_late, b.on_time_label
    );
    if let Some(slowest) = &b.slowest_payer {
      line.push_str(&format!(", slowest {}", slowest));
    }
    line
  }
}
