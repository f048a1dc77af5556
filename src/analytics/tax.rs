use serde::{Deserialize, Serialize};

use super::{amount, ratio, AnalyticsQuery, Formatter};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaxPeriod {
  #[serde(deserialize_with = "super::null_as_default")]
  pub period: String,
  pub taxable_amount: Option<f64>,
  pub tax_collected: Option<f64>,
  pub tax_paid: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaxPosition {
  pub taxable: f64,
  pub collected: f64,
  pub paid: f64,
  /// Collected but not yet remitted
  pub liability: f64,
  pub effective_rate: f64,
  pub liability_label: String,
  pub rate_label: String,
}

pub struct TaxQuery;

impl AnalyticsQuery for TaxQuery {
  const OPERATION: &'static str = "getTaxLiability";
  const TITLE: &'static str = "Tax liability";

  type Payload = Vec<TaxPeriod>;
  type Derived = TaxPosition;

  fn derive(periods: &Vec<TaxPeriod>, fmt: &Formatter) -> TaxPosition {
    let taxable: f64 = periods.iter().map(|p| amount(p.taxable_amount)).sum();
    let collected: f64 = periods.iter().map(|p| amount(p.tax_collected)).sum();
    let paid: f64 = periods.iter().map(|p| amount(p.tax_paid)).sum();
    let liability = collected - paid;
    let effective_rate = ratio(collected, taxable);

    TaxPosition {
      taxable,
      collected,
      paid,
      liability,
      effective_rate,
      liability_label: fmt.currency(liability),
      rate_label: fmt.percent(effective_rate),
    }
  }

  fn headline(t: &TaxPosition) -> String {
    format!("{} owed, effective rate {}", t.liability_label, t.rate_label)
  }
}
