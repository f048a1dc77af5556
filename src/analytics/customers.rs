use serde::{Deserialize, Serialize};

use super::{amount, count, ratio, AnalyticsQuery, Formatter};

/// Customers counted towards revenue concentration.
const TOP_N: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomerRevenueRow {
  #[serde(deserialize_with = "super::null_as_default")]
  pub customer_id: String,
  pub customer_name: Option<String>,
  pub revenue: Option<f64>,
  pub invoice_count: Option<u64>,
  pub outstanding: Option<f64>,
}

impl CustomerRevenueRow {
  pub fn display_name(&self) -> &str {
    self.customer_name.as_deref().unwrap_or(&self.customer_id)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCustomer {
  pub name: String,
  pub revenue: f64,
  pub invoices: u64,
  pub share: f64,
  pub revenue_label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRanking {
  pub customer_count: usize,
  pub total_revenue: f64,
  pub total_outstanding: f64,
  /// Highest revenue first
  pub ranked: Vec<RankedCustomer>,
  /// Revenue share of the top customers
  pub top_concentration: f64,
  pub total_label: String,
}

pub struct CustomersQuery;

impl AnalyticsQuery for CustomersQuery {
  const OPERATION: &'static str = "getCustomerRevenue";
  const TITLE: &'static str = "Customer revenue";

  type Payload = Vec<CustomerRevenueRow>;
  type Derived = CustomerRanking;

  fn derive(rows: &Vec<CustomerRevenueRow>, fmt: &Formatter) -> CustomerRanking {
    let total_revenue: f64 = rows.iter().map(|r| amount(r.revenue)).sum();
    let total_outstanding = rows.iter().map(|r| amount(r.outstanding)).sum();

    let mut ranked: Vec<RankedCustomer> = rows
      .iter()
      .map(|r| RankedCustomer {
        name: r.display_name().to_string(),
        revenue: amount(r.revenue),
        invoices: count(r.invoice_count),
        share: ratio(amount(r.revenue), total_revenue),
        revenue_label: fmt.currency(amount(r.revenue)),
      })
      .collect();
    ranked.sort_by(|a, b| b.revenue.total_cmp(&a.revenue));

    let top: f64 = ranked.iter().take(TOP_N).map(|c| c.revenue).sum();

    CustomerRanking {
      customer_count: rows.len(),
      total_revenue,
      total_outstanding,
      ranked,
      top_concentration: ratio(top, total_revenue),
      total_label: fmt.currency(total_revenue),
    }
  }

  fn headline(r: &CustomerRanking) -> String {
    match r.ranked.first() {
      Some(top) => format!(
        "{} customers, {} total, top {} ({})",
        r.customer_count, r.total_label, top.name, top.revenue_label
      ),
      None => "no customers".to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_ranking_and_concentration() {
    let rows: Vec<CustomerRevenueRow> = serde_json::from_value(json!([
      {"customerId": "c1", "customerName": "Acme", "revenue": 100.0},
      {"customerId": "c2", "revenue": 300.0, "outstanding": 50.0},
      {"customerId": "c3", "customerName": "Initech"},
      {"customerId": "c4", "revenue": 50.0},
      {"customerId": "c5", "revenue": 25.0},
      {"customerId": "c6", "revenue": 25.0}
    ]))
    .unwrap();

    let ranking = CustomersQuery::derive(&rows, &Formatter::default());
    assert_eq!(ranking.total_revenue, 500.0);
    assert_eq!(ranking.total_outstanding, 50.0);
    assert_eq!(ranking.ranked[0].name, "c2");
    assert_eq!(ranking.ranked[0].share, 0.6);
    assert_eq!(ranking.ranked[1].name, "Acme");
    // Initech has no revenue and drops out of the top five
    assert_eq!(ranking.top_concentration, 1.0);
    assert_eq!(ranking.ranked.last().map(|c| c.name.as_str()), Some("Initech"));
  }

  #[test]
  fn test_empty_headline() {
    let ranking = CustomersQuery::derive(&Vec::new(), &Formatter::default());
    assert_eq!(CustomersQuery::headline(&ranking), "no customers");
    assert_eq!(ranking.top_concentration, 0.0);
  }
}
