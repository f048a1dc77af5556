use serde::{Deserialize, Serialize};

use super::{amount, count, ratio, AnalyticsQuery, Formatter};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyRevenue {
  #[serde(deserialize_with = "super::null_as_default")]
  pub company_id: String,
  pub company_name: Option<String>,
  pub revenue: Option<f64>,
  pub invoice_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompanyShare {
  pub name: String,
  pub revenue: f64,
  pub invoices: u64,
  pub share: f64,
  pub share_label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompanySplit {
  pub total_revenue: f64,
  pub companies: Vec<CompanyShare>,
  pub total_label: String,
}

pub struct CompaniesQuery;

impl AnalyticsQuery for CompaniesQuery {
  const OPERATION: &'static str = "getCompanySplit";
  const TITLE: &'static str = "Company split";

  type Payload = Vec<CompanyRevenue>;
  type Derived = CompanySplit;

  fn derive(rows: &Vec<CompanyRevenue>, fmt: &Formatter) -> CompanySplit {
    let total_revenue: f64 = rows.iter().map(|r| amount(r.revenue)).sum();
    let mut companies: Vec<CompanyShare> = rows
      .iter()
      .map(|r| {
        let share = ratio(amount(r.revenue), total_revenue);
        CompanyShare {
          name: r.company_name.clone().unwrap_or_else(|| r.company_id.clone()),
          revenue: amount(r.revenue),
          invoices: count(r.invoice_count),
          share,
          share_label: fmt.percent(share),
        }
      })
      .collect();
    companies.sort_by(|a, b| b.revenue.total_cmp(&a.revenue));

    CompanySplit {
      total_revenue,
      companies,
      total_label: fmt.currency(total_revenue),
    }
  }

  fn headline(s: &CompanySplit) -> String {
    let parts: Vec<String> = s
      .companies
      .iter()
      .map(|c| format!("{} {}", c.name, c.share_label))
      .collect();
    format!("{} across {}", s.total_label, parts.join(", "))
  }
}
