use serde::{Deserialize, Serialize};

use super::{amount, AnalyticsQuery, Formatter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
  Critical,
  Warning,
  #[default]
  Info,
  /// Anything the backend sends that we do not know
  #[serde(other)]
  Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Alert {
  pub id: Option<String>,
  #[serde(deserialize_with = "super::null_as_default")]
  pub severity: AlertLevel,
  pub title: Option<String>,
  pub message: Option<String>,
  pub invoice_id: Option<String>,
  pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertDigest {
  pub critical: usize,
  pub warning: usize,
  pub info: usize,
  /// Sum of amounts attached to alerts
  pub amount_at_risk: f64,
  /// Most severe first, in payload order within a level
  pub ordered: Vec<Alert>,
  pub at_risk_label: String,
}

pub struct AlertsQuery;

impl AnalyticsQuery for AlertsQuery {
  const OPERATION: &'static str = "getAlerts";
  const TITLE: &'static str = "Alerts";

  type Payload = Vec<Alert>;
  type Derived = AlertDigest;

  fn derive(alerts: &Vec<Alert>, fmt: &Formatter) -> AlertDigest {
    let level = |l: AlertLevel| alerts.iter().filter(|a| a.severity == l).count();
    let amount_at_risk = alerts.iter().map(|a| amount(a.amount)).sum();

    let mut ordered = alerts.clone();
    ordered.sort_by_key(|a| a.severity);

    AlertDigest {
      critical: level(AlertLevel::Critical),
      warning: level(AlertLevel::Warning),
      info: level(AlertLevel::Info),
      amount_at_risk,
      ordered,
      at_risk_label: fmt.currency(amount_at_risk),
    }
  }

  fn headline(d: &AlertDigest) -> String {
    format!(
      "{} critical, {} warning, {} info ({} at risk)",
      d.critical, d.warning, d.info, d.at_risk_label
    )
  }
}
