use crate::config::CurrencyConfig;

/// Presentation formatting shared by all views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formatter {
  symbol: String,
}

impl Default for Formatter {
  fn default() -> Self {
    Self::new("USD", None)
  }
}

impl Formatter {
  pub fn new(code: &str, symbol: Option<&str>) -> Self {
    let symbol = match symbol {
      Some(s) => s.to_string(),
      None => match code.to_ascii_uppercase().as_str() {
        "USD" | "CAD" | "AUD" => "$".to_string(),
        "EUR" => "€".to_string(),
        "GBP" => "£".to_string(),
        "INR" => "₹".to_string(),
        "JPY" => "¥".to_string(),
        other => format!("{} ", other),
      },
    };
    Self { symbol }
  }

  pub fn from_config(config: &CurrencyConfig) -> Self {
    Self::new(&config.code, config.symbol.as_deref())
  }

  /// `1234.5` → `$1,234.50`
  pub fn currency(&self, amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    // Sign of the rounded value, so tiny negatives print as zero
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!(
      "{}{}{}.{:02}",
      sign,
      self.symbol,
      group_thousands(cents / 100),
      cents % 100
    )
  }

  /// `0.125` → `12.5%`
  pub fn percent(&self, ratio: f64) -> String {
    let pct = ratio * 100.0;
    if (pct - pct.round()).abs() < 0.05 {
      format!("{:.0}%", pct)
    } else {
      format!("{:.1}%", pct)
    }
  }
}

fn group_thousands(mut n: u64) -> String {
  let mut groups = Vec::new();
  loop {
    if n < 1000 {
      groups.push(n.to_string());
      break;
    }
    groups.push(format!("{:03}", n % 1000));
    n /= 1000;
  }
  groups.reverse();
  groups.join(",")
}
