use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shared query parameters driving every analytics view.
///
/// Empty strings mean "not filtered".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSet {
  pub start_date: String,
  pub end_date: String,
  pub company_id: String,
  pub customer_id: String,
  pub status: String,
  /// Time bucketing (e.g. "daily", "weekly", "monthly")
  pub period: String,
}

/// Names a single field of [`FilterSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKey {
  StartDate,
  EndDate,
  CompanyId,
  CustomerId,
  Status,
  Period,
}

impl FilterKey {
  pub const ALL: [FilterKey; 6] = [
    FilterKey::StartDate,
    FilterKey::EndDate,
    FilterKey::CompanyId,
    FilterKey::CustomerId,
    FilterKey::Status,
    FilterKey::Period,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      FilterKey::StartDate => "startDate",
      FilterKey::EndDate => "endDate",
      FilterKey::CompanyId => "companyId",
      FilterKey::CustomerId => "customerId",
      FilterKey::Status => "status",
      FilterKey::Period => "period",
    }
  }
}

impl fmt::Display for FilterKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for FilterKey {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    FilterKey::ALL
      .into_iter()
      .find(|k| k.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| format!("unknown filter '{}'", s))
  }
}

impl FilterSet {
  pub fn get(&self, key: FilterKey) -> &str {
    match key {
      FilterKey::StartDate => &self.start_date,
      FilterKey::EndDate => &self.end_date,
      FilterKey::CompanyId => &self.company_id,
      FilterKey::CustomerId => &self.customer_id,
      FilterKey::Status => &self.status,
      FilterKey::Period => &self.period,
    }
  }

  pub fn set(&mut self, key: FilterKey, value: impl Into<String>) {
    let slot = match key {
      FilterKey::StartDate => &mut self.start_date,
      FilterKey::EndDate => &mut self.end_date,
      FilterKey::CompanyId => &mut self.company_id,
      FilterKey::CustomerId => &mut self.customer_id,
      FilterKey::Status => &mut self.status,
      FilterKey::Period => &mut self.period,
    };
    *slot = value.into();
  }

  /// Merge every field present in `patch`.
  pub fn apply(&mut self, patch: &FilterPatch) {
    for (key, value) in patch.entries() {
      self.set(key, value);
    }
  }

  /// Reset every field except the period bucketing.
  pub fn cleared(&self) -> Self {
    Self {
      period: self.period.clone(),
      ..Self::default()
    }
  }

  /// Number of non-empty fields, period excluded.
  pub fn active_count(&self) -> usize {
    FilterKey::ALL
      .into_iter()
      .filter(|k| *k != FilterKey::Period && !self.get(*k).is_empty())
      .count()
  }
}

/// Partial update for [`FilterSet`]: `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPatch {
  pub start_date: Option<String>,
  pub end_date: Option<String>,
  pub company_id: Option<String>,
  pub customer_id: Option<String>,
  pub status: Option<String>,
  pub period: Option<String>,
}

impl FilterPatch {
  pub fn with(mut self, key: FilterKey, value: impl Into<String>) -> Self {
    let slot = match key {
      FilterKey::StartDate => &mut self.start_date,
      FilterKey::EndDate => &mut self.end_date,
      FilterKey::CompanyId => &mut self.company_id,
      FilterKey::CustomerId => &mut self.customer_id,
      FilterKey::Status => &mut self.status,
      FilterKey::Period => &mut self.period,
    };
    *slot = Some(value.into());
    self
  }

  pub fn is_empty(&self) -> bool {
    self.entries().next().is_none()
  }

  fn entries(&self) -> impl Iterator<Item = (FilterKey, &str)> + '_ {
    [
      (FilterKey::StartDate, &self.start_date),
      (FilterKey::EndDate, &self.end_date),
      (FilterKey::CompanyId, &self.company_id),
      (FilterKey::CustomerId, &self.customer_id),
      (FilterKey::Status, &self.status),
      (FilterKey::Period, &self.period),
    ]
    .into_iter()
    .filter_map(|(k, v)| v.as_deref().map(|v| (k, v)))
  }
}
