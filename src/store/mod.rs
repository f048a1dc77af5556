//! Dashboard-wide state shared by every mounted widget.

mod coordination;
mod filters;
mod metrics;

pub use coordination::{
  CoordinationStore, RefreshEvent, RefreshKind, Registration, StoreSettings, Subscription,
  MAX_REFRESH_INTERVAL,
};
pub use filters::{FilterKey, FilterPatch, FilterSet};
pub use metrics::Metrics;
