//! Construction of the data layer's shared services.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::analytics::{AnalyticsQuery, Formatter, HookOptions, QueryHook};
use crate::cache::CacheService;
use crate::config::Config;
use crate::fetch::{FetchOrchestrator, FetchSettings, FlightRegistry};
use crate::notify::Notifier;
use crate::store::{CoordinationStore, Metrics, StoreSettings};
use crate::transport::Transport;

/// The cache, flight registry, metrics and coordination store one dashboard
/// session shares, plus the collaborators every hook needs.
///
/// Dropping the layer does not stop hooks that are still mounted; they keep
/// their own handles to the store and cache.
pub struct DataLayer {
  cache: CacheService,
  flights: Arc<FlightRegistry>,
  metrics: Arc<Metrics>,
  store: CoordinationStore,
  transport: Arc<dyn Transport>,
  notifier: Arc<dyn Notifier>,
  fetch: FetchSettings,
  formatter: Formatter,
  next_component: AtomicU64,
}

impl DataLayer {
  pub fn new(config: &Config, transport: Arc<dyn Transport>, notifier: Arc<dyn Notifier>) -> Self {
    Self::with_settings(
      transport,
      notifier,
      config.fetch_settings(),
      config.store_settings(),
      Formatter::from_config(&config.currency),
    )
  }

  pub fn with_settings(
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    fetch: FetchSettings,
    store: StoreSettings,
    formatter: Formatter,
  ) -> Self {
    let cache = CacheService::new();
    let metrics = Arc::new(Metrics::new());
    let store = CoordinationStore::new(cache.clone(), Arc::clone(&metrics), store);
    Self {
      cache,
      flights: Arc::new(FlightRegistry::new()),
      metrics,
      store,
      transport,
      notifier,
      fetch,
      formatter,
      next_component: AtomicU64::new(1),
    }
  }

  pub fn store(&self) -> &CoordinationStore {
    &self.store
  }

  pub fn cache(&self) -> &CacheService {
    &self.cache
  }

  pub fn flights(&self) -> &Arc<FlightRegistry> {
    &self.flights
  }

  pub fn notifier(&self) -> &Arc<dyn Notifier> {
    &self.notifier
  }

  /// A fresh orchestrator over the shared cache and flight registry.
  pub fn orchestrator(&self) -> FetchOrchestrator {
    FetchOrchestrator::new(
      Arc::clone(&self.transport),
      self.cache.clone(),
      Arc::clone(&self.flights),
      Arc::clone(&self.metrics),
      self.fetch,
    )
  }

  /// Mount a hook for `Q` with default options.
  pub fn hook<Q: AnalyticsQuery>(&self) -> QueryHook<Q> {
    self.hook_with(HookOptions::default())
  }

  pub fn hook_with<Q: AnalyticsQuery>(&self, options: HookOptions) -> QueryHook<Q> {
    let n = self.next_component.fetch_add(1, Ordering::Relaxed);
    QueryHook::new(
      format!("{}#{}", Q::OPERATION, n),
      self.store.clone(),
      Arc::new(self.orchestrator()),
      Arc::clone(&self.notifier),
      self.formatter.clone(),
      options,
    )
  }
}
