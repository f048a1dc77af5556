//! Canonical filter state, mounted-component registry and refresh broadcasts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::filters::{FilterKey, FilterPatch, FilterSet};
use super::metrics::{Metrics, PerformanceMetrics};
use crate::cache::CacheService;

/// Why a refresh was broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
  /// Fired by the auto-refresh interval
  Periodic,
  /// Fired by an explicit "refresh everything" action
  Forced,
}

/// Signal delivered to every subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshEvent {
  pub kind: RefreshKind,
  /// Monotonic per store, starting at 1
  pub sequence: u64,
}

type Listener = Arc<dyn Fn(&RefreshEvent) + Send + Sync>;

/// Longest auto-refresh period; longer requests are clamped to it.
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Timing knobs for a [`CoordinationStore`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
  pub refresh_interval: Duration,
  pub auto_refresh: bool,
  /// How long `refresh_all` keeps the global loading flag raised
  pub settle_delay: Duration,
}

impl Default for StoreSettings {
  fn default() -> Self {
    Self {
      refresh_interval: Duration::from_secs(30),
      auto_refresh: true,
      settle_delay: Duration::from_secs(1),
    }
  }
}

struct State {
  filters: FilterSet,
  components: BTreeSet<String>,
  listeners: BTreeMap<u64, Listener>,
  next_listener: u64,
  sequence: u64,
  refresh_interval: Duration,
  ticker: Option<JoinHandle<()>>,
  settle: Option<JoinHandle<()>>,
}

struct StoreInner {
  state: Mutex<State>,
  auto_refresh: AtomicBool,
  loading: AtomicBool,
  settle_delay: Duration,
  cache: CacheService,
  metrics: Arc<Metrics>,
}

impl StoreInner {
  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Deliver `kind` to every listener in subscription order.
  ///
  /// The listener table is re-checked before each call, so a listener
  /// removed by an earlier one in the same pass is skipped.
  fn broadcast(&self, kind: RefreshKind) -> usize {
    let (ids, event) = {
      let mut state = self.lock();
      state.sequence += 1;
      let event = RefreshEvent {
        kind,
        sequence: state.sequence,
      };
      (state.listeners.keys().copied().collect::<Vec<_>>(), event)
    };

    let mut delivered = 0;
    for id in ids {
      let listener = self.lock().listeners.get(&id).cloned();
      if let Some(listener) = listener {
        listener(&event);
        delivered += 1;
      }
    }
    debug!(?kind, sequence = event.sequence, delivered, "refresh broadcast");
    delivered
  }
}

impl Drop for StoreInner {
  fn drop(&mut self) {
    let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
    for task in [state.ticker.take(), state.settle.take()].into_iter().flatten() {
      task.abort();
    }
  }
}

/// Shared dashboard state: the canonical [`FilterSet`], the set of mounted
/// components and the refresh broadcast.
///
/// While no component is registered no timer runs. The first registration
/// starts the auto-refresh interval and the last unregistration stops it.
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct CoordinationStore {
  inner: Arc<StoreInner>,
}

impl CoordinationStore {
  pub fn new(cache: CacheService, metrics: Arc<Metrics>, settings: StoreSettings) -> Self {
    Self {
      inner: Arc::new(StoreInner {
        state: Mutex::new(State {
          filters: FilterSet::default(),
          components: BTreeSet::new(),
          listeners: BTreeMap::new(),
          next_listener: 0,
          sequence: 0,
          refresh_interval: settings.refresh_interval,
          ticker: None,
          settle: None,
        }),
        auto_refresh: AtomicBool::new(settings.auto_refresh),
        loading: AtomicBool::new(false),
        settle_delay: settings.settle_delay,
        cache,
        metrics,
      }),
    }
  }

  // Filters

  /// Snapshot of the canonical filter set.
  pub fn filters(&self) -> FilterSet {
    self.inner.lock().filters.clone()
  }

  pub fn set_filter(&self, key: FilterKey, value: impl Into<String>) {
    let value = value.into();
    debug!(%key, %value, "filter set");
    self.inner.lock().filters.set(key, value);
  }

  pub fn set_filters(&self, patch: &FilterPatch) {
    if patch.is_empty() {
      return;
    }
    debug!(?patch, "filters merged");
    self.inner.lock().filters.apply(patch);
  }

  /// Reset every filter except the period and drop all cached results.
  pub fn clear_filters(&self) {
    {
      let mut state = self.inner.lock();
      state.filters = state.filters.cleared();
    }
    self.inner.cache.clear();
    info!("filters cleared");
  }

  // Component registry

  /// Add `component_id` to the registry. Returns false if it was already
  /// registered.
  pub fn register_component(&self, component_id: impl Into<String>) -> bool {
    let component_id = component_id.into();
    let mut state = self.inner.lock();
    if !state.components.insert(component_id.clone()) {
      return false;
    }
    debug!(component = %component_id, total = state.components.len(), "component registered");

    if state.components.len() == 1 {
      state.ticker = spawn_ticker(Arc::downgrade(&self.inner), state.refresh_interval);
    }
    true
  }

  /// Remove `component_id`. Returns false if it was not registered.
  pub fn unregister_component(&self, component_id: &str) -> bool {
    let mut state = self.inner.lock();
    if !state.components.remove(component_id) {
      return false;
    }
    debug!(component = %component_id, total = state.components.len(), "component unregistered");

    if state.components.is_empty() {
      if let Some(ticker) = state.ticker.take() {
        ticker.abort();
      }
    }
    true
  }

  /// Register `component_id` for as long as the returned guard lives.
  pub fn mount(&self, component_id: impl Into<String>) -> Registration {
    let component_id = component_id.into();
    let registered = self.register_component(component_id.clone());
    Registration {
      store: Arc::downgrade(&self.inner),
      component_id,
      registered,
    }
  }

  pub fn registered_components(&self) -> Vec<String> {
    self.inner.lock().components.iter().cloned().collect()
  }

  // Refresh signal

  /// Call `listener` on every refresh broadcast until the returned handle
  /// is dropped.
  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&RefreshEvent) + Send + Sync + 'static,
  {
    let mut state = self.inner.lock();
    let id = state.next_listener;
    state.next_listener += 1;
    state.listeners.insert(id, Arc::new(listener));
    Subscription {
      store: Arc::downgrade(&self.inner),
      id,
    }
  }

  /// Raise the global loading flag, drop every cached result and broadcast
  /// a forced refresh. The flag falls again after the settle delay.
  pub fn refresh_all(&self) -> usize {
    self.inner.loading.store(true, Ordering::SeqCst);
    self.inner.cache.clear();
    let delivered = self.inner.broadcast(RefreshKind::Forced);

    let settle = Handle::try_current().ok().map(|handle| {
      let weak = Arc::downgrade(&self.inner);
      let delay = self.inner.settle_delay;
      handle.spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = weak.upgrade() {
          inner.loading.store(false, Ordering::SeqCst);
        }
      })
    });
    if settle.is_none() {
      self.inner.loading.store(false, Ordering::SeqCst);
    }

    let previous = std::mem::replace(&mut self.inner.lock().settle, settle);
    if let Some(previous) = previous {
      previous.abort();
    }
    info!(delivered, "refreshing all components");
    delivered
  }

  /// Global loading flag raised by [`refresh_all`](Self::refresh_all).
  pub fn is_loading(&self) -> bool {
    self.inner.loading.load(Ordering::SeqCst)
  }

  pub fn set_auto_refresh(&self, enabled: bool) {
    self.inner.auto_refresh.store(enabled, Ordering::SeqCst);
    debug!(enabled, "auto refresh toggled");
  }

  pub fn auto_refresh(&self) -> bool {
    self.inner.auto_refresh.load(Ordering::SeqCst)
  }

  /// Change the auto-refresh period, restarting a running interval.
  pub fn set_refresh_interval(&self, interval: Duration) {
    let mut state = self.inner.lock();
    state.refresh_interval = interval;
    if let Some(ticker) = state.ticker.take() {
      ticker.abort();
      state.ticker = spawn_ticker(Arc::downgrade(&self.inner), interval);
    }
  }

  /// Whether the auto-refresh interval is currently scheduled.
  pub fn is_ticking(&self) -> bool {
    self
      .inner
      .lock()
      .ticker
      .as_ref()
      .is_some_and(|ticker| !ticker.is_finished())
  }

  // Metrics

  pub fn metrics(&self) -> PerformanceMetrics {
    self.inner.metrics.snapshot()
  }

  #[cfg(test)]
  pub fn cache(&self) -> &CacheService {
    &self.inner.cache
  }
}

fn spawn_ticker(store: Weak<StoreInner>, period: Duration) -> Option<JoinHandle<()>> {
  let Ok(handle) = Handle::try_current() else {
    warn!("no async runtime, auto refresh disabled");
    return None;
  };
  let period = period.clamp(Duration::from_millis(1), MAX_REFRESH_INTERVAL);

  Some(handle.spawn(async move {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      interval.tick().await;
      let Some(inner) = store.upgrade() else {
        break;
      };
      if inner.auto_refresh.load(Ordering::SeqCst) {
        inner.broadcast(RefreshKind::Periodic);
      }
    }
  }))
}

/// Keeps a component registered until dropped.
pub struct Registration {
  store: Weak<StoreInner>,
  component_id: String,
  registered: bool,
}

impl Registration {
  pub fn component_id(&self) -> &str {
    &self.component_id
  }
}

impl Drop for Registration {
  fn drop(&mut self) {
    if !self.registered {
      return;
    }
    if let Some(inner) = self.store.upgrade() {
      CoordinationStore { inner }.unregister_component(&self.component_id);
    }
  }
}

/// Keeps a refresh listener subscribed until dropped.
pub struct Subscription {
  store: Weak<StoreInner>,
  id: u64,
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(inner) = self.store.upgrade() {
      inner.lock().listeners.remove(&self.id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn store_with(settings: StoreSettings) -> CoordinationStore {
    CoordinationStore::new(CacheService::new(), Arc::new(Metrics::new()), settings)
  }

  fn store() -> CoordinationStore {
    store_with(StoreSettings::default())
  }

  fn recorder(store: &CoordinationStore) -> (Arc<Mutex<Vec<RefreshEvent>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = store.subscribe(move |event| sink.lock().unwrap().push(*event));
    (seen, sub)
  }

  #[tokio::test(start_paused = true)]
  async fn test_registry_lifecycle_controls_interval() {
    let store = store();
    let (seen, _sub) = recorder(&store);
    assert!(!store.is_ticking());

    store.register_component("A");
    assert!(store.is_ticking());

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(seen.lock().unwrap()[0].kind, RefreshKind::Periodic);

    store.unregister_component("A");
    assert!(!store.is_ticking());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_idle_store_never_broadcasts() {
    let store = store();
    let (seen, _sub) = recorder(&store);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(seen.lock().unwrap().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_interval_keeps_running_until_last_unregister() {
    let store = store();
    let (seen, _sub) = recorder(&store);
    store.register_component("A");
    store.register_component("B");
    assert!(!store.register_component("B"));

    store.unregister_component("A");
    assert!(store.is_ticking());
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert!(!store.unregister_component("A"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_disabled_auto_refresh_suppresses_ticks() {
    let store = store_with(StoreSettings {
      auto_refresh: false,
      ..StoreSettings::default()
    });
    let (seen, _sub) = recorder(&store);
    store.register_component("A");
    tokio::time::sleep(Duration::from_secs(95)).await;
    assert!(seen.lock().unwrap().is_empty());

    store.set_auto_refresh(true);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_set_refresh_interval_restarts_ticker() {
    let store = store();
    let (seen, _sub) = recorder(&store);
    store.register_component("A");
    store.set_refresh_interval(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(seen.lock().unwrap().len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_oversized_interval_is_clamped() {
    let store = store_with(StoreSettings {
      refresh_interval: Duration::from_secs(u64::MAX),
      ..StoreSettings::default()
    });
    let (seen, _sub) = recorder(&store);
    store.register_component("A");

    tokio::time::sleep(MAX_REFRESH_INTERVAL + Duration::from_secs(1)).await;
    assert!(store.is_ticking());
    assert_eq!(seen.lock().unwrap().len(), 1);

    store.set_refresh_interval(Duration::MAX);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(store.is_ticking());
  }

  #[tokio::test(start_paused = true)]
  async fn test_mount_guard_unregisters_on_drop() {
    let store = store();
    let guard = store.mount("revenue-chart");
    assert_eq!(store.registered_components(), vec!["revenue-chart".to_string()]);
    assert!(store.is_ticking());

    drop(guard);
    assert!(store.registered_components().is_empty());
    assert!(!store.is_ticking());
  }

  #[tokio::test]
  async fn test_broadcast_in_subscription_order() {
    let store = store();
    let order = Arc::new(Mutex::new(Vec::new()));
    let subs: Vec<_> = (0..3)
      .map(|i| {
        let order = order.clone();
        store.subscribe(move |_| order.lock().unwrap().push(i))
      })
      .collect();

    store.refresh_all();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    drop(subs);
  }

  #[tokio::test]
  async fn test_listener_removed_mid_broadcast_is_skipped() {
    let store = store();
    let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let slot = victim.clone();
    let _first = store.subscribe(move |_| {
      slot.lock().unwrap().take();
    });
    let (seen, second) = recorder(&store);
    *victim.lock().unwrap() = Some(second);

    assert_eq!(store.refresh_all(), 1);
    assert!(seen.lock().unwrap().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_refresh_all_clears_cache_and_settles() {
    let store = store();
    let (seen, _sub) = recorder(&store);
    store
      .cache()
      .set("getSummaryMetrics_{}", Arc::new(json!({})), Duration::from_secs(300));

    store.refresh_all();
    assert!(store.is_loading());
    assert!(store.cache().is_empty());
    assert_eq!(seen.lock().unwrap()[0].kind, RefreshKind::Forced);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(!store.is_loading());
  }

  #[tokio::test(start_paused = true)]
  async fn test_overlapping_refresh_restarts_settle_delay() {
    let store = store();
    store.refresh_all();
    tokio::time::sleep(Duration::from_millis(800)).await;
    store.refresh_all();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(store.is_loading());
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!store.is_loading());
  }

  #[tokio::test]
  async fn test_clear_filters_preserves_period() {
    let store = store();
    store.set_filter(FilterKey::Period, "weekly");
    store.set_filter(FilterKey::CompanyId, "acme");
    store
      .cache()
      .set("getSummaryMetrics_x", Arc::new(json!(1)), Duration::from_secs(60));

    store.clear_filters();
    let filters = store.filters();
    assert_eq!(filters.period, "weekly");
    assert_eq!(filters.company_id, "");
    assert!(store.cache().is_empty());
  }

  #[tokio::test]
  async fn test_set_filters_does_not_broadcast() {
    let store = store();
    let (seen, _sub) = recorder(&store);
    store.set_filters(&FilterPatch::default().with(FilterKey::Status, "overdue"));
    assert_eq!(store.filters().status, "overdue");
    assert!(seen.lock().unwrap().is_empty());
  }

  #[test]
  fn test_metrics_are_shared() {
    let metrics = Arc::new(Metrics::new());
    let store = CoordinationStore::new(CacheService::new(), metrics.clone(), StoreSettings::default());
    metrics.record(Duration::from_millis(40), true);
    assert_eq!(metrics.snapshot().total_requests, 1);
    assert_eq!(store.metrics().avg_response_time_ms, 40.0);
  }
}
