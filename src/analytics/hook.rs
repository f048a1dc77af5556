//! Keeps one analytics view in step with the coordination store.
//!
//! A hook is driven from the host's event loop the same way any polled
//! query is:
//!
//! ```ignore
//! let mut revenue = layer.hook::<RevenueQuery>();
//!
//! // In event loop tick
//! if revenue.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! if let Some(trend) = revenue.derived() {
//!     render_trend(&trend);
//! }
//! ```

use chrono::Utc;
use serde::Deserialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{AnalyticsQuery, Formatter};
use crate::cache::Payload;
use crate::export::{self, ExportBlob, ExportError, ExportFormat};
use crate::fetch::{FetchError, FetchMode, FetchOrchestrator};
use crate::notify::{Notification, Notifier};
use crate::store::{CoordinationStore, FilterSet, RefreshEvent, RefreshKind, Registration, Subscription};

#[derive(Debug, Clone, Copy)]
pub struct HookOptions {
  /// Periodic refreshes skip the cache instead of accepting a live entry.
  /// Forced refreshes always skip it.
  pub bypass_cache_on_refresh: bool,
}

impl Default for HookOptions {
  fn default() -> Self {
    Self {
      bypass_cache_on_refresh: true,
    }
  }
}

type FetchResult = Result<Payload, FetchError>;

/// A mounted view: its data, derived aggregates, loading flag and last
/// error.
///
/// Constructing a hook registers it with the store; dropping it
/// unregisters, unsubscribes and aborts any fetch it still owns.
pub struct QueryHook<Q: AnalyticsQuery> {
  store: CoordinationStore,
  orchestrator: Arc<FetchOrchestrator>,
  notifier: Arc<dyn Notifier>,
  formatter: Formatter,
  options: HookOptions,

  raw: Option<Payload>,
  data: Option<Arc<Q::Payload>>,
  derived: Option<Arc<Q::Derived>>,
  revision: u64,
  loading: bool,
  error: Option<String>,

  /// Filters of the most recent fetch; `None` until the first one
  filters: Option<FilterSet>,
  receiver: Option<mpsc::UnboundedReceiver<FetchResult>>,
  task: Option<JoinHandle<()>>,
  refreshes: mpsc::UnboundedReceiver<RefreshEvent>,

  _subscription: Subscription,
  registration: Registration,
  _query: PhantomData<fn() -> Q>,
}

impl<Q: AnalyticsQuery> QueryHook<Q> {
  pub fn new(
    component_id: impl Into<String>,
    store: CoordinationStore,
    orchestrator: Arc<FetchOrchestrator>,
    notifier: Arc<dyn Notifier>,
    formatter: Formatter,
    options: HookOptions,
  ) -> Self {
    let registration = store.mount(component_id);
    let (tx, refreshes) = mpsc::unbounded_channel();
    let subscription = store.subscribe(move |event| {
      // Hook may be mid-drop
      let _ = tx.send(*event);
    });

    Self {
      store,
      orchestrator,
      notifier,
      formatter,
      options,
      raw: None,
      data: None,
      derived: None,
      revision: 0,
      loading: false,
      error: None,
      filters: None,
      receiver: None,
      task: None,
      refreshes,
      _subscription: subscription,
      registration,
      _query: PhantomData,
    }
  }

  pub fn component_id(&self) -> &str {
    self.registration.component_id()
  }

  pub fn title(&self) -> &'static str {
    Q::TITLE
  }

  /// Last successfully parsed payload. Survives later failures.
  pub fn data(&self) -> Option<Arc<Q::Payload>> {
    self.data.clone()
  }

  /// Aggregates of [`data`](Self::data), recomputed only when a new
  /// payload arrives.
  pub fn derived(&self) -> Option<Arc<Q::Derived>> {
    self.derived.clone()
  }

  /// Bumped every time the derived aggregates are recomputed.
  pub fn revision(&self) -> u64 {
    self.revision
  }

  pub fn headline(&self) -> Option<String> {
    self.derived().map(|derived| Q::headline(&derived))
  }

  pub fn is_loading(&self) -> bool {
    self.loading
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  /// Load data for the store's current filters, serving a cached payload
  /// without a round trip.
  pub fn fetch(&mut self) {
    self.start(FetchMode::CacheFirst);
  }

  /// Fetch again for the current filters, skipping the cache.
  pub fn refetch(&mut self) {
    self.start(FetchMode::Revalidate);
  }

  /// Advance the hook: react to refresh broadcasts and filter changes, then
  /// collect a finished fetch.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick
  /// handler.
  pub fn poll(&mut self) -> bool {
    let mut refresh: Option<RefreshKind> = None;
    while let Ok(event) = self.refreshes.try_recv() {
      refresh = match (refresh, event.kind) {
        (Some(RefreshKind::Forced), _) => Some(RefreshKind::Forced),
        (_, kind) => Some(kind),
      };
    }

    let mut changed = false;
    if let Some(kind) = refresh {
      debug!(view = Q::OPERATION, ?kind, "refresh");
      let mode = if kind == RefreshKind::Forced || self.options.bypass_cache_on_refresh {
        FetchMode::Revalidate
      } else {
        FetchMode::CacheFirst
      };
      self.start(mode);
      changed = true;
    } else if self.filters.as_ref() != Some(&self.store.filters()) {
      self.fetch();
      changed = true;
    }

    self.collect() || changed
  }

  /// Wait for the outstanding fetch, if any, and apply its result.
  ///
  /// Returns `false` when nothing was outstanding.
  pub async fn resolve(&mut self) -> bool {
    let Some(receiver) = self.receiver.as_mut() else {
      return false;
    };
    let result = receiver.recv().await;
    self.receiver = None;
    self.task = None;
    match result {
      Some(result) => self.settle(result),
      None => self.loading = false,
    }
    true
  }

  /// Serialize the settled data for download.
  pub fn export(&self, format: ExportFormat) -> Result<ExportBlob, ExportError> {
    let data = match (self.data(), self.loading) {
      (Some(data), false) => data,
      _ => {
        return Err(ExportError::NotReady {
          view: Q::TITLE.to_string(),
        })
      }
    };

    let records = Q::records(&data);
    let bytes = export::encode(&records, format).map_err(|e| ExportError::Encode {
      view: Q::TITLE.to_string(),
      message: e.to_string(),
    })?;
    let filename = export::export_filename(Q::OPERATION, format, Utc::now());
    Ok(ExportBlob::new(filename, bytes))
  }

  fn start(&mut self, mode: FetchMode) {
    let filters = self.store.filters();
    self.error = None;
    self.filters = Some(filters.clone());

    if mode == FetchMode::CacheFirst {
      match self.orchestrator.peek(Q::OPERATION, &filters) {
        Ok(Some(payload)) => {
          self.cancel_pending();
          self.loading = false;
          self.apply(payload);
          return;
        }
        Ok(None) => {}
        Err(e) => {
          self.cancel_pending();
          self.loading = false;
          self.fail(e);
          return;
        }
      }
    }

    self.cancel_pending();
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.loading = true;

    let orchestrator = Arc::clone(&self.orchestrator);
    self.task = Some(tokio::spawn(async move {
      let result = orchestrator.fetch(Q::OPERATION, &filters, mode).await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    }));
  }

  /// Discard the outstanding request; its result can no longer land.
  fn cancel_pending(&mut self) {
    self.receiver = None;
    if let Some(task) = self.task.take() {
      self.orchestrator.cancel();
      task.abort();
    }
  }

  fn collect(&mut self) -> bool {
    let Some(receiver) = self.receiver.as_mut() else {
      return false;
    };

    match receiver.try_recv() {
      Ok(result) => {
        self.receiver = None;
        self.task = None;
        self.settle(result);
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.receiver = None;
        self.task = None;
        self.loading = false;
        true
      }
    }
  }

  fn settle(&mut self, result: FetchResult) {
    self.loading = false;
    match result {
      Ok(payload) => self.apply(payload),
      Err(FetchError::Cancelled) => debug!(view = Q::OPERATION, "fetch cancelled"),
      Err(e) => self.fail(e),
    }
  }

  fn apply(&mut self, payload: Payload) {
    if self.raw.as_ref().is_some_and(|raw| Arc::ptr_eq(raw, &payload)) {
      return;
    }

    match Q::Payload::deserialize(&*payload) {
      Ok(data) => {
        self.derived = Some(Arc::new(Q::derive(&data, &self.formatter)));
        self.data = Some(Arc::new(data));
        self.raw = Some(payload);
        self.revision += 1;
      }
      Err(e) => {
        warn!(view = Q::OPERATION, error = %e, "malformed payload");
        self.report(
          "Unexpected data".to_string(),
          format!("{} returned malformed data: {}", Q::OPERATION, e),
        );
      }
    }
  }

  fn fail(&mut self, error: FetchError) {
    self.report(format!("{}: {}", Q::TITLE, error.title()), error.to_string());
  }

  fn report(&mut self, title: String, message: String) {
    self.notifier.notify(Notification::error(title, message.clone()));
    self.error = Some(message);
  }
}

impl<Q: AnalyticsQuery> Drop for QueryHook<Q> {
  fn drop(&mut self) {
    self.cancel_pending();
  }
}

impl<Q: AnalyticsQuery> std::fmt::Debug for QueryHook<Q> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryHook")
      .field("operation", &Q::OPERATION)
      .field("component_id", &self.component_id())
      .field("loading", &self.loading)
      .field("error", &self.error)
      .field("revision", &self.revision)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analytics::revenue::RevenueQuery;
  use crate::analytics::summary::SummaryQuery;
  use crate::cache::CacheService;
  use crate::fetch::{FetchSettings, FlightRegistry, RetryPolicy};
  use crate::notify::{ChannelNotifier, Severity};
  use crate::store::{FilterKey, Metrics, StoreSettings};
  use crate::transport::{LocalTransport, OperationError};
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  struct Fixture {
    transport: Arc<LocalTransport>,
    cache: CacheService,
    flights: Arc<FlightRegistry>,
    store: CoordinationStore,
    notifier: ChannelNotifier,
    notes: mpsc::UnboundedReceiver<Notification>,
  }

  impl Fixture {
    fn new() -> Self {
      let cache = CacheService::new();
      let metrics = Arc::new(Metrics::new());
      let store = CoordinationStore::new(
        cache.clone(),
        Arc::clone(&metrics),
        StoreSettings {
          auto_refresh: false,
          ..Default::default()
        },
      );
      let (notifier, notes) = ChannelNotifier::new();
      Self {
        transport: Arc::new(LocalTransport::new()),
        cache,
        flights: Arc::new(FlightRegistry::new()),
        store,
        notifier,
        notes,
      }
    }

    fn hook<Q: AnalyticsQuery>(&self, id: &str) -> QueryHook<Q> {
      let orchestrator = FetchOrchestrator::new(
        self.transport.clone(),
        self.cache.clone(),
        Arc::clone(&self.flights),
        Arc::new(Metrics::new()),
        FetchSettings {
          ttl: Duration::from_secs(300),
          retry: RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
          },
        },
      );
      QueryHook::new(
        id,
        self.store.clone(),
        Arc::new(orchestrator),
        Arc::new(self.notifier.clone()),
        Formatter::default(),
        HookOptions::default(),
      )
    }

    /// Serve `getSummaryMetrics` with a revenue equal to the call count.
    fn counting_summary(&self) -> Arc<AtomicU32> {
      let calls = Arc::new(AtomicU32::new(0));
      let counter = calls.clone();
      self.transport.register("getSummaryMetrics", move |_filters| {
        let counter = counter.clone();
        async move {
          let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
          Ok(json!({"totalInvoices": 1, "totalRevenue": n as f64}))
        }
      });
      calls
    }
  }

  #[tokio::test]
  async fn test_first_poll_fetches_and_derives() {
    let fx = Fixture::new();
    let calls = fx.counting_summary();
    let mut hook = fx.hook::<SummaryQuery>("summary");

    assert!(hook.poll());
    assert!(hook.is_loading());
    assert!(hook.resolve().await);

    assert!(!hook.is_loading());
    assert_eq!(hook.error(), None);
    assert_eq!(hook.derived().unwrap().total_revenue, 1.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.store.registered_components(), vec!["summary"]);
  }

  #[tokio::test]
  async fn test_cache_hit_settles_in_same_call() {
    let fx = Fixture::new();
    let calls = fx.counting_summary();

    let mut first = fx.hook::<SummaryQuery>("a");
    first.fetch();
    first.resolve().await;

    let mut second = fx.hook::<SummaryQuery>("b");
    second.fetch();
    assert!(!second.is_loading());
    assert_eq!(second.derived().unwrap().total_revenue, 1.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_derived_only_recomputed_for_new_payload() {
    let fx = Fixture::new();
    fx.counting_summary();
    let mut hook = fx.hook::<SummaryQuery>("summary");

    hook.fetch();
    hook.resolve().await;
    assert_eq!(hook.revision(), 1);

    // Same cached Arc
    hook.fetch();
    assert_eq!(hook.revision(), 1);
    assert!(!hook.poll());
    assert_eq!(hook.revision(), 1);

    hook.refetch();
    hook.resolve().await;
    assert_eq!(hook.revision(), 2);
    assert_eq!(hook.derived().unwrap().total_revenue, 2.0);
  }

  #[tokio::test]
  async fn test_filter_change_triggers_fetch() {
    let fx = Fixture::new();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    fx.transport.register("getSummaryMetrics", move |filters: FilterSet| {
      sink.lock().unwrap().push(filters.company_id.clone());
      async move { Ok(json!({})) }
    });

    let mut hook = fx.hook::<SummaryQuery>("summary");
    hook.poll();
    hook.resolve().await;
    assert!(!hook.poll());

    fx.store.set_filter(FilterKey::CompanyId, "north");
    assert!(hook.poll());
    assert!(hook.is_loading());
    hook.resolve().await;

    assert_eq!(*seen.lock().unwrap(), vec!["".to_string(), "north".to_string()]);
  }

  #[tokio::test]
  async fn test_forced_refresh_refetches() {
    let fx = Fixture::new();
    let calls = fx.counting_summary();
    let mut hook = fx.hook::<SummaryQuery>("summary");
    hook.poll();
    hook.resolve().await;

    assert_eq!(fx.store.refresh_all(), 1);
    assert!(hook.poll());
    hook.resolve().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(hook.derived().unwrap().total_revenue, 2.0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_error_keeps_stale_data_and_notifies() {
    let mut fx = Fixture::new();
    let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = fail.clone();
    fx.transport.register("getRevenueOverTime", move |_filters| {
      let fail = flag.load(Ordering::SeqCst);
      async move {
        if fail {
          Err(OperationError("bridge down".into()))
        } else {
          Ok(json!([{"period": "2024-01", "revenue": 10.0}]))
        }
      }
    });

    let mut hook = fx.hook::<RevenueQuery>("revenue");
    hook.fetch();
    hook.resolve().await;
    assert_eq!(hook.derived().unwrap().total_revenue, 10.0);

    fail.store(true, Ordering::SeqCst);
    hook.refetch();
    hook.resolve().await;

    assert!(!hook.is_loading());
    assert!(hook.error().unwrap().contains("bridge down"));
    assert_eq!(hook.derived().unwrap().total_revenue, 10.0);

    let note = fx.notes.try_recv().unwrap();
    assert_eq!(note.severity, Severity::Error);
    assert_eq!(note.title, "Revenue over time: Failed to load data");

    // Cleared when the next attempt starts
    hook.refetch();
    assert_eq!(hook.error(), None);
  }

  #[tokio::test]
  async fn test_superseded_request_is_not_an_error() {
    let mut fx = Fixture::new();
    fx.transport.register("getSummaryMetrics", move |filters: FilterSet| {
      async move {
        if filters.company_id == "slow" {
          tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(json!({"totalRevenue": if filters.company_id == "slow" { 1.0 } else { 2.0 }}))
      }
    });

    let mut hook = fx.hook::<SummaryQuery>("summary");
    fx.store.set_filter(FilterKey::CompanyId, "slow");
    hook.poll();
    tokio::task::yield_now().await;

    fx.store.set_filter(FilterKey::CompanyId, "fast");
    hook.poll();
    hook.resolve().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    hook.poll();

    assert_eq!(hook.error(), None);
    assert_eq!(hook.derived().unwrap().total_revenue, 2.0);
    assert!(fx.notes.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_malformed_payload_reported() {
    let mut fx = Fixture::new();
    fx.transport.register("getRevenueOverTime", |_filters| async {
      Ok::<Value, OperationError>(json!({"not": "a list"}))
    });

    let mut hook = fx.hook::<RevenueQuery>("revenue");
    hook.fetch();
    hook.resolve().await;

    assert!(hook.data().is_none());
    assert!(hook.error().unwrap().contains("malformed"));
    assert_eq!(fx.notes.try_recv().unwrap().title, "Unexpected data");
  }

  #[tokio::test]
  async fn test_unavailable_operation() {
    let fx = Fixture::new();
    let mut hook = fx.hook::<SummaryQuery>("summary");
    hook.fetch();
    hook.resolve().await;
    assert!(hook.error().unwrap().contains("not available"));
  }

  #[tokio::test]
  async fn test_export_requires_settled_data() {
    let fx = Fixture::new();
    fx.counting_summary();
    let mut hook = fx.hook::<SummaryQuery>("summary");
    assert!(matches!(
      hook.export(ExportFormat::Json),
      Err(ExportError::NotReady { .. })
    ));

    hook.fetch();
    assert!(hook.export(ExportFormat::Csv).is_err());
    hook.resolve().await;

    let blob = hook.export(ExportFormat::Csv).unwrap();
    assert!(blob.filename.starts_with("getSummaryMetrics-"));
    assert!(blob.filename.ends_with(".csv"));
    let text = String::from_utf8(blob.bytes).unwrap();
    assert!(text.contains("totalRevenue"));
  }

  #[tokio::test]
  async fn test_drop_unregisters() {
    let fx = Fixture::new();
    let hook = fx.hook::<SummaryQuery>("summary");
    assert_eq!(fx.store.registered_components().len(), 1);
    drop(hook);
    assert!(fx.store.registered_components().is_empty());
    assert_eq!(fx.store.refresh_all(), 0);
  }
}
