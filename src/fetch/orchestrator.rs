use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, warn, Instrument};

use super::flight::FlightRegistry;
use super::retry::{self, RetryPolicy};
use super::FetchError;
use crate::cache::{CacheKey, CacheService, Payload};
use crate::store::{FilterSet, Metrics};
use crate::transport::Transport;

/// Whether a fetch may be answered from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
  /// Serve a live cache entry if there is one
  #[default]
  CacheFirst,
  /// Skip the cache lookup; an in-flight fetch for the same key is still
  /// joined since it started after anything cached
  Revalidate,
}

/// Tunables shared by every orchestrator of a data layer.
#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
  pub ttl: Duration,
  pub retry: RetryPolicy,
}

impl Default for FetchSettings {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(5 * 60),
      retry: RetryPolicy::default(),
    }
  }
}

/// Runs named operations through the cache, the single-flight registry and
/// the retry policy.
///
/// Each consumer owns one orchestrator. A consumer has at most one
/// outstanding request: starting a new one cancels the previous caller,
/// whose future resolves to [`FetchError::Cancelled`].
pub struct FetchOrchestrator {
  transport: Arc<dyn Transport>,
  cache: CacheService,
  flights: Arc<FlightRegistry>,
  metrics: Arc<Metrics>,
  settings: FetchSettings,
  current: Mutex<Option<Arc<Notify>>>,
}

impl FetchOrchestrator {
  pub fn new(
    transport: Arc<dyn Transport>,
    cache: CacheService,
    flights: Arc<FlightRegistry>,
    metrics: Arc<Metrics>,
    settings: FetchSettings,
  ) -> Self {
    Self {
      transport,
      cache,
      flights,
      metrics,
      settings,
      current: Mutex::new(None),
    }
  }

  /// Cached payload for `operation` under `filters`, without fetching.
  pub fn peek(&self, operation: &str, filters: &FilterSet) -> Result<Option<Payload>, FetchError> {
    let key = derive_key(operation, filters)?;
    Ok(self.cache.get(key.as_str()))
  }

  /// Produce the payload of `operation` for `filters`.
  pub async fn fetch(
    &self,
    operation: &str,
    filters: &FilterSet,
    mode: FetchMode,
  ) -> Result<Payload, FetchError> {
    let key = derive_key(operation, filters)?;

    if mode == FetchMode::CacheFirst {
      if let Some(payload) = self.cache.get(key.as_str()) {
        debug!(%key, "cache hit");
        return Ok(payload);
      }
    }

    let Some(op) = self.transport.resolve(operation) else {
      warn!(operation, "operation unavailable");
      return Err(FetchError::Unavailable {
        operation: operation.to_string(),
      });
    };

    let work = {
      let name = operation.to_string();
      let filters = filters.clone();
      let policy = self.settings.retry;
      let metrics = Arc::clone(&self.metrics);
      let span = tracing::debug_span!("fetch", operation = %name);
      async move {
        let started = Instant::now();
        let result = retry::run(&name, &op, &filters, policy).await;
        match &result {
          Err(FetchError::Cancelled) => {}
          Err(e) => {
            error!(error = %e, "fetch failed");
            metrics.record(started.elapsed(), false);
          }
          Ok(_) => metrics.record(started.elapsed(), true),
        }
        result.map(Arc::new)
      }
      .instrument(span)
    };

    let commit = {
      let cache = self.cache.clone();
      let key = key.clone();
      let ttl = self.settings.ttl;
      move |result: &Result<Payload, FetchError>| {
        if let Ok(payload) = result {
          cache.set(key.as_str(), Arc::clone(payload), ttl);
        }
      }
    };

    // Join before superseding, so a same-key predecessor cannot abandon
    // the flight in between
    let mut ticket = self.flights.join_or_start(&key, work, commit);
    let cancel = Arc::new(Notify::new());
    if let Some(previous) = self.lock_current().replace(Arc::clone(&cancel)) {
      previous.notify_one();
    }

    let result = tokio::select! {
      biased;
      _ = cancel.notified() => Err(FetchError::Cancelled),
      result = ticket.wait() => result,
    };

    {
      let mut current = self.lock_current();
      if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &cancel)) {
        *current = None;
      }
    }
    if result.as_ref().is_err_and(FetchError::is_cancelled) {
      debug!(%key, "fetch cancelled");
    }
    result
  }

  /// Cancel this orchestrator's outstanding request, if any.
  pub fn cancel(&self) {
    if let Some(current) = self.lock_current().take() {
      current.notify_one();
    }
  }

  fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Arc<Notify>>> {
    self.current.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

fn derive_key(operation: &str, filters: &FilterSet) -> Result<CacheKey, FetchError> {
  CacheKey::derive(operation, filters).map_err(|e| {
    error!(error = %e, "cache key derivation failed");
    FetchError::from(e)
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::FilterKey;
  use crate::transport::{LocalTransport, OperationError};
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};

  struct Fixture {
    transport: Arc<LocalTransport>,
    cache: CacheService,
    flights: Arc<FlightRegistry>,
    metrics: Arc<Metrics>,
  }

  impl Fixture {
    fn new() -> Self {
      Self {
        transport: Arc::new(LocalTransport::new()),
        cache: CacheService::new(),
        flights: Arc::new(FlightRegistry::new()),
        metrics: Arc::new(Metrics::new()),
      }
    }

    fn orchestrator(&self) -> FetchOrchestrator {
      FetchOrchestrator::new(
        self.transport.clone(),
        self.cache.clone(),
        self.flights.clone(),
        self.metrics.clone(),
        FetchSettings::default(),
      )
    }

    /// Registers `name` answering `{ "call": n, "company": ... }` after `delay`.
    fn slow(&self, name: &str, delay: Duration) -> Arc<AtomicU32> {
      let calls = Arc::new(AtomicU32::new(0));
      let counter = calls.clone();
      self.transport.register(name, move |filters: FilterSet| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
          tokio::time::sleep(delay).await;
          Ok(json!({ "call": n, "company": filters.company_id }))
        }
      });
      calls
    }
  }

  fn company(id: &str) -> FilterSet {
    let mut filters = FilterSet::default();
    filters.set(FilterKey::CompanyId, id);
    filters
  }

  #[tokio::test(start_paused = true)]
  async fn test_miss_then_hit() {
    let fx = Fixture::new();
    let calls = fx.slow("getSummaryMetrics", Duration::from_millis(50));
    let orch = fx.orchestrator();

    let first = orch
      .fetch("getSummaryMetrics", &company("1"), FetchMode::CacheFirst)
      .await
      .unwrap();
    let second = orch
      .fetch("getSummaryMetrics", &company("1"), FetchMode::CacheFirst)
      .await
      .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(orch.peek("getSummaryMetrics", &company("1")).unwrap().is_some());
    assert_eq!(fx.metrics.snapshot().total_requests, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_revalidate_bypasses_cache() {
    let fx = Fixture::new();
    let calls = fx.slow("getAlerts", Duration::from_millis(10));
    let orch = fx.orchestrator();

    orch.fetch("getAlerts", &company("1"), FetchMode::CacheFirst).await.unwrap();
    let fresh = orch
      .fetch("getAlerts", &company("1"), FetchMode::Revalidate)
      .await
      .unwrap();
    assert_eq!(fresh["call"], 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_consumers_share_one_invocation() {
    let fx = Fixture::new();
    let calls = fx.slow("getCustomerRevenue", Duration::from_millis(100));
    let a = fx.orchestrator();
    let b = fx.orchestrator();

    let filters = company("1");
    let (ra, rb) = tokio::join!(
      a.fetch("getCustomerRevenue", &filters, FetchMode::CacheFirst),
      b.fetch("getCustomerRevenue", &filters, FetchMode::CacheFirst),
    );
    assert_eq!(ra.unwrap(), rb.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_same_consumer_same_key_supersedes_without_duplicate_call() {
    let fx = Fixture::new();
    let calls = fx.slow("getAlerts", Duration::from_millis(100));
    let orch = fx.orchestrator();

    let filters = company("1");
    let (old, new) = tokio::join!(
      orch.fetch("getAlerts", &filters, FetchMode::CacheFirst),
      orch.fetch("getAlerts", &filters, FetchMode::CacheFirst),
    );
    assert_eq!(old.unwrap_err(), FetchError::Cancelled);
    assert_eq!(new.unwrap()["call"], 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_superseded_request_never_reaches_cache() {
    let fx = Fixture::new();
    fx.slow("getInvoiceAging", Duration::from_millis(500));
    let orch = fx.orchestrator();

    let (old_filters, new_filters) = (company("old"), company("new"));
    let (old, new) = tokio::join!(
      orch.fetch("getInvoiceAging", &old_filters, FetchMode::CacheFirst),
      async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        orch
          .fetch("getInvoiceAging", &new_filters, FetchMode::CacheFirst)
          .await
      },
    );
    assert!(old.unwrap_err().is_cancelled());
    assert_eq!(new.unwrap()["company"], "new");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(orch.peek("getInvoiceAging", &company("old")).unwrap().is_none());
    assert!(orch.peek("getInvoiceAging", &company("new")).unwrap().is_some());
    assert_eq!(fx.flights.len(), 0);
    // The abandoned flight is not counted
    assert_eq!(fx.metrics.snapshot().total_requests, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_explicit_cancel() {
    let fx = Fixture::new();
    fx.slow("getTaxLiability", Duration::from_millis(500));
    let orch = fx.orchestrator();

    let filters = company("1");
    let (result, _) = tokio::join!(
      orch.fetch("getTaxLiability", &filters, FetchMode::CacheFirst),
      async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        orch.cancel();
      },
    );
    assert!(result.unwrap_err().is_cancelled());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(fx.cache.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_unavailable_fails_fast() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    let started = Instant::now();

    let err = orch
      .fetch("getPaymentDelay", &FilterSet::default(), FetchMode::CacheFirst)
      .await
      .unwrap_err();
    assert_eq!(
      err,
      FetchError::Unavailable {
        operation: "getPaymentDelay".into()
      }
    );
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(fx.metrics.snapshot().total_requests, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retries_then_surfaces_error() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    fx.transport.register("getCompanySplit", move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      async { Err::<serde_json::Value, _>(OperationError("connection reset".into())) }
    });
    let orch = fx.orchestrator();

    let err = orch
      .fetch("getCompanySplit", &FilterSet::default(), FetchMode::CacheFirst)
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Failed { attempts: 3, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(fx.cache.is_empty());

    let metrics = fx.metrics.snapshot();
    assert_eq!((metrics.total_requests, metrics.failed_requests), (1, 1));
  }

  #[tokio::test(start_paused = true)]
  async fn test_success_after_transient_failure() {
    let fx = Fixture::new();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    fx.transport.register("getStatusDistribution", move |_| {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          Err(OperationError("timeout".into()))
        } else {
          Ok(json!([{ "status": "paid", "count": 3 }]))
        }
      }
    });
    let orch = fx.orchestrator();

    let payload = orch
      .fetch("getStatusDistribution", &FilterSet::default(), FetchMode::CacheFirst)
      .await
      .unwrap();
    assert_eq!(payload[0]["count"], 3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(fx.metrics.snapshot().failed_requests, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cached_result_expires_after_ttl() {
    let fx = Fixture::new();
    let calls = fx.slow("getRevenueOverTime", Duration::ZERO);
    let orch = fx.orchestrator();

    orch
      .fetch("getRevenueOverTime", &company("1"), FetchMode::CacheFirst)
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    orch
      .fetch("getRevenueOverTime", &company("1"), FetchMode::CacheFirst)
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
