//! Single-flight bookkeeping: at most one outstanding fetch per cache key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use super::FetchError;
use crate::cache::{CacheKey, Payload};

pub type FlightResult = Result<Payload, FetchError>;

struct Flight {
  id: u64,
  subscribers: usize,
  result: watch::Receiver<Option<FlightResult>>,
  task: AbortHandle,
}

/// Process-wide table of in-flight fetches, keyed by [`CacheKey`].
///
/// A fetch runs as its own task so it keeps going while at least one caller
/// is interested, and is aborted as soon as the last one detaches.
#[derive(Default)]
pub struct FlightRegistry {
  flights: Mutex<HashMap<CacheKey, Flight>>,
  next_id: AtomicU64,
}

impl FlightRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Flight>> {
    self.flights.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Attach to the flight for `key`, starting `work` if there is none.
  ///
  /// `commit` runs once `work` completes, and only if the flight is still
  /// the registered one for its key; a flight that was abandoned never
  /// commits. Must be called from within a tokio runtime.
  pub fn join_or_start<W, C>(self: &Arc<Self>, key: &CacheKey, work: W, commit: C) -> FlightTicket
  where
    W: Future<Output = FlightResult> + Send + 'static,
    C: FnOnce(&FlightResult) + Send + 'static,
  {
    let mut flights = self.lock();

    if let Some(flight) = flights.get_mut(key) {
      flight.subscribers += 1;
      trace!(%key, subscribers = flight.subscribers, "joined in-flight fetch");
      return FlightTicket {
        registry: Arc::clone(self),
        key: key.clone(),
        id: flight.id,
        result: flight.result.clone(),
      };
    }

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = watch::channel(None);
    let registry = Arc::clone(self);
    let task_key = key.clone();

    let task = tokio::spawn(async move {
      let result = work.await;
      {
        let mut flights = registry.lock();
        if flights.get(&task_key).is_some_and(|f| f.id == id) {
          commit(&result);
          flights.remove(&task_key);
        }
      }
      // Receivers may all be gone
      let _ = tx.send(Some(result));
    });

    flights.insert(
      key.clone(),
      Flight {
        id,
        subscribers: 1,
        result: rx.clone(),
        task: task.abort_handle(),
      },
    );
    debug!(%key, "started fetch");

    FlightTicket {
      registry: Arc::clone(self),
      key: key.clone(),
      id,
      result: rx,
    }
  }

  /// Whether a fetch for `key` is outstanding.
  #[cfg(test)]
  pub fn is_in_flight(&self, key: &CacheKey) -> bool {
    self.lock().contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  fn release(&self, key: &CacheKey, id: u64) {
    let mut flights = self.lock();
    let Some(flight) = flights.get_mut(key) else {
      return;
    };
    if flight.id != id {
      return;
    }

    flight.subscribers -= 1;
    if flight.subscribers == 0 {
      flight.task.abort();
      flights.remove(key);
      debug!(%key, "abandoned fetch aborted");
    }
  }
}

/// A caller's interest in one flight. Dropping it detaches the caller.
pub struct FlightTicket {
  registry: Arc<FlightRegistry>,
  key: CacheKey,
  id: u64,
  result: watch::Receiver<Option<FlightResult>>,
}

impl FlightTicket {
  /// Wait for the flight's outcome. An aborted flight yields
  /// [`FetchError::Cancelled`].
  pub async fn wait(&mut self) -> FlightResult {
    match self.result.wait_for(Option::is_some).await {
      Ok(result) => result.clone().unwrap_or(Err(FetchError::Cancelled)),
      Err(_) => Err(FetchError::Cancelled),
    }
  }
}

impl Drop for FlightTicket {
  fn drop(&mut self) {
    self.registry.release(&self.key, self.id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::atomic::AtomicU32;
  use std::time::Duration;

  fn key(s: &str) -> CacheKey {
    CacheKey::derive(s, &json!({})).unwrap()
  }

  fn slow_work(calls: Arc<AtomicU32>, value: i64) -> impl Future<Output = FlightResult> {
    async move {
      calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok(Arc::new(json!(value)))
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_second_caller_joins() {
    let registry = Arc::new(FlightRegistry::new());
    let calls = Arc::new(AtomicU32::new(0));
    let commits = Arc::new(AtomicU32::new(0));

    let c1 = commits.clone();
    let mut first = registry.join_or_start(&key("a"), slow_work(calls.clone(), 1), move |_| {
      c1.fetch_add(1, Ordering::SeqCst);
    });
    let c2 = commits.clone();
    let mut second = registry.join_or_start(&key("a"), slow_work(calls.clone(), 2), move |_| {
      c2.fetch_add(1, Ordering::SeqCst);
    });

    let (a, b) = tokio::join!(first.wait(), second.wait());
    assert_eq!(a.unwrap(), Arc::new(json!(1)));
    assert_eq!(b.unwrap(), Arc::new(json!(1)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(commits.load(Ordering::SeqCst), 1);
    assert!(!registry.is_in_flight(&key("a")));
  }

  #[tokio::test(start_paused = true)]
  async fn test_last_detach_aborts_without_commit() {
    let registry = Arc::new(FlightRegistry::new());
    let calls = Arc::new(AtomicU32::new(0));
    let commits = Arc::new(AtomicU32::new(0));

    let c = commits.clone();
    let ticket = registry.join_or_start(&key("a"), slow_work(calls.clone(), 1), move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    drop(ticket);
    assert_eq!(registry.len(), 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(commits.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_flight_survives_while_someone_waits() {
    let registry = Arc::new(FlightRegistry::new());
    let calls = Arc::new(AtomicU32::new(0));

    let early = registry.join_or_start(&key("a"), slow_work(calls.clone(), 1), |_| {});
    let mut late = registry.join_or_start(&key("a"), slow_work(calls.clone(), 2), |_| {});
    drop(early);

    assert_eq!(late.wait().await.unwrap(), Arc::new(json!(1)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_distinct_keys_fly_independently() {
    let registry = Arc::new(FlightRegistry::new());
    let calls = Arc::new(AtomicU32::new(0));

    let mut a = registry.join_or_start(&key("a"), slow_work(calls.clone(), 1), |_| {});
    let mut b = registry.join_or_start(&key("b"), slow_work(calls.clone(), 2), |_| {});
    assert_eq!(registry.len(), 2);

    let (ra, rb) = tokio::join!(a.wait(), b.wait());
    assert_eq!(ra.unwrap(), Arc::new(json!(1)));
    assert_eq!(rb.unwrap(), Arc::new(json!(2)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
