//! In-memory key/value store with per-entry time-to-live.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Hit/miss counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  /// Entries removed because they expired (lazily or by their timer)
  pub evictions: u64,
}

struct Entry<V> {
  value: V,
  stored_at: Instant,
  ttl: Duration,
  generation: u64,
  eviction: Option<AbortHandle>,
}

impl<V> Entry<V> {
  fn is_expired(&self, now: Instant) -> bool {
    now.saturating_duration_since(self.stored_at) > self.ttl
  }

  fn cancel_eviction(&mut self) {
    if let Some(handle) = self.eviction.take() {
      handle.abort();
    }
  }
}

struct Inner<V> {
  entries: HashMap<String, Entry<V>>,
  next_generation: u64,
  stats: CacheStats,
}

impl<V> Drop for Inner<V> {
  fn drop(&mut self) {
    for entry in self.entries.values_mut() {
      entry.cancel_eviction();
    }
  }
}

/// Key/value cache where every entry expires `ttl` after it was stored.
///
/// Expiry is enforced twice: `get` never returns an expired entry (and drops
/// it on the way), and every `set` schedules a timer on the current tokio
/// runtime that removes the entry once its ttl has elapsed, so keys nobody
/// reads again do not pile up. Cloning yields another handle to the same
/// store.
pub struct TtlCache<V> {
  inner: Arc<Mutex<Inner<V>>>,
}

impl<V> Clone for TtlCache<V> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<V> Default for TtlCache<V>
where
  V: Clone + Send + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

fn lock<V>(inner: &Mutex<Inner<V>>) -> MutexGuard<'_, Inner<V>> {
  // Every mutation leaves the map consistent, so a poisoned lock is still usable
  inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V> TtlCache<V>
where
  V: Clone + Send + 'static,
{
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        entries: HashMap::new(),
        next_generation: 0,
        stats: CacheStats::default(),
      })),
    }
  }

  /// Store `value` under `key` for `ttl`.
  ///
  /// An existing entry is replaced and its pending eviction cancelled, so
  /// the last write wins and restarts the clock.
  pub fn set(&self, key: &str, value: V, ttl: Duration) {
    let mut inner = lock(&self.inner);
    let generation = inner.next_generation;
    inner.next_generation += 1;

    if let Some(mut previous) = inner.entries.remove(key) {
      previous.cancel_eviction();
    }

    let eviction = self.schedule_eviction(key, generation, ttl);
    inner.entries.insert(
      key.to_string(),
      Entry {
        value,
        stored_at: Instant::now(),
        ttl,
        generation,
        eviction,
      },
    );
    trace!(key, ?ttl, "cache set");
  }

  /// Value for `key` if present and not expired.
  pub fn get(&self, key: &str) -> Option<V> {
    let mut inner = lock(&self.inner);
    let now = Instant::now();

    let live = inner
      .entries
      .get(key)
      .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));

    if let Some(Some(value)) = live {
      inner.stats.hits += 1;
      return Some(value);
    }

    if live.is_some() {
      if let Some(mut stale) = inner.entries.remove(key) {
        stale.cancel_eviction();
      }
      inner.stats.evictions += 1;
      debug!(key, "dropped expired cache entry");
    }
    inner.stats.misses += 1;
    None
  }

  /// Whether a live entry exists, without touching hit/miss counters.
  #[cfg(test)]
  pub fn contains(&self, key: &str) -> bool {
    let inner = lock(&self.inner);
    let now = Instant::now();
    inner.entries.get(key).is_some_and(|e| !e.is_expired(now))
  }

  /// Remove every key containing `pattern` (ASCII case-insensitive).
  ///
  /// Returns the number of removed entries.
  pub fn invalidate(&self, pattern: &str) -> usize {
    let needle = pattern.to_ascii_lowercase();
    let mut inner = lock(&self.inner);
    let doomed: Vec<String> = inner
      .entries
      .keys()
      .filter(|k| k.to_ascii_lowercase().contains(&needle))
      .cloned()
      .collect();

    for key in &doomed {
      if let Some(mut entry) = inner.entries.remove(key) {
        entry.cancel_eviction();
      }
    }
    debug!(pattern, removed = doomed.len(), "cache invalidated");
    doomed.len()
  }

  /// Remove everything and cancel all pending evictions.
  pub fn clear(&self) {
    let mut inner = lock(&self.inner);
    for (_, mut entry) in inner.entries.drain() {
      entry.cancel_eviction();
    }
    debug!("cache cleared");
  }

  /// Number of stored entries, including expired ones not yet swept.
  pub fn len(&self) -> usize {
    lock(&self.inner).entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn stats(&self) -> CacheStats {
    lock(&self.inner).stats
  }

  fn schedule_eviction(&self, key: &str, generation: u64, ttl: Duration) -> Option<AbortHandle> {
    // Without a runtime only lazy eviction applies
    let handle = Handle::try_current().ok()?;
    let weak: Weak<Mutex<Inner<V>>> = Arc::downgrade(&self.inner);
    let key = key.to_string();

    let task = handle.spawn(async move {
      tokio::time::sleep(ttl).await;
      let Some(inner) = weak.upgrade() else {
        return;
      };
      let mut inner = lock(&inner);
      if inner
        .entries
        .get(&key)
        .is_some_and(|e| e.generation == generation)
      {
        inner.entries.remove(&key);
        inner.stats.evictions += 1;
        trace!(key, "evicted cache entry on timer");
      }
    });
    Some(task.abort_handle())
  }
}
