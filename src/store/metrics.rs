use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Process-lifetime request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceMetrics {
  pub total_requests: u64,
  pub failed_requests: u64,
  /// Running mean over all completed requests, in milliseconds
  pub avg_response_time_ms: f64,
}

impl PerformanceMetrics {
  /// Fraction of requests that succeeded, 1.0 when nothing ran yet.
  pub fn success_rate(&self) -> f64 {
    if self.total_requests == 0 {
      return 1.0;
    }
    (self.total_requests - self.failed_requests) as f64 / self.total_requests as f64
  }
}

/// Shared, atomically updated [`PerformanceMetrics`].
#[derive(Debug, Default)]
pub struct Metrics {
  inner: Mutex<PerformanceMetrics>,
}

impl Metrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fold one completed request into the counters.
  pub fn record(&self, elapsed: Duration, success: bool) {
    let mut m = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    let sample = elapsed.as_secs_f64() * 1000.0;
    let count = m.total_requests as f64;
    m.avg_response_time_ms = (m.avg_response_time_ms * count + sample) / (count + 1.0);
    m.total_requests += 1;
    if !success {
      m.failed_requests += 1;
    }
  }

  pub fn snapshot(&self) -> PerformanceMetrics {
    *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
