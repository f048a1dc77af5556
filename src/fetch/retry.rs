//! Bounded retry with linear backoff.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::FetchError;
use crate::store::FilterSet;
use crate::transport::{Operation, OperationError};

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total invocations, including the first one
  pub max_attempts: u32,
  /// Base delay; the wait after the n-th failure is `backoff * n`
  pub backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      backoff: Duration::from_millis(1000),
    }
  }
}

impl RetryPolicy {
  /// Delay before the next invocation after `failed_attempts` failures.
  pub fn delay_after(&self, failed_attempts: u32) -> Duration {
    self.backoff * failed_attempts
  }
}

/// Where a single logical fetch currently stands.
#[derive(Debug)]
enum Attempt {
  /// About to invoke the operation for the n-th time (1-based)
  Attempting(u32),
  /// The n-th invocation failed and another one is allowed
  Retrying { attempt: u32, error: String },
  Succeeded(Value),
  Failed(FetchError),
}

/// Invoke `operation` until it succeeds or the policy's attempt budget is
/// spent.
pub async fn run(
  name: &str,
  operation: &Operation,
  filters: &FilterSet,
  policy: RetryPolicy,
) -> Result<Value, FetchError> {
  let max_attempts = policy.max_attempts.max(1);
  let mut state = Attempt::Attempting(1);

  loop {
    state = match state {
      Attempt::Attempting(attempt) => match operation(filters.clone()).await {
        Ok(value) => Attempt::Succeeded(value),
        Err(OperationError(error)) if attempt < max_attempts => {
          Attempt::Retrying { attempt, error }
        }
        Err(OperationError(error)) => Attempt::Failed(FetchError::Failed {
          operation: name.to_string(),
          attempts: attempt,
          message: error,
        }),
      },
      Attempt::Retrying { attempt, error } => {
        let delay = policy.delay_after(attempt);
        warn!(operation = name, attempt, ?delay, %error, "attempt failed, retrying");
        tokio::time::sleep(delay).await;
        Attempt::Attempting(attempt + 1)
      }
      Attempt::Succeeded(value) => return Ok(value),
      Attempt::Failed(error) => {
        debug!(operation = name, %error, "giving up");
        return Err(error);
      }
    };
  }
}
