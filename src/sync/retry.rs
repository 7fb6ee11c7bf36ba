//! Bounded retry with exponential backoff, gated by error classification
//! and connectivity.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::api::{ApiError, ApiResult};

/// Retry policy for outbound calls.
///
/// Only errors classified retryable are retried; the backoff wait aborts
/// early if the process observes an offline transition, since retrying a
/// call that cannot reach the network is pointless.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(10),
    }
  }
}

impl RetryPolicy {
  /// Delay before the retry following attempt number `attempt` (0-based).
  fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }

  /// Run `op`, retrying retryable failures up to `max_attempts` times in
  /// total. `online_rx` (when given) aborts a backoff wait the moment the
  /// network monitor reports offline.
  pub async fn run<T, F, Fut>(
    &self,
    online_rx: Option<&watch::Receiver<bool>>,
    op: F,
  ) -> ApiResult<T>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
  {
    let mut attempt = 0;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(e) if !e.is_retryable() => return Err(e),
        Err(e) => {
          attempt += 1;
          if attempt >= self.max_attempts {
            return Err(e);
          }

          let delay = self.delay_for(attempt - 1);
          debug!(attempt, ?delay, error = %e, "retrying after backoff");

          match online_rx {
            Some(rx) => {
              tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = offline_observed(rx.clone()) => {
                  debug!("went offline during backoff, giving up");
                  return Err(ApiError::Offline);
                }
              }
            }
            None => tokio::time::sleep(delay).await,
          }
        }
      }
    }
  }
}

/// Resolves once the channel reports offline; pends forever while online.
async fn offline_observed(mut rx: watch::Receiver<bool>) {
  loop {
    if !*rx.borrow() {
      return;
    }
    if rx.changed().await.is_err() {
      // Monitor gone; nothing will ever flip the flag again.
      futures::future::pending::<()>().await;
    }
  }
}
