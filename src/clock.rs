//! Injectable clock so time-dependent components can be tested.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of the current time.
///
/// Caches and the action log take a `Clock` at construction instead of
/// calling `Utc::now()` directly, so tests can advance time explicitly.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Convenience constructor for the default shared clock.
pub fn system_clock() -> Arc<dyn Clock> {
  Arc::new(SystemClock)
}

#[cfg(test)]
pub use test_clock::ManualClock;

#[cfg(test)]
mod test_clock {
  use super::*;
  use chrono::Duration;
  use std::sync::Mutex;

  /// Test clock that only moves when told to.
  pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
  }

  impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
      Self {
        now: Mutex::new(start),
      }
    }

    pub fn advance(&self, by: Duration) {
      let mut now = self.now.lock().unwrap();
      *now += by;
    }
  }

  impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
      *self.now.lock().unwrap()
    }
  }
}
