use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::layer::PollingCache;
use super::traits::Cacheable;

/// Periodic revalidation of a `PollingCache`, started and stopped by the
/// consumer (e.g. on screen focus and blur).
///
/// Stopping only suppresses future ticks; a fetch already running finishes
/// and is applied.
pub struct Poller {
  interval: Duration,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      task: Mutex::new(None),
    }
  }

  fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    self.task.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn is_running(&self) -> bool {
    self.task().as_ref().is_some_and(|t| !t.is_finished())
  }

  /// Start ticking. No-op if already running.
  pub fn start<T: Cacheable>(&self, cache: PollingCache<T>) {
    let mut task = self.task();
    if task.as_ref().is_some_and(|t| !t.is_finished()) {
      return;
    }

    let period = self.interval;
    debug!(?period, "Starting poller");
    *task = Some(tokio::spawn(async move {
      // First tick after one full period; the consumer reads on mount anyway
      let mut ticks = interval_at(Instant::now() + period, period);
      ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        ticks.tick().await;
        let result = cache.revalidate().await;
        if let Some(e) = result.error {
          warn!(error = %e, "Background refresh failed");
        }
      }
    }));
  }

  /// Stop ticking. Does not cancel a fetch round already in flight.
  pub fn stop(&self) {
    if let Some(task) = self.task().take() {
      debug!("Stopping poller");
      task.abort();
    }
  }
}

impl Drop for Poller {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::NoopStorage;
  use crate::hr::types::Identity;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  impl crate::cache::Cacheable for Vec<u32> {
    fn entity_type() -> &'static str {
      "numbers"
    }
  }

  fn cache(calls: Arc<AtomicUsize>, delay_ms: u64) -> PollingCache<Vec<u32>> {
    PollingCache::new(
      Arc::new(NoopStorage),
      chrono::Duration::minutes(15),
      move |_identity| {
        let n = calls.fetch_add(1, Ordering::SeqCst) as u32;
        async move {
          tokio::time::sleep(Duration::from_millis(delay_ms)).await;
          Ok(vec![n])
        }
      },
    )
  }

  #[tokio::test]
  async fn test_ticks_revalidate_despite_fresh_entry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = cache(calls.clone(), 0);
    cache.set_identity(Some(Identity::new("A", "t"))).await;
    cache.get(false).await;

    let poller = Poller::new(Duration::from_millis(20));
    poller.start(cache.clone());
    assert!(poller.is_running());
    tokio::time::sleep(Duration::from_millis(110)).await;
    poller.stop();

    assert!(calls.load(Ordering::SeqCst) >= 3);
    assert!(!poller.is_running());
  }

  #[tokio::test]
  async fn test_stop_does_not_cancel_running_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = cache(calls.clone(), 50);
    cache.set_identity(Some(Identity::new("A", "t"))).await;

    let poller = Poller::new(Duration::from_millis(10));
    poller.start(cache.clone());
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert!(cache.is_fetching());
    poller.stop();

    let generation = cache.generation();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!cache.is_fetching());
    assert_eq!(cache.generation(), generation + 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
