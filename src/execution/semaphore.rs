use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;

/// Async counting throttle over [`tokio::sync::Semaphore`] that reports how long callers waited.
///
/// Used to bound the number of files in flight during a batch run.
pub(crate) struct Throttle {
    inner: Semaphore,
}

impl Throttle {
    pub fn new(permits: usize) -> Self {
        assert!(permits > 0, "permits must be > 0");
        Self {
            inner: Semaphore::new(permits),
        }
    }

    /// Acquire one permit, waiting until one is available.
    ///
    /// Returns the permit (released on drop) and the time spent waiting, zero if a permit was
    /// free immediately. The semaphore is never closed, so the permit is only `None` if that
    /// invariant is broken; callers proceed unthrottled in that case.
    pub async fn acquire(&self) -> (Option<SemaphorePermit<'_>>, Duration) {
        if let Ok(permit) = self.inner.try_acquire() {
            return (Some(permit), Duration::ZERO);
        }
        let start = Instant::now();
        let permit = self.inner.acquire().await.ok();
        (permit, start.elapsed())
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.inner.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::Throttle;

    #[tokio::test]
    async fn free_permit_reports_no_wait() {
        let throttle = Throttle::new(2);
        let (permit, waited) = throttle.acquire().await;
        assert!(permit.is_some());
        assert_eq!(waited, Duration::ZERO);
        assert_eq!(throttle.available(), 1);
        drop(permit);
        assert_eq!(throttle.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_throttle_waits_for_release() {
        let throttle = Arc::new(Throttle::new(1));
        let (held, _) = throttle.acquire().await;

        let t = Arc::clone(&throttle);
        let waiter = tokio::spawn(async move {
            let (permit, waited) = t.acquire().await;
            assert!(permit.is_some());
            waited
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);
        let waited = waiter.await.unwrap();
        assert!(waited >= Duration::from_millis(50));
    }
}
