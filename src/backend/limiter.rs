use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::{Instant, sleep};

use crate::error::EngineError;

/// Per-engine throttle: caps outstanding requests and spaces request
/// starts at least `min_interval` apart. Callers over the cap wait.
pub struct RateLimiter {
    permits: Semaphore,
    min_interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(max_outstanding: usize, min_interval: Duration) -> Self {
        Self {
            permits: Semaphore::new(max_outstanding.max(1)),
            min_interval,
            last_start: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, EngineError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EngineError::permanent("rate limiter closed"))?;
        if !self.min_interval.is_zero() {
            let mut last = self.last_start.lock().await;
            if let Some(previous) = *last {
                let elapsed = previous.elapsed();
                if elapsed < self.min_interval {
                    sleep(self.min_interval - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }
        Ok(permit)
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spaces_out_request_starts() {
        let limiter = RateLimiter::new(4, Duration::from_millis(30));
        let started = Instant::now();
        for _ in 0..3 {
            let _permit = limiter.acquire().await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn caps_outstanding_requests() {
        let limiter = RateLimiter::new(2, Duration::ZERO);
        let first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);
        let third = tokio::time::timeout(Duration::from_millis(20), limiter.acquire()).await;
        assert!(third.is_err());
        drop(first);
        assert!(limiter.acquire().await.is_ok());
    }
}
