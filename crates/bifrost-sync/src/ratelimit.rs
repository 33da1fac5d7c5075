use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use bifrost_types::KvStoreError;

/// Token bucket throttling flood publications: `rate_per_sec` sustained,
/// `burst` peak. Both must be positive; zero rates are a config error.
#[derive(Debug)]
pub struct TokenBucket {
    rate_per_sec: u32,
    burst: u32,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: u32, burst: u32) -> Result<Self, KvStoreError> {
        if rate_per_sec == 0 {
            return Err(KvStoreError::Config("flood msg_per_sec must be positive".into()));
        }
        if burst == 0 {
            return Err(KvStoreError::Config("flood burst_size must be positive".into()));
        }
        Ok(TokenBucket {
            rate_per_sec,
            burst,
            tokens: burst as f64,
            last_refill: Instant::now(),
        })
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec as f64).min(self.burst as f64);
        self.last_refill = now;
    }

    /// Take one token, or say how long until one is available.
    pub fn try_take(&mut self) -> Result<(), Duration> {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.rate_per_sec as f64))
        }
    }
}

/// Sleep until a token is available. The lock is held only to inspect the
/// bucket, never across the sleep.
pub async fn acquire(bucket: &Mutex<TokenBucket>) {
    loop {
        let wait = bucket.lock().await.try_take();
        match wait {
            Ok(()) => return,
            Err(delay) => tokio::time::sleep(delay).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rates_rejected() {
        assert!(matches!(TokenBucket::new(0, 10), Err(KvStoreError::Config(_))));
        assert!(matches!(TokenBucket::new(10, 0), Err(KvStoreError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_throttle() {
        let mut bucket = TokenBucket::new(10, 3).unwrap();
        for _ in 0..3 {
            assert!(bucket.try_take().is_ok());
        }
        let delay = bucket.try_take().unwrap_err();
        assert!(delay <= Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(bucket.try_take().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_caps_at_burst() {
        let mut bucket = TokenBucket::new(10, 3).unwrap();
        for _ in 0..3 {
            bucket.try_take().unwrap();
        }
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..3 {
            assert!(bucket.try_take().is_ok());
        }
        assert!(bucket.try_take().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_token() {
        let bucket = Mutex::new(TokenBucket::new(10, 1).unwrap());
        acquire(&bucket).await;
        let start = Instant::now();
        acquire(&bucket).await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
