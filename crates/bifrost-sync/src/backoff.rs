use std::time::Duration;

/// Retry delay that doubles per attempt up to a ceiling.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        ExponentialBackoff { initial, max, next: initial }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    /// Call after a successful attempt.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(64), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(64));
        assert_eq!(backoff.next_delay(), Duration::from_millis(128));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(64), Duration::from_millis(8_192));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(64));
    }
}
