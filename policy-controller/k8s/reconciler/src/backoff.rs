use tokio::time::Duration;

/// A bounded exponential backoff for store writes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: u32,
    /// The number of retries after the first attempt.
    pub limit: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            factor: 6,
            limit: 2,
        }
    }
}

impl Backoff {
    /// Returns the delay before retry number `retry` (starting at zero), or
    /// `None` if the retry budget is exhausted.
    pub fn delay(&self, retry: u32) -> Option<Duration> {
        if retry >= self.limit {
            return None;
        }
        let factor = self.factor.checked_pow(retry).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delays() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Some(Duration::from_secs(5)));
        assert_eq!(backoff.delay(1), Some(Duration::from_secs(30)));
        assert_eq!(backoff.delay(2), None);
    }

    #[test]
    fn no_retries() {
        let backoff = Backoff {
            limit: 0,
            ..Default::default()
        };
        assert_eq!(backoff.delay(0), None);
    }

    #[test]
    fn saturates() {
        let backoff = Backoff {
            base: Duration::from_secs(1),
            factor: 1000,
            limit: 10,
        };
        assert_eq!(
            backoff.delay(9),
            Some(Duration::from_secs(1).saturating_mul(u32::MAX))
        );
    }
}
