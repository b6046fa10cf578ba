use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::erp::ErpError;

/// Exponential backoff with jitter, capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Upper bound of the delay after `attempt` failures (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Delay in `[ceiling / 2, ceiling]`, never shorter than a server-supplied
    /// `Retry-After`, never longer than `cap`.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let ceiling = self.ceiling(attempt);
        let half = ceiling / 2;
        let spread = (ceiling - half).as_millis() as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        let delay = half + Duration::from_millis(jitter);
        match retry_after {
            Some(server) => delay.max(server).min(self.cap),
            None => delay,
        }
    }

    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Bound one ERP call. Running out of time counts as a transient failure.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ErpError>
where
    F: Future<Output = Result<T, ErpError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ErpError::Transient(format!(
            "erp call exceeded {}ms",
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
            max_attempts: 5,
        }
    }

    #[test]
    fn ceiling_doubles_until_cap() {
        let p = policy();
        assert_eq!(p.ceiling(1), Duration::from_secs(1));
        assert_eq!(p.ceiling(2), Duration::from_secs(2));
        assert_eq!(p.ceiling(4), Duration::from_secs(8));
        assert_eq!(p.ceiling(10), Duration::from_secs(300));
        assert_eq!(p.ceiling(64), Duration::from_secs(300));
    }

    #[test]
    fn delay_stays_within_jitter_window() {
        let p = policy();
        for _ in 0..100 {
            let d = p.delay(3, None);
            assert!(d >= Duration::from_secs(2), "got {d:?}");
            assert!(d <= Duration::from_secs(4), "got {d:?}");
        }
    }

    #[test]
    fn retry_after_raises_delay_but_not_past_cap() {
        let p = policy();
        assert!(p.delay(1, Some(Duration::from_secs(30))) >= Duration::from_secs(30));
        assert_eq!(
            p.delay(1, Some(Duration::from_secs(3600))),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn attempts_left_respects_budget() {
        let p = policy();
        assert!(p.has_attempts_left(4));
        assert!(!p.has_attempts_left(5));
    }

    #[tokio::test]
    async fn slow_call_becomes_transient() {
        let result: Result<(), ErpError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ErpError::Transient(_))));
    }
}
