use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ResilienceConfig;
use crate::error::{ResilienceError, Result};

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    base: f64,
    jitter_factor: f64,
}

impl BackoffPolicy {
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64, base: f64, jitter_factor: f64) -> Self {
        Self {
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            base,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(
            config.initial_delay_ms,
            config.max_delay_ms,
            config.exponential_base,
            config.jitter_factor,
        )
    }

    /// `min(initial * base^(attempt-1), max)`, zero for `attempt <= 0`
    pub fn base_delay(&self, attempt: i32) -> Duration {
        if attempt <= 0 {
            return Duration::ZERO;
        }
        let factor = self.base.powi(attempt - 1);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_secs_f64(millis.max(0.0) / 1000.0)
    }

    /// Delay perturbed by `unit * jitter_factor * delay`, `unit` in [-1, 1]
    pub fn delay_with_unit(&self, attempt: i32, unit: f64) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let jitter = base * self.jitter_factor * unit.clamp(-1.0, 1.0);
        Duration::from_secs_f64((base + jitter).max(0.0))
    }

    pub fn delay(&self, attempt: i32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with_unit(attempt, unit)
    }

    /// Sleep for the jittered delay, returning early if `cancel` fires.
    pub async fn wait(&self, attempt: i32, cancel: &CancellationToken) -> Result<Duration> {
        let delay = self.delay(attempt);
        debug!(attempt = attempt, delay_ms = delay.as_millis() as u64, "Backing off");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResilienceError::Cancelled),
            _ = sleep(delay) => Ok(delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(1000, 10_000, 2.0, 0.1)
    }

    #[test]
    fn test_base_delay_grows_then_caps() {
        let p = policy();
        assert_eq!(p.base_delay(0), Duration::ZERO);
        assert_eq!(p.base_delay(-3), Duration::ZERO);
        assert_eq!(p.base_delay(1), Duration::from_millis(1000));
        assert_eq!(p.base_delay(2), Duration::from_millis(2000));
        assert_eq!(p.base_delay(4), Duration::from_millis(8000));
        assert_eq!(p.base_delay(5), Duration::from_millis(10_000));
        assert_eq!(p.base_delay(50), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_extremes() {
        let p = policy();
        let close = |d: Duration, ms: f64| (d.as_secs_f64() * 1000.0 - ms).abs() < 1e-3;
        assert!(close(p.delay_with_unit(1, -1.0), 900.0));
        assert!(close(p.delay_with_unit(1, 1.0), 1100.0));
        assert!(close(p.delay_with_unit(3, 0.5), 4200.0));
        assert_eq!(p.delay_with_unit(0, 1.0), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps() {
        let p = BackoffPolicy::new(100, 1000, 2.0, 0.0);
        let started = tokio::time::Instant::now();
        let waited = p.wait(2, &CancellationToken::new()).await.unwrap();

        assert_eq!(waited, Duration::from_millis(200));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_cancellable() {
        let p = BackoffPolicy::new(60_000, 60_000, 2.0, 0.0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(p.wait(1, &cancel).await, Err(ResilienceError::Cancelled)));
    }

    proptest! {
        #[test]
        fn base_delay_is_monotone(attempt in 1i32..40) {
            let p = policy();
            prop_assert!(p.base_delay(attempt + 1) >= p.base_delay(attempt));
            prop_assert!(p.base_delay(attempt) <= Duration::from_millis(10_000));
        }

        #[test]
        fn jittered_delay_stays_in_band(attempt in 1i32..20) {
            let p = policy();
            let base = p.base_delay(attempt).as_secs_f64();
            let delay = p.delay(attempt).as_secs_f64();
            prop_assert!(delay >= base * 0.9 - 1e-9);
            prop_assert!(delay <= base * 1.1 + 1e-9);
        }
    }
}
