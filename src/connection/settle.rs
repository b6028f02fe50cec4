use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::core::config::SettleConfig;
use crate::core::ConnectError;

/// How long to keep re-reading the client store after a mutation before
/// declaring its state stale.
#[derive(Debug, Clone)]
pub struct SettlePolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub timeout: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        SettlePolicy::from(&SettleConfig::default())
    }
}

impl From<&SettleConfig> for SettlePolicy {
    fn from(config: &SettleConfig) -> Self {
        SettlePolicy {
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            backoff_factor: config.backoff_factor,
            timeout: config.timeout(),
        }
    }
}

impl SettlePolicy {
    /// Wait exactly `delay` once, then read. Matches a plain settling delay.
    pub fn fixed(delay: Duration) -> Self {
        SettlePolicy {
            initial_delay: delay,
            max_delay: delay,
            backoff_factor: 1.0,
            timeout: delay,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64
            * self.backoff_factor.max(1.0).powi(attempt as i32))
        .min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}

/// Poll `probe` with exponential backoff until it yields a value.
///
/// Always sleeps before the first probe. Fails with `StaleState` once the
/// policy timeout has elapsed without a value.
pub async fn wait_until<T, F, Fut>(
    policy: &SettlePolicy,
    what: &'static str,
    mut probe: F,
) -> Result<T, ConnectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ConnectError>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        let remaining = policy.timeout.saturating_sub(started.elapsed());
        let delay = policy.delay_for(attempt).min(remaining);
        sleep(delay).await;

        if let Some(value) = probe().await? {
            tracing::debug!("{} settled after {} probes", what, attempt + 1);
            return Ok(value);
        }

        let waited = started.elapsed();
        if waited >= policy.timeout {
            tracing::warn!("{} still missing after {:?}", what, waited);
            return Err(ConnectError::StaleState { what, waited });
        }

        tracing::trace!("{} not visible yet (probe {})", what, attempt + 1);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_is_capped() {
        let policy = SettlePolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_factor: 2.0,
            timeout: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_probe_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = SettlePolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            timeout: Duration::from_secs(10),
        };

        let value = wait_until(&policy, "session", || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok((n >= 2).then_some(n))
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_stale_state() {
        let started = Instant::now();
        let result: Result<(), _> =
            wait_until(&SettlePolicy::fixed(Duration::from_secs(5)), "pairing", || async {
                Ok(None)
            })
            .await;

        match result {
            Err(ConnectError::StaleState { what, waited }) => {
                assert_eq!(what, "pairing");
                assert!(waited >= Duration::from_secs(5));
            }
            other => panic!("expected StaleState, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(6));
    }
}
