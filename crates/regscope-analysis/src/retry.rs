//! Retry with exponential backoff

use crate::error::{AnalysisError, CapabilityError, Stage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Bounded retry policy for capability calls
///
/// Delays double from `base_delay_ms` up to `max_delay_ms`; `jitter` is
/// the fraction of each delay that is randomized away.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: 0.0,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    #[must_use]
    pub fn delay(&self, attempt: u32, error: &CapabilityError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let backoff = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 - rand::rng().random_range(0.0..jitter)
        } else {
            1.0
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let mut millis = (backoff as f64 * factor) as u64;
        if let CapabilityError::RateLimited {
            retry_after_ms: Some(after),
        } = error
        {
            millis = millis.max(*after);
        }
        Duration::from_millis(millis)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt
    /// budget is spent
    ///
    /// # Errors
    /// [`AnalysisError::Failed`] naming `stage`, the attempts made and the
    /// last error
    pub async fn run<T, F, Fut>(&self, stage: Stage, mut op: F) -> Result<T, AnalysisError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay(attempt, &e);
                    tracing::warn!(
                        %stage,
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "capability call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(AnalysisError::Failed {
                        stage,
                        attempts: attempt,
                        last_error: e.to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(4);
        let value = policy
            .run(Stage::Embed, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CapabilityError::Transient("503".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_stage_and_attempts() {
        let policy = RetryPolicy::immediate(4);
        let err = policy
            .run(Stage::Judge, || async {
                Err::<(), _>(CapabilityError::InvalidResponse("prose".into()))
            })
            .await
            .unwrap_err();
        match err {
            AnalysisError::Failed {
                stage, attempts, ..
            } => {
                assert_eq!(stage, Stage::Judge);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::immediate(4)
            .run(Stage::Rerank, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CapabilityError::Permanent("400".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.stage(), Some(Stage::Rerank));
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay_ms: 100,
            max_delay_ms: 350,
            jitter: 0.0,
        };
        let e = CapabilityError::Transient(String::new());
        assert_eq!(policy.delay(1, &e), Duration::from_millis(100));
        assert_eq!(policy.delay(2, &e), Duration::from_millis(200));
        assert_eq!(policy.delay(3, &e), Duration::from_millis(350));
        let throttled = CapabilityError::RateLimited {
            retry_after_ms: Some(1_000),
        };
        assert_eq!(policy.delay(1, &throttled), Duration::from_millis(1_000));
    }
}
