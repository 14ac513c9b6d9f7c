use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use bifrost_common::BackoffConfig;
use bifrost_provider::BifrostError;

/// The exponential component of back-off, before jitter:
/// `base * multiplier^(attempt-1)`, capped. `attempt` is 1-based: the first
/// retry (after the initial call) is `1`.
pub fn computed_backoff(attempt: u32, cfg: &BackoffConfig) -> Duration {
    let step = attempt.saturating_sub(1);
    let factor = cfg.multiplier.powi(step as i32);
    let ms = (cfg.base.as_millis() as f64 * factor).min(cfg.max.as_millis() as f64);
    Duration::from_millis(ms.max(0.0) as u64)
}

/// Full-jitter back-off: a uniform delay in `[0, computed]`.
pub fn jittered_backoff(attempt: u32, cfg: &BackoffConfig) -> Duration {
    let computed = computed_backoff(attempt, cfg);
    let ms = (rand::random::<f64>() * computed.as_millis() as f64) as u64;
    Duration::from_millis(ms)
}

/// Drives the retry loop: at most `max_retries` additional attempts
/// after the first, retrying only on a retryable `BifrostError`, never past
/// cancellation. `attempt_fn` receives the 1-based attempt number so the
/// adapter can stamp `RequestContext::attempt_no`.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    backoff: &BackoffConfig,
    cancellation: &CancellationToken,
    mut attempt_fn: F,
) -> Result<T, BifrostError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BifrostError>>,
{
    let mut attempts_made = 0u32;
    loop {
        if cancellation.is_cancelled() {
            return Err(BifrostError::cancelled(""));
        }
        attempts_made += 1;
        match attempt_fn(attempts_made).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempts_made > max_retries {
                    return Err(err);
                }
                let delay = jittered_backoff(attempts_made, backoff);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancellation.cancelled() => return Err(BifrostError::cancelled("")),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_monotonic_up_to_cap() {
        let cfg = BackoffConfig {
            base: Duration::from_millis(200),
            multiplier: 2.0,
            max: Duration::from_secs(2),
        };
        let mut prev = Duration::ZERO;
        for attempt in 1..=10 {
            let d = computed_backoff(attempt, &cfg);
            assert!(d >= prev, "attempt {attempt}: {d:?} < {prev:?}");
            prev = d;
        }
        assert_eq!(computed_backoff(10, &cfg), cfg.max);
    }

    #[tokio::test]
    async fn retries_bounded_by_max_retries_plus_one() {
        let cfg = BackoffConfig {
            base: Duration::from_millis(1),
            multiplier: 1.0,
            max: Duration::from_millis(5),
        };
        let cancellation = CancellationToken::new();
        let mut calls = 0u32;
        let result: Result<(), BifrostError> = with_retry(2, &cfg, &cancellation, |_attempt| {
            calls += 1;
            async { Err(BifrostError::new("p", "boom").with_status(503)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn non_retryable_status_stops_immediately() {
        let cfg = BackoffConfig::default();
        let cancellation = CancellationToken::new();
        let mut calls = 0u32;
        let _: Result<(), BifrostError> = with_retry(5, &cfg, &cancellation, |_attempt| {
            calls += 1;
            async { Err(BifrostError::new("p", "bad request").with_status(400)) }
        })
        .await;
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn cancellation_before_first_call_makes_zero_invocations() {
        let cfg = BackoffConfig::default();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let mut calls = 0u32;
        let result: Result<(), BifrostError> = with_retry(5, &cfg, &cancellation, |_attempt| {
            calls += 1;
            async { Ok(()) }
        })
        .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn succeeds_after_one_retry() {
        let cfg = BackoffConfig {
            base: Duration::from_millis(1),
            ..BackoffConfig::default()
        };
        let cancellation = CancellationToken::new();
        let mut calls = 0u32;
        let result = with_retry(2, &cfg, &cancellation, |_attempt| {
            calls += 1;
            async move {
                if calls == 1 {
                    Err(BifrostError::new("p", "unavailable").with_status(503))
                } else {
                    Ok("r2")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "r2");
        assert_eq!(calls, 2);
    }
}
