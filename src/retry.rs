//! Backoff retrier for flaky remote calls.
//!
//! Every wait is cancellable: a cancelled token ends the loop with
//! [`GenerationError::Cancelled`] instead of finishing the sleep.

use crate::{
    config::RetryPolicy,
    error::{GenerationError, Result},
};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs `future` unless `token` fires first. Dropping the losing future
/// aborts whatever it was doing, including an in-flight HTTP request.
pub async fn with_cancel<T, F>(token: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(GenerationError::Cancelled),
        result = future => result,
    }
}

/// Sleeps for `duration`, returning early with `Cancelled` if the token fires.
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> Result<()> {
    if duration.is_zero() {
        return if token.is_cancelled() {
            Err(GenerationError::Cancelled)
        } else {
            Ok(())
        };
    }
    with_cancel(token, async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}

/// Un-jittered delay after failed attempt `attempt` (1-based).
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let secs = policy.base_delay.as_secs_f64() * policy.backoff_factor.powi(exponent);
    let capped = secs.min(policy.max_delay.as_secs_f64());
    if capped.is_finite() && capped > 0.0 {
        Duration::from_secs_f64(capped)
    } else {
        Duration::ZERO
    }
}

/// Runs one attempt, failing with [`GenerationError::Timeout`] once `limit`
/// passes.
pub async fn with_timeout<T, F>(limit: Option<Duration>, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .unwrap_or_else(|_| Err(GenerationError::Timeout(limit))),
        None => future.await,
    }
}

/// Full wait before the next attempt, jitter and quota floor applied.
pub fn retry_delay(policy: &RetryPolicy, attempt: u32, error: &GenerationError) -> Duration {
    let base = backoff_delay(policy, attempt);
    let jitter = if policy.jitter_max > policy.jitter_min {
        rand::thread_rng().gen_range(policy.jitter_min..=policy.jitter_max)
    } else {
        policy.jitter_min
    };
    let delay = base.mul_f64(jitter.max(0.0));
    if error.is_quota() {
        delay.max(policy.quota_floor)
    } else {
        delay
    }
}

/// Calls `operation` until it succeeds, hits a non-retryable error, or uses
/// up `policy.max_attempts`. The last error is returned on failure.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if token.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        attempt += 1;

        let attempt_result = with_timeout(policy.attempt_timeout, operation());
        let error = match with_cancel(token, attempt_result).await {
            Ok(value) => {
                if attempt > 1 {
                    log::info!("{} succeeded on attempt {}/{}", label, attempt, max_attempts);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if error.is_cancelled() {
            return Err(error);
        }
        if !error.is_retryable() {
            log::debug!("{} failed with non-retryable error: {}", label, error);
            return Err(error);
        }
        if attempt >= max_attempts {
            log::warn!(
                "{} giving up after {} attempt(s): {}",
                label,
                attempt,
                error
            );
            return Err(error);
        }

        let delay = retry_delay(policy, attempt, &error);
        log::warn!(
            "{} attempt {}/{} failed ({}), retrying in {:?}",
            label,
            attempt,
            max_attempts,
            error,
            delay
        );
        sleep_or_cancel(token, delay).await?;
    }
}
