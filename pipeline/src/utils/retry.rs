//! Async retry with exponential backoff
//!
//! The schedule is shared by provider calls, image downloads, and per-document
//! search-store writes: delay starts at `initial_delay` and doubles (by
//! `backoff_multiplier`) up to `max_delay`, for `max_retries` retries after
//! the first attempt.

use std::time::Duration;

use crate::core::config::RetryConfig;

/// Retry an async operation with exponential backoff.
///
/// `operation` receives the zero-based attempt index. Returns the value plus
/// the number of attempts made, or the last error plus attempts on
/// exhaustion.
pub async fn retry_with_backoff<T, E, F, Fut>(
    schedule: &RetryConfig,
    what: &str,
    operation: F,
) -> Result<(T, u32), (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(schedule, what, |_| true, operation).await
}

/// [`retry_with_backoff`] with a retryability predicate: errors the
/// predicate rejects are returned immediately without further attempts.
pub async fn retry_with_backoff_if<T, E, F, Fut>(
    schedule: &RetryConfig,
    what: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<(T, u32), (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = schedule.initial_delay;
    let attempts = schedule.max_retries + 1;

    for attempt in 0..attempts {
        match operation(attempt).await {
            Ok(value) => return Ok((value, attempt + 1)),
            Err(e) => {
                if !is_retryable(&e) {
                    tracing::error!(
                        operation = what,
                        attempt = attempt + 1,
                        error = %e,
                        "Permanent error, not retrying"
                    );
                    return Err((e, attempt + 1));
                }
                if attempt + 1 >= attempts {
                    tracing::error!(
                        operation = what,
                        attempts,
                        error = %e,
                        "All attempts failed"
                    );
                    return Err((e, attempts));
                }
                tracing::warn!(
                    operation = what,
                    attempt = attempt + 1,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, schedule);
            }
        }
    }

    unreachable!("retry loop always returns")
}

/// Advance the backoff delay, capped at the schedule maximum
pub fn next_delay(current: Duration, schedule: &RetryConfig) -> Duration {
    let scaled = current.mul_f64(schedule.backoff_multiplier);
    scaled.min(schedule.max_delay)
}

/// The full backoff schedule as a list of delays (for logging and tests)
pub fn backoff_delays(schedule: &RetryConfig) -> Vec<Duration> {
    let mut delays = Vec::with_capacity(schedule.max_retries as usize);
    let mut delay = schedule.initial_delay;
    for _ in 0..schedule.max_retries {
        delays.push(delay);
        delay = next_delay(delay, schedule);
    }
    delays
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_schedule() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_success_on_first_try() {
        let result =
            retry_with_backoff(&fast_schedule(), "op", |_| async { Ok::<_, &str>(42) }).await;
        assert_eq!(result.unwrap(), (42, 1));
    }

    #[tokio::test]
    async fn test_success_after_retries() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_schedule(), "op", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), ("done", 3));
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let result: Result<((), u32), _> =
            retry_with_backoff(&fast_schedule(), "op", |_| async { Err("persistent") }).await;
        let (error, attempts) = result.unwrap_err();
        assert_eq!(error, "persistent");
        assert_eq!(attempts, 4);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> = retry_with_backoff_if(
            &fast_schedule(),
            "op",
            |e: &&str| *e != "permanent",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
        )
        .await;
        let (error, attempts) = result.unwrap_err();
        assert_eq!(error, "permanent");
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_schedule_delays() {
        let schedule = RetryConfig::default();
        let delays = backoff_delays(&schedule);
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ]
        );
    }

    #[test]
    fn test_delay_capped_at_max() {
        let schedule = RetryConfig {
            max_retries: 10,
            initial_delay: Duration::from_secs(8),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        };
        let delays = backoff_delays(&schedule);
        assert_eq!(delays[0], Duration::from_secs(8));
        assert_eq!(delays[1], Duration::from_secs(16));
        assert_eq!(delays[2], Duration::from_secs(30));
        assert_eq!(delays[9], Duration::from_secs(30));
    }
}
