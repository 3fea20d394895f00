use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use crate::{ErrorClass, RemoteError};

const DEFAULT_MAX_TIMES: usize = 5;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;
const DEFAULT_BACKOFF_FACTOR: f32 = 1.5;

/// Wraps an idempotent remote call with bounded exponential backoff.
///
/// Only [`ErrorClass::Transient`] failures are retried; everything else
/// surfaces on the first occurrence. Non-idempotent operations must carry a
/// client-supplied idempotency key so a retry after an ambiguous failure
/// lands on the same remote resource.
pub async fn retry_remote<FutureFn, Fut, T>(
    log_str: &str,
    function: FutureFn,
) -> Result<T, RemoteError>
where
    Fut: Future<Output = Result<T, RemoteError>>,
    FutureFn: FnMut() -> Fut,
{
    retry_remote_with_params(
        log_str,
        function,
        DEFAULT_INITIAL_BACKOFF_MS,
        DEFAULT_BACKOFF_FACTOR,
        DEFAULT_MAX_TIMES,
        DEFAULT_MAX_BACKOFF_MS,
    )
    .await
}

pub async fn retry_remote_with_params<FutureFn, Fut, T>(
    log_str: &str,
    function: FutureFn,
    min_delay_ms: u64,
    factor: f32,
    max_times: usize,
    max_delay_ms: u64,
) -> Result<T, RemoteError>
where
    Fut: Future<Output = Result<T, RemoteError>>,
    FutureFn: FnMut() -> Fut,
{
    let backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(min_delay_ms))
        .with_max_times(max_times)
        .with_factor(factor)
        .with_max_delay(Duration::from_millis(max_delay_ms))
        .with_jitter();

    function
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(|e: &RemoteError| e.class() == ErrorClass::Transient)
        .notify(|err: &RemoteError, dur: Duration| {
            warn!("[RETRY] {} failed ({}), retrying after {:?}", log_str, err, dur);
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test_log::test(tokio::test)]
    async fn test_transient_failures_then_success() {
        let calls = AtomicUsize::new(0);
        let result = retry_remote_with_params(
            "flaky call",
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(RemoteError::ServiceUnavailable)
                } else {
                    Ok(n)
                }
            },
            1,
            1.5,
            5,
            10,
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        let made = calls.load(Ordering::SeqCst);
        assert_eq!(made, 4);
        assert!(made < DEFAULT_MAX_TIMES + 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_remote_with_params(
            "bad call",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::InvalidArgument("nope".into()))
            },
            1,
            1.5,
            5,
            10,
        )
        .await;
        assert_eq!(result, Err(RemoteError::InvalidArgument("nope".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_conflict_is_caller_decidable() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_remote_with_params(
            "conflicting call",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::HotloadInProgress)
            },
            1,
            1.5,
            5,
            10,
        )
        .await;
        assert_eq!(result, Err(RemoteError::HotloadInProgress));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_exhausted_retries_surface_last_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_remote_with_params(
            "dead endpoint",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Timeout)
            },
            1,
            1.5,
            3,
            10,
        )
        .await;
        assert_eq!(result, Err(RemoteError::Timeout));
        // initial attempt plus max_times retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
