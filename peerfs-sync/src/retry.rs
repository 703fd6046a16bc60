//! Bounded waits and retry policies for overlay and peer round trips.
//!
//! Two independent bounds apply: `network_retries` for timed-out round
//! trips, `conflict_retries` for lost compare-and-swap writes.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, Span};

/// Exponential backoff bounded by the configured delays and `max_times`.
pub(crate) fn backoff(config: &SyncConfig, max_times: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(config.backoff_min())
        .with_max_delay(config.backoff_max())
        .with_max_times(max_times)
        .with_jitter()
}

/// Awaits `fut` for at most `limit`, mapping expiry to [`SyncError::Timeout`].
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| SyncError::Timeout)?
}

/// Runs one round trip with a bounded wait, repeating timed-out attempts
/// up to `network_retries` times.
pub(crate) async fn round_trip<T, F, Fut>(
    config: &SyncConfig,
    span: &Span,
    what: &str,
    mut call: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let limit = config.request_timeout();
    (|| bounded(limit, call()))
        .retry(backoff(config, config.network_retries))
        .sleep(tokio::time::sleep)
        .when(SyncError::is_timeout)
        .notify(|_: &SyncError, delay: Duration| {
            debug!(parent: span, "{} timed out, retrying in {:?}", what, delay);
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> SyncConfig {
        SyncConfig {
            request_timeout_ms: 20,
            network_retries: 2,
            backoff_min_ms: 1,
            backoff_max_ms: 2,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn bounded_maps_expiry_to_timeout() {
        let result: SyncResult<()> = bounded(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SyncError::Timeout)));
    }

    #[tokio::test]
    async fn round_trip_retries_timeouts_then_gives_up() {
        let attempts = AtomicUsize::new(0);
        let config = fast_config();
        let result: SyncResult<()> = round_trip(&config, &Span::none(), "lookup", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SyncError::Timeout)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn round_trip_does_not_retry_conflicts() {
        let attempts = AtomicUsize::new(0);
        let config = fast_config();
        let result: SyncResult<()> = round_trip(&config, &Span::none(), "lookup", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Conflict {
                expected: 1,
                current: 2,
            })
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
