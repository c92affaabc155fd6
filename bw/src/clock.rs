//! Time helpers: wall-clock timestamps and cancellable delays

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Current wall-clock time in Unix milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix milliseconds back into a UTC timestamp
///
/// Out-of-range values clamp to the Unix epoch.
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `true` if the full delay elapsed and `false` if the sleep was cut
/// short by cancellation. Cancellation is not an error here.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    debug!(delay_ms = duration.as_millis() as u64, "sleep_or_cancel: called");
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("sleep_or_cancel: cancelled");
            false
        }
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        assert!(sleep_or_cancel(Duration::from_secs(5), &cancel).await);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let start = tokio::time::Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        assert!(!sleep_or_cancel(Duration::from_secs(300), &cancel).await);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(!sleep_or_cancel(Duration::from_secs(60), &cancel).await);
        assert!(!sleep_or_cancel(Duration::ZERO, &cancel).await);
    }

    #[test]
    fn test_ms_roundtrip() {
        let ms = now_ms();
        assert_eq!(from_ms(ms).timestamp_millis(), ms);
    }
}
