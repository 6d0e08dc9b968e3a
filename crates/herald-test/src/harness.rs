//! Async polling helpers and test logging.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Default time to wait for asynchronous delivery.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition was met.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let poll = async {
        while !condition() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}

/// Give in-flight deliveries a moment to land.
///
/// Used before asserting that something did *not* happen.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Install a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG` and defaults to `warn`. Safe to call from every test;
/// only the first call installs anything.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_wait_until_met() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let met = wait_until(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst) >= 3
        })
        .await;
        assert!(met);
        assert!(calls.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(30), || false).await);
    }

    #[test]
    fn test_init_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
    }
}
