//! Readiness polling primitive
//!
//! Creation and deletion of the managed resources are asynchronous, so the
//! only way to observe progress is to re-check status on a fixed cadence.
//! Both lifecycle managers poll through the functions here.
//!
//! The check runs immediately on entry; sleeps only happen between checks.
//! A shutdown request interrupts the current sleep, so a wait never runs
//! out the remainder of its budget after cancellation.

use std::future::Future;
use std::time::Duration;

use crate::thermostream::shutdown::ShutdownToken;

/// Poll `check` every `poll_interval` until it returns `true` or the
/// `timeout` budget is spent.
///
/// Returns `true` as soon as the check passes. Returns `false` when the
/// cumulative sleep reaches the timeout, or promptly on shutdown. A check
/// that observes "not found" should simply report `false`: right after a
/// create request that is "not ready yet", not an error.
pub async fn wait_until_ready<F, Fut>(
    mut check: F,
    poll_interval: Duration,
    timeout: Duration,
    shutdown: &ShutdownToken,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut remaining = timeout;
    loop {
        if check().await {
            return true;
        }
        if remaining.is_zero() {
            return false;
        }
        let sleep_for = poll_interval.min(remaining);
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shutdown.cancelled() => return false,
        }
        remaining = remaining.saturating_sub(sleep_for);
    }
}

/// Poll `check` every `poll_interval` with no deadline.
///
/// Returns `true` once the check passes; `false` only on shutdown. Used
/// when another actor may still be mid-creation and the caller has nothing
/// better to do than wait.
pub async fn wait_until<F, Fut>(
    mut check: F,
    poll_interval: Duration,
    shutdown: &ShutdownToken,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        if check().await {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.cancelled() => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thermostream::shutdown::ShutdownController;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn test_returns_after_exactly_k_polls() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_check = Arc::clone(&calls);
        let ready = wait_until_ready(
            move || {
                let calls = Arc::clone(&calls_in_check);
                async move { calls.fetch_add(1, Ordering::SeqCst) + 1 == 3 }
            },
            Duration::from_millis(5),
            Duration::from_secs(1),
            &ShutdownToken::never(),
        )
        .await;

        assert!(ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_when_never_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_check = Arc::clone(&calls);
        let started = Instant::now();
        let ready = wait_until_ready(
            move || {
                calls_in_check.fetch_add(1, Ordering::SeqCst);
                async { false }
            },
            Duration::from_millis(10),
            Duration::from_millis(35),
            &ShutdownToken::never(),
        )
        .await;

        assert!(!ready);
        // Budget 35ms at 10ms cadence: checks at 0, 10, 20, 30 and 35ms.
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() >= Duration::from_millis(35));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_sleep() {
        let controller = ShutdownController::new();
        let token = controller.token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.shutdown();
        });

        let started = Instant::now();
        let ready = wait_until_ready(
            || async { false },
            Duration::from_secs(60),
            Duration::from_secs(300),
            &token,
        )
        .await;

        assert!(!ready);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unbounded_wait_resolves_on_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_check = Arc::clone(&calls);
        let ready = wait_until(
            move || {
                let calls = Arc::clone(&calls_in_check);
                async move { calls.fetch_add(1, Ordering::SeqCst) + 1 >= 4 }
            },
            Duration::from_millis(2),
            &ShutdownToken::never(),
        )
        .await;

        assert!(ready);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
