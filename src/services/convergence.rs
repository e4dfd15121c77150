//! Bounded polling of eventually consistent external state.
//!
//! The checkpoint engine writes asynchronously after git events. Tests bridge
//! that gap by polling an observation until a predicate holds or the deadline
//! passes. A predicate that already holds returns without sleeping; a value
//! that never converges and one that converges too late both fail the same way.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::errors::{HarnessError, HarnessResult};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Stand-in deadline for timeouts too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Poll `observe` every `interval` until `done` accepts the observed value.
///
/// Fails with [`HarnessError::ConvergenceTimeout`] once `timeout` has elapsed,
/// naming `target` and the last observed value. Errors from `observe` are
/// returned immediately.
pub async fn poll_until<T, F, Fut, P>(
    target: &str,
    timeout: Duration,
    interval: Duration,
    mut observe: F,
    mut done: P,
) -> HarnessResult<T>
where
    T: Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
    P: FnMut(&T) -> bool,
{
    let interval = interval.max(MIN_INTERVAL);
    let start = Instant::now();
    let deadline = start.checked_add(timeout).unwrap_or_else(|| start + FAR_FUTURE);
    let mut checks = 0_u32;

    loop {
        let value = observe().await?;
        checks += 1;
        if done(&value) {
            debug!(target, checks, "converged");
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(target, checks, ?timeout, last_observed = ?value, "convergence timed out");
            return Err(HarnessError::ConvergenceTimeout {
                target: target.to_string(),
                timeout,
                last_observed: format!("{value:?}"),
            });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Poll until the observed value differs from `baseline`, returning the new value.
pub async fn poll_until_changed<T, F, Fut>(
    target: &str,
    baseline: &T,
    timeout: Duration,
    interval: Duration,
    observe: F,
) -> HarnessResult<T>
where
    T: Debug + PartialEq,
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
{
    poll_until(target, timeout, interval, observe, |value| value != baseline).await
}
