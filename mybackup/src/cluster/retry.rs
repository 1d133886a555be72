//! Optimistic-concurrency retry.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::utils::Result;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Total attempts, the first one included
    pub steps: u32,
    pub duration: Duration,
    pub factor: f64,
}

/// Five attempts, 10ms apart.
pub const DEFAULT_RETRY: Backoff = Backoff {
    steps: 5,
    duration: Duration::from_millis(10),
    factor: 1.0,
};

/// Run `f` until it succeeds or fails with anything but `Conflict`.
/// The last conflict is returned once `backoff.steps` attempts are used up.
pub async fn retry_on_conflict<T, F, Fut>(backoff: &Backoff, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = backoff.duration;
    let mut attempt = 1;

    loop {
        match f().await {
            Err(e) if e.is_conflict() && attempt < backoff.steps => {
                debug!(attempt, error = %e, "conflict, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(backoff.factor);
                attempt += 1;
            }
            result => return result,
        }
    }
}
