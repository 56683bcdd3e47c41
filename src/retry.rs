//! Retry-with-backoff combinator.
//!
//! The attempt is a plain `FnMut(attempt_index) -> Future<Result<T, E>>`, the
//! delay between attempts comes from a [`Backoff`] policy, so the two can be
//! tested and swapped independently.

use std::future::Future;
use std::time::Duration;

pub trait Backoff: Send + Sync {
    /// Delay before the retry that follows the `retry`-th failure (1-based).
    fn delay(&self, retry: u32) -> Duration;
}

/// `base * 2^retry`, optionally capped.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base, max: None }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, retry: u32) -> Duration {
        let delay = self.base.saturating_mul(2u32.saturating_pow(retry));
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl<B: Backoff + ?Sized> Backoff for std::sync::Arc<B> {
    fn delay(&self, retry: u32) -> Duration {
        (**self).delay(retry)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl Backoff for FixedBackoff {
    fn delay(&self, _retry: u32) -> Duration {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy<B = ExponentialBackoff> {
    pub max_retries: u32,
    pub backoff: B,
}

impl<B: Backoff> RetryPolicy<B> {
    pub fn new(max_retries: u32, backoff: B) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }
}

/// Returned once every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Runs `attempt(0)`, `attempt(1)`, ... until one succeeds or
/// `max_retries + 1` attempts have failed. `on_retry(retry, error, delay)` is
/// called before each backoff sleep.
pub async fn retry_with_backoff<T, E, B, F, Fut, R>(
    policy: &RetryPolicy<B>,
    mut attempt: F,
    mut on_retry: R,
) -> Result<T, Exhausted<E>>
where
    B: Backoff,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, &E, Duration),
{
    let mut retries = 0u32;

    loop {
        match attempt(retries).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                retries += 1;
                if retries > policy.max_retries {
                    return Err(Exhausted {
                        attempts: retries,
                        last_error: e,
                    });
                }

                let delay = policy.backoff.delay(retries);
                on_retry(retries, &e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
