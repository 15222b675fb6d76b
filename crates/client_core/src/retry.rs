use std::{future::Future, time::Duration};

use tracing::warn;

const MAX_ATTEMPTS: usize = 2;

/// Errors that can tell a caller to back off before retrying.
pub trait RateLimitSignal {
    fn retry_after(&self) -> Option<Duration>;
}

/// Runs a remote call, sleeping once through a rate-limit cooldown.
///
/// A second rate-limit failure, or any other failure, is returned unchanged.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitedCaller {
    endpoint: &'static str,
}

impl RateLimitedCaller {
    pub fn new(endpoint: &'static str) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &'static str {
        self.endpoint
    }

    pub async fn call<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(retry_after) = err.retry_after() else {
                        return Err(err);
                    };
                    if attempt >= MAX_ATTEMPTS {
                        warn!(
                            endpoint = self.endpoint,
                            attempt, "sync: rate limit persisted after retry; giving up"
                        );
                        return Err(err);
                    }
                    warn!(
                        endpoint = self.endpoint,
                        attempt,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "sync: rate limited; sleeping before retry"
                    );
                    tokio::time::sleep(retry_after).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Instant,
    };

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum FakeError {
        RateLimited(Duration),
        Fatal,
    }

    impl RateLimitSignal for FakeError {
        fn retry_after(&self) -> Option<Duration> {
            match self {
                Self::RateLimited(delay) => Some(*delay),
                Self::Fatal => None,
            }
        }
    }

    #[tokio::test]
    async fn retries_once_after_cooldown_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cooldown = Duration::from_millis(60);
        let started = Instant::now();

        let result = RateLimitedCaller::new("test.endpoint")
            .call(|| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(FakeError::RateLimited(cooldown))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= cooldown);
    }

    #[tokio::test]
    async fn gives_up_after_exactly_two_rate_limited_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), FakeError> = RateLimitedCaller::new("test.endpoint")
            .call(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FakeError::RateLimited(Duration::from_millis(5)))
                }
            })
            .await;

        assert_eq!(result, Err(FakeError::RateLimited(Duration::from_millis(5))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn returns_other_errors_without_retrying() {
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), FakeError> = RateLimitedCaller::new("test.endpoint")
            .call(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FakeError::Fatal)
                }
            })
            .await;

        assert_eq!(result, Err(FakeError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
