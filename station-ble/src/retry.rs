//! Two-bucket retry for transport operations

use std::future::Future;

use tracing::warn;

use crate::link::LinkError;

/// Total attempts for fast failures; slow failures get exactly one
pub const DEFAULT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_ATTEMPTS }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1) }
    }

    /// Runs `op` until it succeeds, fails slow, or runs out of attempts
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, LinkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LinkError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_fast() && attempt < max_attempts => {
                    warn!(attempt, max_attempts, error = %e, "{what} failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn scripted(policy: RetryPolicy, failures: &[LinkError]) -> (Result<u8, LinkError>, u32) {
        let calls = AtomicU32::new(0);
        let result = policy
            .run("test op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) as usize;
                let outcome = match failures.get(n) {
                    Some(e) => Err(e.clone()),
                    None => Ok(42),
                };
                async move { outcome }
            })
            .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn fast_failures_then_success() {
        let failures = [LinkError::fast("busy"), LinkError::fast("busy")];
        let (result, calls) = scripted(RetryPolicy::default(), &failures).await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn fast_failures_exhaust_attempts() {
        let failures = [LinkError::fast("a"), LinkError::fast("b"), LinkError::fast("c")];
        let (result, calls) = scripted(RetryPolicy::default(), &failures).await;
        assert_eq!(result, Err(LinkError::fast("c")));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn slow_failure_is_not_retried() {
        let (result, calls) = scripted(RetryPolicy::default(), &[LinkError::slow("timeout")]).await;
        assert_eq!(result, Err(LinkError::slow("timeout")));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn slow_after_fast_stops_immediately() {
        let failures = [LinkError::fast("busy"), LinkError::slow("gone")];
        let (result, calls) = scripted(RetryPolicy::default(), &failures).await;
        assert_eq!(result, Err(LinkError::slow("gone")));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn at_least_one_attempt() {
        let (result, calls) = scripted(RetryPolicy { max_attempts: 0 }, &[]).await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 1);
    }
}
