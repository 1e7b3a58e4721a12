use eb_store::StoreError;
use std::future::Future;
use tracing::warn;

/// Bounded immediate retry for transient store failures.
///
/// Lock contention and connectivity blips are retried up to `max_attempts`
/// total calls; every other error is returned on the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Transient store failure, retrying"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
