use std::future::Future;
use std::time::Duration;

use pcapi_core::PcapiError;
use rand::Rng;
use tracing::debug;

use super::transfer::TransferError;

/// Errors that may succeed when the same request is sent again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for PcapiError {
    fn is_retryable(&self) -> bool {
        PcapiError::is_retryable(self)
    }
}

impl Retryable for TransferError {
    fn is_retryable(&self) -> bool {
        TransferError::is_retryable(self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(8), true)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }

    /// Runs `op` and repeats it up to `retries` more times while it fails
    /// with a retryable error, sleeping between attempts.
    pub async fn retry<T, E, F, Fut>(&self, retries: u32, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(err) if attempt < retries && err.is_retryable() => {
                    let delay = self.delay(attempt);
                    debug!("retrying in {delay:?} after: {err}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use reqwest::StatusCode;
    use std::cell::Cell;

    fn unavailable() -> PcapiError {
        PcapiError::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        }
    }

    fn fast() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(2), false)
    }

    #[test]
    fn backoff_without_jitter_is_exponential() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), false);
        let mut rng = StdRng::seed_from_u64(1);
        let delays: Vec<_> = (0..5)
            .map(|attempt| backoff.delay_with_rng(attempt, &mut rng).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 800]);
    }

    #[test]
    fn backoff_with_jitter_is_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), true);
        let mut rng = StdRng::seed_from_u64(42);
        assert!(backoff.delay_with_rng(3, &mut rng) <= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn retry_repeats_transient_failures() {
        let calls = Cell::new(0);
        let result = fast()
            .retry(2, || {
                calls.set(calls.get() + 1);
                let attempt = calls.get();
                async move {
                    if attempt < 3 { Err(unavailable()) } else { Ok(attempt) }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_budget() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast()
            .retry(1, || {
                calls.set(calls.get() + 1);
                async { Err(unavailable()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn retry_stops_on_permanent_errors() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast()
            .retry(3, || {
                calls.set(calls.get() + 1);
                async {
                    Err(PcapiError::Rejected {
                        code: 1,
                        msg: "nope".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
