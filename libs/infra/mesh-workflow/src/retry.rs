use std::time::Duration;

use rand::Rng;

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Per-step fault classification: transient faults are
/// retried with exponential backoff up to `MAX_ATTEMPTS`; terminal faults
/// (`malformed`, `unauthorised`, `not_found`) never are.
#[derive(Debug, Clone)]
pub enum StepError {
    Transient(String),
    Terminal(String),
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepError::Transient(reason) | StepError::Terminal(reason) => write!(f, "{reason}"),
        }
    }
}

pub async fn retry_with_backoff<T, F, Fut>(mut attempt_fn: F) -> Result<T, StepError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StepError>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(StepError::Terminal(reason)) => return Err(StepError::Terminal(reason)),
            Err(StepError::Transient(reason)) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(StepError::Terminal(reason));
                }
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exponential = BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let capped = exponential.min(MAX_DELAY);
    let jitter_ms = rand::thread_rng().gen_range(0..=(capped.as_millis() as u64 / 2 + 1));
    capped + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(|| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(StepError::Transient("not yet".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn terminal_failure_is_never_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<i32, StepError> = retry_with_backoff(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(StepError::Terminal("malformed".into()))
        })
        .await;
        assert!(matches!(result, Err(StepError::Terminal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
