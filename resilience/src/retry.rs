use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::error::CallError;

/// Upper bound honoured for server-provided retry-after hints. A hint above
/// this is clamped rather than trusted blindly.
pub const RETRY_AFTER_CEILING: Duration = Duration::from_secs(300);

pub type RetryPredicate = Arc<dyn Fn(&CallError) -> bool + Send + Sync>;
pub type RetryObserver = Arc<dyn Fn(u32, &CallError, Duration) + Send + Sync>;

/// Per-call retry behaviour. `max_retries` counts retries after the initial
/// attempt, so a call makes at most `max_retries + 1` transport invocations.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Symmetric jitter applied to the computed delay, in `[0.0, 1.0]`.
    pub jitter_factor: f64,
    /// Decides whether a failed attempt is worth retrying. Defaults to
    /// [`CallError::is_retryable`].
    pub should_retry: RetryPredicate,
    /// Invoked before each backoff sleep with the zero-based attempt index,
    /// the error that triggered the retry and the delay about to be taken.
    pub on_retry: Option<RetryObserver>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
            jitter_factor: 0.1,
            should_retry: Arc::new(CallError::is_retryable),
            on_retry: None,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter_factor", &self.jitter_factor)
            .finish_non_exhaustive()
    }
}

/// Exponential backoff with symmetric jitter.
///
/// The uncapped delay doubles per attempt (`base * 2^attempt`, saturating),
/// is capped at `max_delay`, then scaled by `1 + uniform(-1, 1) * jitter`.
/// With `jitter_factor == 0` the result is exactly
/// `min(base * 2^attempt, max_delay)`.
pub fn calculate_delay(
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
) -> Duration {
    let base_ms = base_delay.as_millis() as u64;
    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let capped = exponential.min(max_delay.as_millis() as u64);

    if jitter_factor <= 0.0 {
        return Duration::from_millis(capped);
    }

    let multiplier = 1.0 + rand::thread_rng().gen_range(-1.0..=1.0) * jitter_factor;
    Duration::from_millis(((capped as f64) * multiplier).max(0.0) as u64)
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_delay(attempt, self.base_delay, self.max_delay, self.jitter_factor)
    }
}

/// Drives an async operation through the retry/backoff loop, consulting the
/// circuit breaker registry when the call is keyed.
pub struct RetryExecutor {
    registry: Arc<CircuitBreakerRegistry>,
}

impl RetryExecutor {
    pub fn new(registry: Arc<CircuitBreakerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    /// Run `operation` until it succeeds, the retry budget is exhausted, the
    /// policy declines the error, or the caller cancels.
    ///
    /// When `circuit_key` is given the circuit is consulted once up front
    /// (an open circuit fails fast without invoking the operation at all)
    /// and every attempt outcome is recorded against it. Exhaustion
    /// surfaces the last observed error unchanged.
    pub async fn execute<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        circuit_key: Option<&str>,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        if let Some(key) = circuit_key {
            self.registry.check_circuit(key)?;
        }

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(CallError::Cancelled);
            }

            match operation().await {
                Ok(value) => {
                    if let Some(key) = circuit_key {
                        self.registry.record_success(key);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if let Some(key) = circuit_key {
                        self.registry.record_failure(key);
                    }
                    if attempt >= policy.max_retries {
                        return Err(error);
                    }
                    // Cancellation is absolute; it skips the policy entirely.
                    if matches!(error, CallError::Cancelled) {
                        return Err(error);
                    }
                    if !(policy.should_retry)(&error) {
                        return Err(error);
                    }

                    let delay = next_delay(policy, attempt, &error);
                    if let Some(on_retry) = &policy.on_retry {
                        on_retry(attempt, &error, delay);
                    }
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after failure"
                    );
                    sleep_with_cancel(delay, cancel).await?;
                    attempt += 1;
                }
            }
        }
    }
}

/// A rate-limit hint from the server supersedes the computed backoff,
/// clamped to [`RETRY_AFTER_CEILING`].
fn next_delay(policy: &RetryPolicy, attempt: u32, error: &CallError) -> Duration {
    match error.retry_after() {
        Some(hint) => hint.min(RETRY_AFTER_CEILING),
        None => policy.delay_for(attempt),
    }
}

async fn sleep_with_cancel(
    delay: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<(), CallError> {
    match cancel {
        Some(token) => {
            tokio::select! {
                _ = token.cancelled() => Err(CallError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}
