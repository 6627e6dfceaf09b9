//! Bounded retries with a per-attempt timeout and exponential backoff.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::jobs::backoff::backoff_delay;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout_per_attempt: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            timeout_per_attempt: Duration::from_secs(10),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Sleep taken after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        backoff_delay(
            self.initial_delay,
            self.factor,
            self.max_delay,
            attempt.saturating_sub(1),
        )
    }
}

/// Why a single attempt did not produce a value.
#[derive(Debug, Error)]
pub enum AttemptError<E> {
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(E),
}

impl<E> AttemptError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AttemptError::Cancelled)
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// `attempt_errors` holds the failures that preceded the successful attempt.
    Success {
        value: T,
        attempt_errors: Vec<AttemptError<E>>,
    },
    /// `attempt_errors` holds the failures before `final_error`.
    Failure {
        final_error: AttemptError<E>,
        attempt_errors: Vec<AttemptError<E>>,
    },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    pub fn attempt_errors(&self) -> &[AttemptError<E>] {
        match self {
            RetryOutcome::Success { attempt_errors, .. }
            | RetryOutcome::Failure { attempt_errors, .. } => attempt_errors,
        }
    }

    /// Total attempts made.
    pub fn attempts(&self) -> usize {
        self.attempt_errors().len() + 1
    }

    pub fn into_result(self) -> Result<T, AttemptError<E>> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Failure { final_error, .. } => Err(final_error),
        }
    }
}

type RetryPredicate<'a, E> = Box<dyn Fn(&E) -> bool + Send + Sync + 'a>;
type RetryObserver<'a, E> = Box<dyn FnMut(u32, &AttemptError<E>) + Send + 'a>;

/// A retrying runner for one operation.
///
/// Timeouts are retried. Cancellation never is. Operation errors are retried
/// when the predicate says so (always, by default).
pub struct RetryableTask<'a, E> {
    policy: RetryPolicy,
    should_retry: RetryPredicate<'a, E>,
    on_retry: Option<RetryObserver<'a, E>>,
    cancel: CancellationToken,
}

impl<'a, E> RetryableTask<'a, E> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            should_retry: Box::new(|_| true),
            on_retry: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'a) -> Self {
        self.should_retry = Box::new(predicate);
        self
    }

    /// Called with the failed attempt number before each backoff sleep.
    pub fn on_retry(mut self, observer: impl FnMut(u32, &AttemptError<E>) + Send + 'a) -> Self {
        self.on_retry = Some(Box::new(observer));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn retryable(&self, error: &AttemptError<E>) -> bool {
        match error {
            AttemptError::Cancelled => false,
            AttemptError::TimedOut(_) => true,
            AttemptError::Failed(e) => (self.should_retry)(e),
        }
    }

    /// Run `operation` (given the 1-based attempt number) until it succeeds,
    /// fails with a non-retryable error, or the attempts run out.
    pub async fn run<T, F, Fut>(mut self, mut operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.policy.attempts.max(1);
        let timeout = self.policy.timeout_per_attempt;
        let mut attempt_errors = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(AttemptError::Cancelled),
                outcome = tokio::time::timeout(timeout, operation(attempt)) => match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(AttemptError::Failed(e)),
                    Err(_) => Err(AttemptError::TimedOut(timeout)),
                },
            };

            let error = match result {
                Ok(value) => {
                    return RetryOutcome::Success {
                        value,
                        attempt_errors,
                    };
                }
                Err(error) => error,
            };

            if attempt >= attempts || !self.retryable(&error) {
                return RetryOutcome::Failure {
                    final_error: error,
                    attempt_errors,
                };
            }

            if let Some(observer) = self.on_retry.as_mut() {
                observer(attempt, &error);
            }
            let delay = self.policy.delay_after(attempt);
            debug!("Attempt {}/{} failed, retrying in {:?}", attempt, attempts, delay);
            attempt_errors.push(error);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return RetryOutcome::Failure {
                        final_error: AttemptError::Cancelled,
                        attempt_errors,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Shorthand for a task that retries every operation error.
pub async fn run_with_retries<T, E, F, Fut>(policy: RetryPolicy, operation: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryableTask::new(policy).run(operation).await
}
