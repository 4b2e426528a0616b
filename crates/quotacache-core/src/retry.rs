//! Bounded retry for unary calls.
//!
//! [`Retry::run`] drives one logical call through up to `max_attempts`
//! physical attempts:
//!
//! ```text
//! Idle -> Attempting -> Success
//!                    -> Retryable -> Attempting ...
//!                    -> Fatal
//! ```
//!
//! Before each attempt the caller's deadline is checked; once it has passed
//! the call stops with `DEADLINE_EXCEEDED` without spending another attempt.
//! A failure observed after the deadline is reported the same way, whatever
//! status the transport produced for it.
//! A failed attempt is retried only if its status carries an `rpc-error`
//! envelope marked temporary. Statuses without a decodable envelope are
//! fatal. When the budget runs out, the last status is returned.

use crate::envelope;
use core::time::Duration;
use std::time::Instant;
use tonic::Status;

/// Attempt budget used by the clients unless configured otherwise.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Classification of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    /// Failed with a temporary application error.
    Retryable(Status),
    /// Failed with anything else.
    Fatal(Status),
}

impl<T> Attempt<T> {
    pub fn classify(result: Result<T, Status>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(status) => match envelope::decode(status.metadata()) {
                Some(err) if err.temporary => Attempt::Retryable(status),
                _ => Attempt::Fatal(status),
            },
        }
    }
}

/// Client-side retry policy.
#[derive(Clone, Copy, Debug)]
pub struct Retry {
    max_attempts: usize,
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl Retry {
    /// Creates a policy allowing `max_attempts` attempts (at least one).
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub const fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Runs `call` until it succeeds, fails fatally, runs out of attempts or
    /// passes `deadline`.
    ///
    /// `call` receives the time left before `deadline` (if any) so each
    /// attempt can forward it as its own gRPC timeout.
    pub async fn run<T, F, Fut>(
        &self,
        method: &str,
        deadline: Option<Instant>,
        mut call: F,
    ) -> Result<T, Status>
    where
        F: FnMut(Option<Duration>) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let mut attempts = 0;
        loop {
            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(left) if !left.is_zero() => Some(left),
                    _ => return Err(deadline_exceeded(attempts)),
                },
                None => None,
            };

            attempts += 1;
            let start = Instant::now();
            let attempt = Attempt::classify(call(remaining).await);
            let elapsed = start.elapsed();

            let (status, retryable) = match attempt {
                Attempt::Success(value) => {
                    tracing::info!(attempt = attempts, method, ?elapsed, "invoke");
                    return Ok(value);
                }
                Attempt::Retryable(status) => (status, true),
                Attempt::Fatal(status) => (status, false),
            };

            tracing::info!(
                attempt = attempts,
                method,
                ?elapsed,
                error = %status.message(),
                code = ?status.code(),
                "invoke"
            );

            // tonic reports its own expired timer as CANCELLED
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(deadline_exceeded(attempts));
            }

            if !retryable {
                return Err(status);
            }

            if attempts >= self.max_attempts {
                tracing::warn!(method, "giving up after {attempts} attempts");
                return Err(status);
            }
        }
    }
}

fn deadline_exceeded(attempts: usize) -> Status {
    Status::deadline_exceeded(format!(
        "timeout reached after {attempts} attempts: deadline exceeded"
    ))
}
