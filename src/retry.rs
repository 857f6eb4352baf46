//! Retry with feedback.
//!
//! A bounded retry wrapper for operations that can learn from their own
//! failures: each attempt receives the previous attempt's error text, so a
//! generation step can show the model what went wrong. Deliberately knows
//! nothing about SQL; it wraps table listing, structure extraction, sampling
//! and the main generate/execute pair alike.

use crate::error::{AgentError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `attempt` until it succeeds or the attempt budget is exhausted.
    ///
    /// The closure receives the previous failure's message (`None` on the
    /// first attempt). Cancellation is honored between attempts and is never
    /// retried; on exhaustion the last error propagates unchanged.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut attempt: F) -> Result<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.max_attempts == 0 {
            return Err(AgentError::Config(
                "retry policy needs at least one attempt".to_string(),
            ));
        }

        let mut previous: Option<String> = None;
        let mut attempt_no = 0;

        loop {
            attempt_no += 1;

            match attempt(previous.take()).await {
                Ok(value) => return Ok(value),
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(error) if attempt_no >= self.max_attempts => {
                    warn!(attempts = attempt_no, %error, "retry budget exhausted");
                    return Err(error);
                }
                Err(error) => {
                    debug!(attempt = attempt_no, %error, "attempt failed, retrying with feedback");
                    previous = Some(error.to_string());

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                        _ = tokio::time::sleep(self.delay) => {}
                    }
                }
            }
        }
    }
}
