//! Fixed-delay retry shared by the service clients

use std::time::Duration;

use thiserror::Error;

use crate::{Config, ERROR_BODY_EXCERPT_LEN, excerpt};

/// Why a single call to an external service failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// Connection, timeout or non-success transport status.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered, but the answer was not usable.
    #[error("unacceptable result: {0}")]
    Unacceptable(String),
}

impl From<ureq::Error> for AttemptError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, response) => {
                let body = response.into_string().unwrap_or_default();
                Self::Unacceptable(format!(
                    "status {code}: {}",
                    excerpt(body.trim(), ERROR_BODY_EXCERPT_LEN)
                ))
            }
            ureq::Error::Transport(transport) => Self::Transport(transport.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("{operation} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        last: AttemptError,
    },
}

/// A bounded number of attempts separated by a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.retry.max_attempts, config.retry_delay())
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// `op` receives the 1-based attempt number. There is no delay after
    /// the final attempt.
    pub fn run<T, F>(&self, operation: &'static str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Result<T, AttemptError>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Attempt failed"
                    );
                    if attempt >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            operation,
                            attempts: attempt,
                            last: err,
                        });
                    }
                }
            }
            std::thread::sleep(self.delay);
            attempt += 1;
        }
    }
}
