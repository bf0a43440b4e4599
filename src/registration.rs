//! Topic registration with bounded retry
//!
//! A registration request travels over a lossy transport, so a single failure
//! says little. The retrier makes up to `max_attempts` requests with a fixed
//! delay between them and only then reports `RegistrationFailed`, which the
//! caller treats as the end of one trigger cycle rather than of the process.
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::contracts::{Topic, TopicName};
use crate::errors::{Result, TelemetryError};
use crate::gateway::GatewayClient;

/// Retry parameters for topic registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Reference policy: 3 attempts, 1 s apart, each bounded by the request timeout
    pub fn new() -> Self {
        Self {
            max_attempts: crate::REGISTRATION_ATTEMPTS,
            delay: crate::REGISTRATION_RETRY_DELAY,
            attempt_timeout: crate::REQUEST_TIMEOUT,
        }
    }

    /// Set the maximum number of register requests per call
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the pause between a failed attempt and the next one
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Bound each individual register request
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves topic names to gateway ids under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RegistrationRetrier {
    policy: RetryPolicy,
}

impl RegistrationRetrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Register `topic_name`, retrying failed or timed-out attempts
    ///
    /// Stops at the first success. Never issues more than `max_attempts`
    /// requests, and does not sleep after the final failure.
    ///
    /// # Errors
    /// `RegistrationFailed` once every attempt has failed.
    pub async fn register<G>(&self, gateway: &G, topic_name: &TopicName) -> Result<Topic>
    where
        G: GatewayClient + ?Sized,
    {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            debug!(topic = %topic_name, attempt, max_attempts, "registering topic");

            let outcome = match timeout(self.policy.attempt_timeout, gateway.register(topic_name)).await {
                Ok(result) => result,
                Err(_) => Err(TelemetryError::Timeout {
                    operation: "register",
                    after: self.policy.attempt_timeout,
                }),
            };

            match outcome {
                Ok(id) => {
                    info!(topic = %topic_name, topic_id = %id, attempt, "registered topic");
                    return Ok(Topic::resolved(topic_name.clone(), id));
                }
                Err(e) => {
                    warn!(
                        topic = %topic_name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "unable to obtain topic id"
                    );
                }
            }

            if attempt < max_attempts {
                sleep(self.policy.delay).await;
            }
        }

        Err(TelemetryError::RegistrationFailed {
            topic: topic_name.to_string(),
            attempts: max_attempts,
        })
    }
}
