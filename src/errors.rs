//! Error types for the telemetry session
//!
//! Every failure maps onto one of three classes (see [`FailureClass`]):
//! fatal startup errors end the process, recoverable cycle errors abandon a
//! single trigger cycle, and transport errors are absorbed by the
//! registration retry policy until it gives up.
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::contracts::SensorKind;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// How a failure affects the running process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// No session can exist; report and exit with a non-zero status
    FatalStartup,

    /// Abandon the current trigger cycle and keep polling
    RecoverableCycle,

    /// A single gateway request failed; retry policy decides what happens next
    Transport,
}

/// Telemetry session error enumeration
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Gateway address could not be parsed
    #[error("invalid gateway address '{address}': {reason}")]
    AddressParse { address: String, reason: String },

    /// Connect handshake was refused or never completed
    #[error("unable to connect to gateway {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Gateway rejected the subscription
    #[error("unable to subscribe to '{topic}': {reason}")]
    Subscribe { topic: String, reason: String },

    /// No free subscription slot left
    #[error("no memory to store new subscriptions (capacity {capacity})")]
    TableFull { capacity: usize },

    /// Topic name exceeds the fixed bound
    #[error("topic name is {actual} bytes, maximum is {max}")]
    TopicNameTooLong { max: usize, actual: usize },

    /// Topic name is empty or otherwise unusable
    #[error("invalid topic name: {0}")]
    InvalidTopicName(String),

    /// Every registration attempt failed
    #[error("failed to register topic '{topic}' after {attempts} attempts")]
    RegistrationFailed { topic: String, attempts: u32 },

    /// No sensor of the requested kind is present
    #[error("no {0} sensor found")]
    NoDevice(SensorKind),

    /// Sensor was found but could not be read
    #[error("failed to read sensor '{device}': {reason}")]
    SensorRead { device: String, reason: String },

    /// Publish request failed
    #[error("unable to publish data to topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    /// Gateway request did not complete in time
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    /// Transport-level failure of a single request
    #[error("transport error: {0}")]
    Transport(String),

    /// Request issued without an established session
    #[error("not connected to a gateway")]
    NotConnected,

    /// Session runner could not start or stopped unexpectedly
    #[error("session runner stopped: {0}")]
    SessionRunner(String),

    /// Operation is not valid in the controller's current state
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Configuration could not be loaded or failed validation
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TelemetryError {
    /// Classify this error according to its effect on the process
    pub fn class(&self) -> FailureClass {
        match self {
            Self::AddressParse { .. }
            | Self::Connect { .. }
            | Self::Subscribe { .. }
            | Self::TableFull { .. }
            | Self::TopicNameTooLong { .. }
            | Self::InvalidTopicName(_)
            | Self::SessionRunner(_)
            | Self::InvalidState(_)
            | Self::Config(_)
            | Self::Io(_) => FailureClass::FatalStartup,
            Self::RegistrationFailed { .. }
            | Self::NoDevice(_)
            | Self::SensorRead { .. }
            | Self::Publish { .. } => FailureClass::RecoverableCycle,
            Self::Timeout { .. } | Self::Transport(_) | Self::NotConnected => {
                FailureClass::Transport
            }
        }
    }

    /// True when the process cannot continue
    pub fn is_fatal(&self) -> bool {
        self.class() == FailureClass::FatalStartup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        assert!(TelemetryError::TableFull { capacity: 16 }.is_fatal());
        assert!(TelemetryError::Connect {
            endpoint: "[::1]:1885".to_string(),
            reason: "refused".to_string(),
        }
        .is_fatal());

        let exhausted = TelemetryError::RegistrationFailed {
            topic: "sensor/data".to_string(),
            attempts: 3,
        };
        assert_eq!(exhausted.class(), FailureClass::RecoverableCycle);
        assert_eq!(
            TelemetryError::NoDevice(SensorKind::Temperature).class(),
            FailureClass::RecoverableCycle
        );
        assert_eq!(
            TelemetryError::Transport("lost".to_string()).class(),
            FailureClass::Transport
        );
    }

    #[test]
    fn test_display_messages() {
        let err = TelemetryError::RegistrationFailed {
            topic: "sensor/data".to_string(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "failed to register topic 'sensor/data' after 3 attempts"
        );
        assert_eq!(
            TelemetryError::NoDevice(SensorKind::Temperature).to_string(),
            "no temperature sensor found"
        );
    }
}
