//! sn_telemetry - MQTT-SN session core for command-triggered telemetry
//!
//! Establishes a session with a fixed gateway, subscribes to a command
//! topic and, whenever a command publication arrives, reads the local
//! temperature sensor and publishes the value on a telemetry topic.
//!
//! # Execution contexts
//! - The gateway session runner owns transport I/O and invokes
//!   [`gateway::DeliveryHandler`]s.
//! - The control loop ([`session::SessionController`]) owns the publish
//!   pipeline and sensor access.
//!
//! The two meet only at [`trigger::TriggerSignal`]. The control loop polls it
//! once per [`POLL_INTERVAL`], so a command is acted upon at most one poll
//! interval (plus the duration of an in-flight cycle) after it was delivered.

pub mod config;
pub mod contracts;
pub mod delivery;
pub mod errors;
pub mod gateway;
pub mod logger;
pub mod loopback;
pub mod registration;
pub mod sensor;
pub mod session;
pub mod subscriptions;
pub mod telemetry;
pub mod trigger;

use std::time::Duration;

pub use contracts::{GatewayEndpoint, PhysicalValue, QoS, Topic, TopicId, TopicName};
pub use errors::{FailureClass, Result, TelemetryError};
pub use gateway::{DeliveryHandler, GatewayClient};
pub use sensor::SensorSource;
pub use session::{SessionController, SessionState};
pub use subscriptions::SubscriptionTable;
pub use trigger::TriggerSignal;

/// Number of subscription slots
pub const NUMOFSUBS: usize = 16;

/// Maximum topic name length in bytes
pub const TOPIC_MAXLEN: usize = 64;

/// Maximum client identifier length (MQTT-SN limit)
pub const CLIENT_ID_MAXLEN: usize = 23;

/// Capacity of the inbound publication queue
pub const INBOX_CAPACITY: usize = 8;

/// Maximum size of a formatted telemetry payload
pub const MAX_PAYLOAD_SIZE: usize = 64;

/// Topic registration attempts per trigger cycle
pub const REGISTRATION_ATTEMPTS: u32 = 3;

/// Delay between registration attempts
pub const REGISTRATION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delay between a successful registration and the sensor read
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Period of the control loop's trigger poll
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound on any single gateway request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Topic whose publications trigger a telemetry cycle
pub const COMMAND_TOPIC: &str = "telegram/data";

/// Topic the temperature reading is published on
pub const TELEMETRY_TOPIC: &str = "sensor/data";

/// Client identifier presented to the gateway
pub const DEFAULT_CLIENT_ID: &str = "gertrud";
