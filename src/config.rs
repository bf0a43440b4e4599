//! Configuration loading and validation
//!
//! Settings come from a TOML file located through `SN_TELEMETRY_CONFIG` or
//! the default system path; when neither exists the built-in defaults, which
//! mirror the constants in the crate root, are used. The configuration is
//! read once at startup and never changes afterwards.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::contracts::{GatewayEndpoint, QoS, TopicName};
use crate::errors::{Result, TelemetryError};
use crate::registration::RetryPolicy;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SN_TELEMETRY_CONFIG";

/// Fallback configuration path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sn-telemetry/config.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub gateway: GatewayConfig,

    #[validate(nested)]
    pub session: SessionConfig,

    #[validate(nested)]
    pub simulation: SimulationConfig,
}

/// Console output style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggerConfig {
    /// trace, debug, info, warn or error; `RUST_LOG` takes precedence
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,

    pub format: LogFormat,

    pub ansi: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            ansi: true,
        }
    }
}

/// Gateway endpoint and client identity
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    /// IPv6 or IPv4 literal of the gateway
    #[validate(length(min = 1))]
    pub address: String,

    #[validate(range(min = 1))]
    pub port: u16,

    /// Local port the session runner binds to
    #[validate(range(min = 1))]
    pub local_port: u16,

    #[validate(length(min = 1, max = 23))]
    pub client_id: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            address: "fec0:affe::1".to_string(),
            port: 1885,
            local_port: 1883,
            client_id: crate::DEFAULT_CLIENT_ID.to_string(),
        }
    }
}

impl GatewayConfig {
    /// Parse the configured address into an endpoint
    pub fn endpoint(&self) -> Result<GatewayEndpoint> {
        GatewayEndpoint::parse(&self.address, self.port)
    }
}

/// Topics, QoS and timing of the control loop
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SessionConfig {
    #[validate(custom(function = "validate_topic_name"))]
    pub command_topic: String,

    #[validate(custom(function = "validate_topic_name"))]
    pub telemetry_topic: String,

    pub qos: QoS,

    #[validate(range(min = 1))]
    pub retry_attempts: u32,

    pub retry_delay_ms: u64,

    pub settle_delay_ms: u64,

    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,

    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_topic: crate::COMMAND_TOPIC.to_string(),
            telemetry_topic: crate::TELEMETRY_TOPIC.to_string(),
            qos: QoS::AtMostOnce,
            retry_attempts: crate::REGISTRATION_ATTEMPTS,
            retry_delay_ms: millis(crate::REGISTRATION_RETRY_DELAY),
            settle_delay_ms: millis(crate::SETTLE_DELAY),
            poll_interval_ms: millis(crate::POLL_INTERVAL),
            request_timeout_ms: millis(crate::REQUEST_TIMEOUT),
        }
    }
}

impl SessionConfig {
    pub fn command_topic(&self) -> Result<TopicName> {
        TopicName::new(&self.command_topic)
    }

    pub fn telemetry_topic(&self) -> Result<TopicName> {
        TopicName::new(&self.telemetry_topic)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.retry_attempts)
            .with_delay(Duration::from_millis(self.retry_delay_ms))
            .with_attempt_timeout(self.request_timeout())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Parameters of the in-process gateway and simulated sensor
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulationConfig {
    /// Probability that a gateway request goes unanswered
    #[validate(range(min = 0.0, max = 1.0))]
    pub loss_probability: f64,

    /// Period of simulated remote commands; 0 disables them
    pub command_interval_ms: u64,

    pub base_temperature_centi: i16,

    #[validate(range(min = 0))]
    pub jitter_centi: i16,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            loss_probability: 0.0,
            command_interval_ms: 30_000,
            base_temperature_centi: 2150,
            jitter_centi: 150,
        }
    }
}

impl Config {
    /// Locate and load the configuration, falling back to defaults
    pub fn new() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load(&path),
            None => {
                let config = Self::default();
                config.check()?;
                Ok(config)
            }
        }
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        fallback.exists().then(|| fallback.to_path_buf())
    }

    /// Read, parse and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            TelemetryError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| TelemetryError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| TelemetryError::Config(e.to_string()))
    }
}

fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => {
            let mut err = ValidationError::new("invalid_log_level");
            err.message = Some("expected one of trace, debug, info, warn, error".into());
            Err(err)
        }
    }
}

fn validate_topic_name(name: &str) -> std::result::Result<(), ValidationError> {
    TopicName::new(name).map(|_| ()).map_err(|e| {
        let mut err = ValidationError::new("invalid_topic_name");
        err.message = Some(e.to_string().into());
        err
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
