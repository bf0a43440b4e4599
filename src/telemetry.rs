//! Telemetry publish pipeline
//!
//! One trigger cycle: register the telemetry topic, read the temperature
//! sensor, render the JSON payload and publish it once. Every failure ends
//! the cycle; none of them ends the process.
use std::fmt;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info};

use crate::contracts::{PhysicalValue, QoS, SensorKind, Topic, TopicName};
use crate::errors::{Result, TelemetryError};
use crate::gateway::GatewayClient;
use crate::registration::RegistrationRetrier;
use crate::sensor::SensorSource;

/// Temperature payload in hundredths of a degree
///
/// Renders as `{"temperature": <int>.<2-digit-fraction>}`. The sign is
/// written once in front and the fraction is always non-negative, so
/// -150 renders as `-1.50` and -5 as `-0.05`. Gateways fed by a plain
/// `%d.%02d` of `m / 100` and `|m % 100|` see `0.05` for the same reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemperaturePayload {
    hundredths: i32,
}

impl TemperaturePayload {
    pub fn from_hundredths(hundredths: i32) -> Self {
        Self { hundredths }
    }

    pub fn from_value(value: &PhysicalValue) -> Self {
        Self::from_hundredths(value.hundredths())
    }

    /// Integer part, truncated toward zero
    pub fn integer_part(&self) -> i32 {
        self.hundredths / 100
    }

    /// Absolute value of the remainder, always in `0..100`
    pub fn fraction(&self) -> u32 {
        (self.hundredths % 100).unsigned_abs()
    }
}

impl fmt::Display for TemperaturePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.hundredths < 0 { "-" } else { "" };
        let magnitude = self.hundredths.unsigned_abs();
        write!(
            f,
            "{{\"temperature\": {}{}.{:02}}}",
            sign,
            magnitude / 100,
            magnitude % 100
        )
    }
}

/// Render a sensor reading as the wire payload
pub fn format_payload(value: &PhysicalValue) -> String {
    TemperaturePayload::from_value(value).to_string()
}

/// Outcome of a completed trigger cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub topic: Topic,
    pub payload: String,
    pub elapsed: Duration,
}

/// Runs the register → read → format → publish pipeline
#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    topic_name: TopicName,
    retrier: RegistrationRetrier,
    sensor_kind: SensorKind,
    qos: QoS,
    settle_delay: Duration,
    publish_timeout: Duration,
}

impl TelemetryPublisher {
    pub fn new(topic_name: TopicName, retrier: RegistrationRetrier) -> Self {
        Self {
            topic_name,
            retrier,
            sensor_kind: SensorKind::Temperature,
            qos: QoS::AtMostOnce,
            settle_delay: crate::SETTLE_DELAY,
            publish_timeout: crate::REQUEST_TIMEOUT,
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Pause between a successful registration and the sensor read
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn topic_name(&self) -> &TopicName {
        &self.topic_name
    }

    /// Run one trigger cycle
    ///
    /// The publish itself is attempted exactly once; retrying is confined to
    /// topic registration.
    ///
    /// # Errors
    /// - `RegistrationFailed` before any sensor access
    /// - `NoDevice` / `SensorRead` before any publish
    /// - `Publish` if the single publish attempt fails or times out
    pub async fn publish_telemetry<G, S>(&self, gateway: &G, sensor: &S) -> Result<CycleReport>
    where
        G: GatewayClient + ?Sized,
        S: SensorSource + ?Sized,
    {
        let start = Instant::now();

        let topic = self.retrier.register(gateway, &self.topic_name).await?;

        sleep(self.settle_delay).await;

        let device = sensor
            .find_device(self.sensor_kind)
            .ok_or(TelemetryError::NoDevice(self.sensor_kind))?;
        let value = sensor.read(&device).map_err(|e| match e {
            TelemetryError::SensorRead { .. } => e,
            other => TelemetryError::SensorRead {
                device: device.name.clone(),
                reason: other.to_string(),
            },
        })?;
        let payload = format_payload(&value);

        let sent = match timeout(
            self.publish_timeout,
            gateway.publish(&topic, payload.as_bytes(), self.qos),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::Timeout {
                operation: "publish",
                after: self.publish_timeout,
            }),
        };

        if let Err(e) = sent {
            error!(topic = %topic.name, error = %e, "unable to publish telemetry");
            return Err(TelemetryError::Publish {
                topic: topic.name.to_string(),
                reason: e.to_string(),
            });
        }

        info!(topic = %topic.name, payload = %payload, "published temperature data");
        Ok(CycleReport {
            topic,
            payload,
            elapsed: start.elapsed(),
        })
    }
}
