//! Core data structures shared by the session components
//!
//! Topics, the gateway endpoint and the typed sensor measurements that cross
//! the boundaries to the gateway client and the sensor source.
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TelemetryError};
use crate::TOPIC_MAXLEN;

/// Gateway-assigned numeric topic identifier
///
/// Zero is reserved by the protocol and never handed out by a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicId(u16);

impl TopicId {
    /// Wrap a gateway-assigned id, rejecting the reserved zero value
    pub fn new(id: u16) -> Option<Self> {
        (id != 0).then_some(Self(id))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Topic name bounded by [`TOPIC_MAXLEN`] bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName(String);

impl TopicName {
    /// Validate and take ownership of a topic name
    ///
    /// # Errors
    /// - `InvalidTopicName` if the name is empty
    /// - `TopicNameTooLong` if it exceeds [`TOPIC_MAXLEN`] bytes
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(TelemetryError::InvalidTopicName(
                "topic name must not be empty".to_string(),
            ));
        }
        if name.len() > TOPIC_MAXLEN {
            return Err(TelemetryError::TopicNameTooLong {
                max: TOPIC_MAXLEN,
                actual: name.len(),
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for TopicName {
    type Error = TelemetryError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A topic as seen by the client: name plus the id the gateway assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub name: TopicName,
    pub id: Option<TopicId>,
}

impl Topic {
    /// Topic that has not been registered yet
    pub fn unresolved(name: TopicName) -> Self {
        Self { name, id: None }
    }

    pub fn resolved(name: TopicName, id: TopicId) -> Self {
        Self { name, id: Some(id) }
    }

    /// True once the gateway has assigned an id
    pub fn is_resolved(&self) -> bool {
        self.id.is_some()
    }
}

/// Quality-of-service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    /// Fire and forget, no acknowledgment
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// Address of the single gateway this client talks to
///
/// Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayEndpoint {
    addr: SocketAddr,
}

impl GatewayEndpoint {
    /// Parse an IPv6 or IPv4 literal (brackets optional) and a port
    pub fn parse(address: &str, port: u16) -> Result<Self> {
        let trimmed = address
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']');
        let ip: IpAddr = trimmed
            .parse()
            .map_err(|e: std::net::AddrParseError| TelemetryError::AddressParse {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            addr: SocketAddr::new(ip, port),
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Options for the connect handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub client_id: String,
    pub clean_session: bool,
    pub will_topic: Option<TopicName>,
    pub will_message: Vec<u8>,
}

impl ConnectOptions {
    /// Clean session without a last-will message
    pub fn clean(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session: true,
            will_topic: None,
            will_message: Vec::new(),
        }
    }
}

/// Physical quantity a sensor measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Humidity,
    Pressure,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
        };
        f.write_str(name)
    }
}

/// Unit attached to a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    Percent,
    Pascal,
    None,
}

/// Typed measurement returned by a sensor read
///
/// Each component represents `val * 10^scale` in `unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalValue {
    pub val: [i16; 3],
    pub unit: Unit,
    pub scale: i8,
}

impl PhysicalValue {
    pub fn new(val: [i16; 3], unit: Unit, scale: i8) -> Self {
        Self { val, unit, scale }
    }

    /// Single-component reading expressed in hundredths of `unit`
    pub fn centi(raw: i16, unit: Unit) -> Self {
        Self::new([raw, 0, 0], unit, -2)
    }

    /// First component normalised to hundredths of the unit
    ///
    /// Values with a finer scale are truncated toward zero.
    pub fn hundredths(&self) -> i32 {
        let raw = i32::from(self.val[0]);
        let shift = i32::from(self.scale) + 2;
        if shift >= 0 {
            raw.saturating_mul(10i32.saturating_pow(shift.unsigned_abs()))
        } else {
            raw / 10i32.saturating_pow(shift.unsigned_abs())
        }
    }
}

/// Handle to a sensor located through a [`crate::SensorSource`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub index: usize,
    pub name: String,
    pub kind: SensorKind,
}
