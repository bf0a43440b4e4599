//! Contract of the gateway client library
//!
//! The byte-level MQTT-SN framing and the datagram transport live behind
//! [`GatewayClient`]. This crate only drives the session through it.
use std::sync::Arc;

use async_trait::async_trait;

use crate::contracts::{ConnectOptions, GatewayEndpoint, QoS, Topic, TopicId, TopicName};
use crate::errors::Result;

/// Receiver of inbound publications for a subscribed topic
///
/// Called from the session runner's context. Implementations must not block
/// and must return quickly: while `on_publication` runs, the runner cannot
/// service any other protocol traffic. Hand slow work to another context.
pub trait DeliveryHandler: Send + Sync {
    /// `payload` is the exact length-delimited message body; it is not
    /// terminated and may contain arbitrary bytes.
    fn on_publication(&self, topic: &Topic, payload: &[u8]);
}

/// A subscription as handed to the gateway client
///
/// The client keeps its own reference to `handler` and invokes it for every
/// publication whose topic matches `topic`.
#[derive(Clone)]
pub struct Subscription {
    pub topic: Topic,
    pub handler: Arc<dyn DeliveryHandler>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Operations offered by the gateway client library
#[async_trait]
pub trait GatewayClient: Send + Sync + 'static {
    /// Run the session runner: own the transport bound to `local_port` and
    /// dispatch inbound publications to subscribed handlers.
    ///
    /// Only returns when the runner can no longer operate.
    async fn run(&self, local_port: u16, client_id: &str) -> Result<()>;

    /// Perform the connect handshake with the gateway
    async fn connect(&self, endpoint: GatewayEndpoint, options: &ConnectOptions) -> Result<()>;

    /// Obtain the gateway's numeric id for a topic name
    async fn register(&self, topic_name: &TopicName) -> Result<TopicId>;

    /// Publish `payload` on a registered topic
    async fn publish(&self, topic: &Topic, payload: &[u8], qos: QoS) -> Result<()>;

    /// Subscribe and start delivering matching publications to the handler
    async fn subscribe(&self, subscription: &Subscription, qos: QoS) -> Result<TopicId>;
}
