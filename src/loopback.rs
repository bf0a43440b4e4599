//! In-process gateway
//!
//! Implements [`GatewayClient`] without a network: topic ids are assigned
//! locally, publishes to subscribed topics are echoed back through the
//! session runner, and remote publications can be injected with
//! [`LoopbackGateway::inject`]. Request loss and refusals can be simulated
//! to exercise the session's failure handling.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::contracts::{ConnectOptions, GatewayEndpoint, QoS, Topic, TopicId, TopicName};
use crate::errors::{Result, TelemetryError};
use crate::gateway::{GatewayClient, Subscription};

/// A publish accepted by the loopback gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: TopicName,
    pub topic_id: TopicId,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

#[derive(Debug)]
struct Inbound {
    topic: TopicName,
    payload: Vec<u8>,
}

#[derive(Default)]
struct LoopbackState {
    endpoint: Option<GatewayEndpoint>,
    client_id: String,
    topics: HashMap<TopicName, TopicId>,
    next_id: u16,
    subscriptions: Vec<Subscription>,
    published: Vec<PublishedMessage>,
}

impl LoopbackState {
    fn topic_id(&mut self, name: &TopicName) -> Result<TopicId> {
        if let Some(id) = self.topics.get(name) {
            return Ok(*id);
        }
        let next = self.next_id.checked_add(1).ok_or_else(|| {
            TelemetryError::Transport("gateway ran out of topic ids".to_string())
        })?;
        let id = TopicId::new(next)
            .ok_or_else(|| TelemetryError::Transport("invalid topic id".to_string()))?;
        self.next_id = next;
        self.topics.insert(name.clone(), id);
        Ok(id)
    }

    fn require_connected(&self) -> Result<()> {
        match self.endpoint {
            Some(_) => Ok(()),
            None => Err(TelemetryError::NotConnected),
        }
    }
}

/// Gateway client backed by local state instead of a transport
pub struct LoopbackGateway {
    state: Mutex<LoopbackState>,
    inbox_tx: mpsc::Sender<Inbound>,
    inbox_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    loss_probability: f64,
    refuse_connect: AtomicBool,
    stall_connect: AtomicBool,
    stall_subscribe: AtomicBool,
    failing_registrations: AtomicU32,
    register_calls: AtomicU32,
    running: AtomicBool,
}

impl LoopbackGateway {
    pub fn new() -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(crate::INBOX_CAPACITY);
        Self {
            state: Mutex::new(LoopbackState::default()),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            loss_probability: 0.0,
            refuse_connect: AtomicBool::new(false),
            stall_connect: AtomicBool::new(false),
            stall_subscribe: AtomicBool::new(false),
            failing_registrations: AtomicU32::new(0),
            register_calls: AtomicU32::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Drop each register request and QoS 0 publish with probability `p`
    pub fn with_loss_probability(mut self, p: f64) -> Self {
        self.loss_probability = p.clamp(0.0, 1.0);
        self
    }

    /// Make subsequent connect handshakes fail
    pub fn refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Never answer subsequent connect handshakes
    pub fn stall_connect(&self, stall: bool) {
        self.stall_connect.store(stall, Ordering::SeqCst);
    }

    /// Never answer subsequent subscribe requests
    pub fn stall_subscribe(&self, stall: bool) {
        self.stall_subscribe.store(stall, Ordering::SeqCst);
    }

    /// Reject the next `count` register requests
    pub fn fail_next_registrations(&self, count: u32) {
        self.failing_registrations.store(count, Ordering::SeqCst);
    }

    /// Total register requests received
    pub fn register_calls(&self) -> u32 {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().endpoint.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a publication as if it had arrived from the gateway
    pub fn inject(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let inbound = Inbound {
            topic: TopicName::new(topic)?,
            payload: payload.to_vec(),
        };
        self.inbox_tx
            .try_send(inbound)
            .map_err(|e| TelemetryError::Transport(format!("inbound queue: {}", e)))
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lost(&self) -> bool {
        self.loss_probability > 0.0 && rand::thread_rng().gen_bool(self.loss_probability)
    }

    fn dispatch(&self, inbound: Inbound) {
        let (topic, handlers) = {
            let state = self.lock();
            let handlers: Vec<_> = state
                .subscriptions
                .iter()
                .filter(|sub| sub.topic.name == inbound.topic)
                .map(|sub| sub.handler.clone())
                .collect();
            let topic = match state.topics.get(&inbound.topic) {
                Some(id) => Topic::resolved(inbound.topic.clone(), *id),
                None => Topic::unresolved(inbound.topic.clone()),
            };
            (topic, handlers)
        };

        if handlers.is_empty() {
            debug!(topic = %topic.name, "no subscriber for inbound publication");
            return;
        }
        for handler in handlers {
            handler.on_publication(&topic, &inbound.payload);
        }
    }
}

impl Default for LoopbackGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayClient for LoopbackGateway {
    async fn run(&self, local_port: u16, client_id: &str) -> Result<()> {
        let taken = self
            .inbox_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut inbox = taken.ok_or_else(|| {
            TelemetryError::SessionRunner("session runner already started".to_string())
        })?;

        self.running.store(true, Ordering::SeqCst);
        info!(local_port, client_id, "loopback session runner started");

        while let Some(inbound) = inbox.recv().await {
            self.dispatch(inbound);
        }

        self.running.store(false, Ordering::SeqCst);
        Err(TelemetryError::SessionRunner("inbound queue closed".to_string()))
    }

    async fn connect(&self, endpoint: GatewayEndpoint, options: &ConnectOptions) -> Result<()> {
        if self.stall_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(TelemetryError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused by gateway".to_string(),
            });
        }

        let mut state = self.lock();
        if options.clean_session {
            state.subscriptions.clear();
        }
        state.endpoint = Some(endpoint);
        state.client_id = options.client_id.clone();
        info!(%endpoint, client_id = %state.client_id, "connected");
        Ok(())
    }

    async fn register(&self, topic_name: &TopicName) -> Result<TopicId> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.lock().require_connected()?;

        let rejected = self
            .failing_registrations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(TelemetryError::Transport("registration rejected".to_string()));
        }
        if self.lost() {
            return Err(TelemetryError::Transport("no REGACK received".to_string()));
        }

        self.lock().topic_id(topic_name)
    }

    async fn publish(&self, topic: &Topic, payload: &[u8], qos: QoS) -> Result<()> {
        let topic_id = topic.id.ok_or_else(|| {
            TelemetryError::Transport(format!("topic '{}' is not registered", topic.name))
        })?;

        let echo = {
            let mut state = self.lock();
            state.require_connected()?;
            if qos == QoS::AtMostOnce && self.lost() {
                debug!(topic = %topic.name, "publish lost in transit");
                return Ok(());
            }
            state.published.push(PublishedMessage {
                topic: topic.name.clone(),
                topic_id,
                payload: payload.to_vec(),
                qos,
            });
            state
                .subscriptions
                .iter()
                .any(|sub| sub.topic.name == topic.name)
        };

        if echo {
            if let Err(e) = self.inject(topic.name.as_str(), payload) {
                warn!(topic = %topic.name, error = %e, "dropping echoed publication");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, subscription: &Subscription, qos: QoS) -> Result<TopicId> {
        if self.stall_subscribe.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let mut state = self.lock();
        state.require_connected()?;
        let id = state.topic_id(&subscription.topic.name)?;
        state.subscriptions.push(subscription.clone());
        info!(topic = %subscription.topic.name, topic_id = %id, qos = qos.level(), "subscribed");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::DeliveryHandler;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<(String, Option<TopicId>, Vec<u8>)>>,
    }

    impl DeliveryHandler for Collect {
        fn on_publication(&self, topic: &Topic, payload: &[u8]) {
            self.seen
                .lock()
                .unwrap()
                .push((topic.name.to_string(), topic.id, payload.to_vec()));
        }
    }

    fn endpoint() -> GatewayEndpoint {
        GatewayEndpoint::parse("::1", 1885).unwrap()
    }

    #[tokio::test]
    async fn test_requests_need_a_session() {
        let gateway = LoopbackGateway::new();
        let name = TopicName::new("sensor/data").unwrap();
        assert!(matches!(
            gateway.register(&name).await,
            Err(TelemetryError::NotConnected)
        ));

        gateway.connect(endpoint(), &ConnectOptions::clean("gertrud")).await.unwrap();
        assert!(gateway.is_connected());
        assert_eq!(gateway.register(&name).await.unwrap(), TopicId::new(1).unwrap());
        // Same name, same id
        assert_eq!(gateway.register(&name).await.unwrap(), TopicId::new(1).unwrap());
        assert_eq!(gateway.register_calls(), 3);
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let gateway = LoopbackGateway::new();
        gateway.refuse_connect(true);
        let err = gateway
            .connect(endpoint(), &ConnectOptions::clean("gertrud"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!gateway.is_connected());
    }

    #[tokio::test]
    async fn test_failing_registrations_countdown() {
        let gateway = LoopbackGateway::new();
        gateway.connect(endpoint(), &ConnectOptions::clean("gertrud")).await.unwrap();
        gateway.fail_next_registrations(2);

        let name = TopicName::new("sensor/data").unwrap();
        assert!(gateway.register(&name).await.is_err());
        assert!(gateway.register(&name).await.is_err());
        assert!(gateway.register(&name).await.is_ok());
    }

    #[tokio::test]
    async fn test_total_loss_drops_registrations() {
        let gateway = LoopbackGateway::new().with_loss_probability(1.0);
        gateway.connect(endpoint(), &ConnectOptions::clean("gertrud")).await.unwrap();
        let name = TopicName::new("sensor/data").unwrap();
        assert!(matches!(
            gateway.register(&name).await,
            Err(TelemetryError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_runner_dispatches_to_subscribers() {
        let gateway = Arc::new(LoopbackGateway::new());
        gateway.connect(endpoint(), &ConnectOptions::clean("gertrud")).await.unwrap();

        let collect = Arc::new(Collect::default());
        let sub = Subscription {
            topic: Topic::unresolved(TopicName::new("telegram/data").unwrap()),
            handler: collect.clone(),
        };
        let id = gateway.subscribe(&sub, QoS::AtMostOnce).await.unwrap();

        let runner = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.run(1883, "gertrud").await })
        };

        gateway.inject("telegram/data", b"ping").unwrap();
        gateway.inject("other/topic", b"ignored").unwrap();

        for _ in 0..100 {
            if !collect.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let seen = collect.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![("telegram/data".to_string(), Some(id), b"ping".to_vec())]);
        assert!(gateway.is_running());

        // A second runner cannot take over the inbound queue.
        assert!(gateway.run(1883, "gertrud").await.is_err());
        runner.abort();
    }

    #[tokio::test]
    async fn test_publish_requires_registered_topic() {
        let gateway = LoopbackGateway::new();
        gateway.connect(endpoint(), &ConnectOptions::clean("gertrud")).await.unwrap();

        let unresolved = Topic::unresolved(TopicName::new("sensor/data").unwrap());
        assert!(gateway.publish(&unresolved, b"x", QoS::AtMostOnce).await.is_err());

        let name = TopicName::new("sensor/data").unwrap();
        let id = gateway.register(&name).await.unwrap();
        let topic = Topic::resolved(name, id);
        gateway.publish(&topic, b"x", QoS::AtMostOnce).await.unwrap();

        let published = gateway.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic_id, id);
        assert_eq!(published[0].payload, b"x".to_vec());
    }

    #[tokio::test]
    async fn test_unsubscribed_inbound_topics_get_no_id() {
        let gateway = Arc::new(LoopbackGateway::new());
        gateway.connect(endpoint(), &ConnectOptions::clean("gertrud")).await.unwrap();
        let runner = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.run(1883, "gertrud").await })
        };

        for i in 0..4 {
            gateway.inject(&format!("noise/{}", i), b"x").unwrap();
        }
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert!(gateway.lock().topics.is_empty());
        let id = gateway.register(&TopicName::new("sensor/data").unwrap()).await.unwrap();
        assert_eq!(id, TopicId::new(1).unwrap());
        runner.abort();
    }
}
