//! Session controller
//!
//! Drives startup in a fixed order and then polls the trigger:
//!
//! ```text
//! Starting ──runner active──▶ Connecting ──connected──▶ Subscribing ──subscribed──▶ Polling
//! ```
//!
//! Any failure before `Polling` is a fatal startup error. In `Polling` the
//! controller checks the [`TriggerSignal`] once per poll interval and, when a
//! command is pending, runs the telemetry cycle inline. Cycle failures are
//! logged and counted; polling continues.
//!
//! # Latency
//! A command delivered right after a poll is acted upon at the next poll, so
//! the delay between delivery and the start of the cycle is bounded by one
//! poll interval plus the duration of a cycle already in progress.
use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{Config, GatewayConfig, SessionConfig};
use crate::contracts::{ConnectOptions, TopicName};
use crate::delivery::CommandListener;
use crate::errors::{Result, TelemetryError};
use crate::gateway::GatewayClient;
use crate::registration::RegistrationRetrier;
use crate::sensor::SensorSource;
use crate::subscriptions::SubscriptionTable;
use crate::telemetry::{CycleReport, TelemetryPublisher};
use crate::trigger::TriggerSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Connecting,
    Subscribing,
    Polling,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Polling => "polling",
        };
        f.write_str(name)
    }
}

/// Counters over all trigger cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Triggers observed by the poll loop
    pub triggers: u64,
    pub published: u64,
    pub aborted: u64,
}

/// Owns the session lifecycle and the control loop
pub struct SessionController<G: GatewayClient, S: SensorSource> {
    gateway: Arc<G>,
    sensor: S,
    gateway_config: GatewayConfig,
    session_config: SessionConfig,
    command_topic: TopicName,
    table: SubscriptionTable,
    trigger: TriggerSignal,
    publisher: TelemetryPublisher,
    state: SessionState,
    runner: Option<JoinHandle<Result<()>>>,
    stats: CycleStats,
}

impl<G: GatewayClient, S: SensorSource> SessionController<G, S> {
    /// Build a controller from validated configuration
    ///
    /// # Errors
    /// Topic names that fail validation.
    pub fn new(gateway: Arc<G>, sensor: S, config: &Config) -> Result<Self> {
        let session_config = config.session.clone();
        let command_topic = session_config.command_topic()?;
        let publisher = TelemetryPublisher::new(
            session_config.telemetry_topic()?,
            RegistrationRetrier::new(session_config.retry_policy()),
        )
        .with_qos(session_config.qos)
        .with_settle_delay(session_config.settle_delay())
        .with_publish_timeout(session_config.request_timeout());

        Ok(Self {
            gateway,
            sensor,
            gateway_config: config.gateway.clone(),
            session_config,
            command_topic,
            table: SubscriptionTable::new(),
            trigger: TriggerSignal::new(),
            publisher,
            state: SessionState::Starting,
            runner: None,
            stats: CycleStats::default(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn trigger(&self) -> &TriggerSignal {
        &self.trigger
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.table
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// Start the session runner, connect and subscribe to the command topic
    ///
    /// # Errors
    /// Every error returned here is fatal: `SessionRunner`, `AddressParse`,
    /// `Connect`, `TableFull` or `Subscribe`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Starting {
            return Err(TelemetryError::InvalidState(format!(
                "start called while {}",
                self.state
            )));
        }

        self.start_runner().await?;
        self.transition(SessionState::Connecting);

        self.connect().await?;
        self.transition(SessionState::Subscribing);

        self.subscribe_command_topic().await?;
        self.transition(SessionState::Polling);
        Ok(())
    }

    async fn start_runner(&mut self) -> Result<()> {
        let gateway = self.gateway.clone();
        let local_port = self.gateway_config.local_port;
        let client_id = self.gateway_config.client_id.clone();
        let runner = tokio::spawn(async move { gateway.run(local_port, &client_id).await });

        // Give the runner a chance to fail fast before declaring it active.
        for _ in 0..4 {
            tokio::task::yield_now().await;
            if runner.is_finished() {
                break;
            }
        }
        if runner.is_finished() {
            let reason = match runner.await {
                Ok(Ok(())) => "runner exited immediately".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            return Err(TelemetryError::SessionRunner(reason));
        }

        info!(local_port, "session runner active");
        self.runner = Some(runner);
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        let endpoint = self.gateway_config.endpoint()?;
        let options = ConnectOptions::clean(self.gateway_config.client_id.clone());
        let limit = self.session_config.request_timeout();

        match timeout(limit, self.gateway.connect(endpoint, &options)).await {
            Ok(Ok(())) => {
                info!(%endpoint, "successfully connected to gateway");
                Ok(())
            }
            Ok(Err(TelemetryError::Connect { endpoint, reason })) => {
                Err(TelemetryError::Connect { endpoint, reason })
            }
            Ok(Err(e)) => Err(TelemetryError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(TelemetryError::Connect {
                endpoint: endpoint.to_string(),
                reason: format!("no CONNACK within {:?}", limit),
            }),
        }
    }

    async fn subscribe_command_topic(&mut self) -> Result<()> {
        let listener = Arc::new(CommandListener::new(
            self.command_topic.clone(),
            self.trigger.clone(),
        ));
        let handle = self.table.allocate(self.command_topic.as_str(), listener)?;
        let subscription = self.table.get(handle).cloned().ok_or_else(|| {
            TelemetryError::InvalidState(format!("slot {} vanished", handle.index()))
        })?;

        let limit = self.session_config.request_timeout();
        let outcome = match timeout(
            limit,
            self.gateway.subscribe(&subscription, self.session_config.qos),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::Timeout {
                operation: "subscribe",
                after: limit,
            }),
        };

        match outcome {
            Ok(id) => {
                self.table.resolve(handle, id)?;
                info!(topic = %self.command_topic, topic_id = %id, slot = handle.index(), "now subscribed");
                Ok(())
            }
            Err(e) => {
                self.table.release(handle);
                Err(TelemetryError::Subscribe {
                    topic: self.command_topic.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// One poll tick: run a telemetry cycle if a command is pending
    ///
    /// Returns `None` when no command was pending. The trigger is cleared
    /// before the cycle runs, so a command delivered during the cycle is
    /// picked up by the next tick.
    pub async fn poll_once(&mut self) -> Option<Result<CycleReport>> {
        if !self.trigger.take() {
            return None;
        }
        self.stats.triggers += 1;
        info!(trigger = self.stats.triggers, "command pending, triggering telemetry cycle");

        let result = self
            .publisher
            .publish_telemetry(self.gateway.as_ref(), &self.sensor)
            .await;

        match &result {
            Ok(report) => {
                self.stats.published += 1;
                debug!(elapsed = ?report.elapsed, "telemetry cycle complete");
            }
            Err(e) => {
                self.stats.aborted += 1;
                warn!(error = %e, class = ?e.class(), "telemetry cycle aborted");
            }
        }
        Some(result)
    }

    /// Poll the trigger until the session runner stops
    ///
    /// Never returns under normal operation.
    ///
    /// # Errors
    /// `InvalidState` if called before [`start`](Self::start) succeeded,
    /// `SessionRunner` once the runner has terminated.
    pub async fn run(&mut self) -> Result<()> {
        if self.state != SessionState::Polling {
            return Err(TelemetryError::InvalidState(format!(
                "run called while {}",
                self.state
            )));
        }

        let interval = self.session_config.poll_interval();
        info!(poll_interval = ?interval, "entering poll loop");

        loop {
            if let Some(err) = self.runner_failure().await {
                error!(error = %err, "session runner terminated");
                return Err(err);
            }
            self.poll_once().await;
            sleep(interval).await;
        }
    }

    async fn runner_failure(&mut self) -> Option<TelemetryError> {
        let finished = self.runner.as_ref().map_or(true, JoinHandle::is_finished);
        if !finished {
            return None;
        }
        let reason = match self.runner.take() {
            Some(runner) => match runner.await {
                Ok(Ok(())) => "runner exited".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            },
            None => "runner not started".to_string(),
        };
        Some(TelemetryError::SessionRunner(reason))
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session state change");
        self.state = next;
    }
}

impl<G: GatewayClient, S: SensorSource> Drop for SessionController<G, S> {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.take() {
            runner.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{Topic, TopicId};
    use crate::gateway::DeliveryHandler;
    use crate::loopback::LoopbackGateway;
    use crate::sensor::SimulatedThermometer;
    use crate::NUMOFSUBS;
    use std::time::Duration;

    struct Noop;

    impl DeliveryHandler for Noop {
        fn on_publication(&self, _topic: &Topic, _payload: &[u8]) {}
    }

    fn controller(gateway: LoopbackGateway) -> SessionController<LoopbackGateway, SimulatedThermometer> {
        controller_with(gateway, Config::default())
    }

    fn controller_with(
        gateway: LoopbackGateway,
        config: Config,
    ) -> SessionController<LoopbackGateway, SimulatedThermometer> {
        let sensor = SimulatedThermometer::new("sim-temp", 2307, 0);
        SessionController::new(Arc::new(gateway), sensor, &config).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_reaches_polling() {
        let mut ctl = controller(LoopbackGateway::new());
        assert_eq!(ctl.state(), SessionState::Starting);

        ctl.start().await.unwrap();

        assert_eq!(ctl.state(), SessionState::Polling);
        assert!(ctl.gateway().is_connected());
        assert!(ctl.gateway().is_running());

        let (slot, sub) = ctl.subscriptions().iter().next().unwrap();
        assert_eq!(slot.index(), 0);
        assert_eq!(sub.topic.name.as_str(), "telegram/data");
        assert_eq!(sub.topic.id, TopicId::new(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let mut ctl = controller(LoopbackGateway::new());
        ctl.start().await.unwrap();
        assert!(matches!(ctl.start().await, Err(TelemetryError::InvalidState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_is_fatal() {
        let gateway = LoopbackGateway::new();
        gateway.refuse_connect(true);
        let mut ctl = controller(gateway);

        let err = ctl.start().await.unwrap_err();

        assert!(matches!(err, TelemetryError::Connect { .. }));
        assert!(err.is_fatal());
        assert_eq!(ctl.state(), SessionState::Connecting);
        assert!(ctl.subscriptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_address_is_fatal() {
        let mut config = Config::default();
        config.gateway.address = "not-an-ip".to_string();
        let mut ctl = controller_with(LoopbackGateway::new(), config);

        let err = ctl.start().await.unwrap_err();
        assert!(matches!(err, TelemetryError::AddressParse { .. }));
        assert!(err.is_fatal());
        assert!(!ctl.gateway().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_table_is_fatal() {
        let mut ctl = controller(LoopbackGateway::new());
        for i in 0..NUMOFSUBS {
            ctl.table.allocate(&format!("pre/{}", i), Arc::new(Noop)).unwrap();
        }

        let err = ctl.start().await.unwrap_err();

        assert!(matches!(err, TelemetryError::TableFull { capacity: NUMOFSUBS }));
        assert!(err.is_fatal());
        assert_eq!(ctl.state(), SessionState::Subscribing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_start_failure_is_fatal() {
        let gateway = Arc::new(LoopbackGateway::new());
        // Claim the inbound queue so the controller's runner cannot start.
        let squatter = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.run(1883, "other").await })
        };
        tokio::task::yield_now().await;

        let sensor = SimulatedThermometer::new("sim-temp", 2307, 0);
        let mut ctl = SessionController::new(gateway, sensor, &Config::default()).unwrap();
        let err = ctl.start().await.unwrap_err();

        assert!(matches!(err, TelemetryError::SessionRunner(_)));
        assert_eq!(ctl.state(), SessionState::Starting);
        squatter.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_without_trigger_does_nothing() {
        let mut ctl = controller(LoopbackGateway::new());
        ctl.start().await.unwrap();

        assert!(ctl.poll_once().await.is_none());
        assert_eq!(ctl.stats(), CycleStats::default());
        assert!(ctl.gateway().published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_clears_trigger_and_publishes() {
        let mut ctl = controller(LoopbackGateway::new());
        ctl.start().await.unwrap();
        ctl.trigger().set();

        let report = ctl.poll_once().await.unwrap().unwrap();

        assert!(!ctl.trigger().is_set());
        assert_eq!(report.payload, r#"{"temperature": 23.07}"#);
        assert_eq!(ctl.stats().triggers, 1);
        assert_eq!(ctl.stats().published, 1);
        assert_eq!(ctl.sensor().reads(), 1);
        assert!(ctl.poll_once().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_failure_keeps_polling() {
        let mut ctl = controller(LoopbackGateway::new());
        ctl.start().await.unwrap();
        ctl.gateway().fail_next_registrations(3);

        ctl.trigger().set();
        let err = ctl.poll_once().await.unwrap().unwrap_err();
        assert!(matches!(err, TelemetryError::RegistrationFailed { .. }));
        assert!(!err.is_fatal());
        assert_eq!(ctl.state(), SessionState::Polling);

        ctl.trigger().set();
        assert!(ctl.poll_once().await.unwrap().is_ok());
        assert_eq!(ctl.stats(), CycleStats { triggers: 2, published: 1, aborted: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_requires_start() {
        let mut ctl = controller(LoopbackGateway::new());
        assert!(matches!(ctl.run().await, Err(TelemetryError::InvalidState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_runner_dies() {
        let mut ctl = controller(LoopbackGateway::new());
        ctl.start().await.unwrap();
        if let Some(runner) = ctl.runner.as_ref() {
            runner.abort();
        }

        let result = tokio::time::timeout(Duration::from_secs(60), ctl.run()).await;
        assert!(matches!(result, Ok(Err(TelemetryError::SessionRunner(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_is_fatal() {
        let gateway = LoopbackGateway::new();
        gateway.stall_connect(true);
        let mut ctl = controller(gateway);

        let started = tokio::time::Instant::now();
        let err = ctl.start().await.unwrap_err();

        assert!(matches!(err, TelemetryError::Connect { .. }));
        assert!(err.is_fatal());
        assert!(started.elapsed() >= crate::REQUEST_TIMEOUT);
        assert_eq!(ctl.state(), SessionState::Connecting);
        assert!(!ctl.gateway().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscribe_releases_slot() {
        let gateway = LoopbackGateway::new();
        gateway.stall_subscribe(true);
        let mut ctl = controller(gateway);

        let started = tokio::time::Instant::now();
        let err = ctl.start().await.unwrap_err();

        assert!(matches!(err, TelemetryError::Subscribe { .. }));
        assert!(err.is_fatal());
        assert!(started.elapsed() >= crate::REQUEST_TIMEOUT);
        assert_eq!(ctl.state(), SessionState::Subscribing);
        assert!(ctl.subscriptions().is_empty());
    }
}
