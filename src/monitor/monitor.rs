use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::MonitorState;
use crate::lifecycle::{LifecycleCoordinator, SourceFactory};
use crate::mqtt::topics::Topic;
use crate::mqtt::transport::{
    DeliveryHandler, Session, SessionOptions, Transport, TransportError,
};
use crate::sensor::PublisherConfig;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Broker unreachable, session rejected or subscription refused
    #[error("Connection error: {0}")]
    Connection(#[from] TransportError),

    /// The task owning the monitor is gone
    #[error("Monitor channel error: {0}")]
    Channel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
}

impl fmt::Display for ConnectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectOutcome::Connected => write!(f, "Successfully connected to the broker."),
            ConnectOutcome::AlreadyConnected => write!(f, "Already connected to the broker."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected,
    NotConnected,
}

impl fmt::Display for DisconnectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DisconnectOutcome::Disconnected => {
                write!(f, "Successfully disconnected from the broker.")
            }
            DisconnectOutcome::NotConnected => write!(f, "Not currently connected to the broker."),
        }
    }
}

/// Forwards deliveries of one session into the state until the gate closes.
///
/// Messages still queued on the transport side when a session ends are
/// dropped instead of repopulating a freshly reset state.
struct GatedDelivery {
    state: MonitorState,
    gate: CancellationToken,
}

impl DeliveryHandler for GatedDelivery {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        if self.gate.is_cancelled() {
            debug!("Dropping late delivery on {}", topic);
            return;
        }
        self.state.on_message(topic, payload);
    }
}

/// Subscriber side of the demo.
///
/// Holds at most one broker session. Connecting subscribes to every known
/// topic and starts the publishers, disconnecting stops the publishers and
/// unsets every topic.
pub struct Monitor {
    transport: Arc<dyn Transport>,
    template: SessionOptions,
    state: MonitorState,
    session: Option<Box<dyn Session>>,
    delivery_gate: CancellationToken,
    coordinator: LifecycleCoordinator,
}

impl Monitor {
    pub fn new(
        transport: Arc<dyn Transport>,
        template: SessionOptions,
        publishers: Vec<PublisherConfig>,
        stop_timeout: Duration,
    ) -> Self {
        let coordinator = LifecycleCoordinator::new(
            transport.clone(),
            template.clone(),
            publishers,
            stop_timeout,
        );
        Self {
            transport,
            template,
            state: MonitorState::new(),
            session: None,
            delivery_gate: CancellationToken::new(),
            coordinator,
        }
    }

    pub fn with_source_factory(mut self, source_factory: SourceFactory) -> Self {
        self.coordinator = self.coordinator.with_source_factory(source_factory);
        self
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn coordinator(&self) -> &LifecycleCoordinator {
        &self.coordinator
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.is_connected())
    }

    pub fn client_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.client_id())
    }

    pub async fn connect(&mut self) -> Result<ConnectOutcome, MonitorError> {
        if self.is_connected() {
            info!("Already connected to the broker");
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        if let Some(stale) = self.session.take() {
            warn!(
                "Session {} lost its broker link, tearing it down before reconnecting",
                stale.client_id()
            );
            self.delivery_gate.cancel();
            self.coordinator.stop_all().await;
            if let Err(e) = stale.disconnect().await {
                debug!("Stale session did not disconnect cleanly: {}", e);
            }
        }

        // Cleared up front, retained messages may arrive right after subscribing
        self.state.reset();
        let gate = CancellationToken::new();
        let options = SessionOptions {
            client_id: format!("envmonitor-{:08x}", rand::random::<u32>()),
            clean_session: true,
            last_will: None,
            handler: Some(Arc::new(GatedDelivery {
                state: self.state.clone(),
                gate: gate.clone(),
            })),
            ..self.template.clone()
        };
        let session = self.transport.connect(options).await?;

        for topic in Topic::ALL {
            if let Err(e) = session.subscribe(topic.as_str()).await {
                gate.cancel();
                if let Err(teardown) = session.disconnect().await {
                    debug!("Teardown after failed subscribe: {}", teardown);
                }
                self.state.reset();
                return Err(MonitorError::Connection(e));
            }
        }
        info!(
            "Connected to the broker as {}, subscribed to {} topics",
            session.client_id(),
            Topic::ALL.len()
        );

        self.delivery_gate = gate;
        self.session = Some(session);
        let spawned = self.coordinator.start_all();
        debug!("Started {} publishers", spawned);

        Ok(ConnectOutcome::Connected)
    }

    pub async fn disconnect(&mut self) -> DisconnectOutcome {
        let Some(session) = self.session.take() else {
            info!("Not currently connected to the broker");
            return DisconnectOutcome::NotConnected;
        };

        self.coordinator.stop_all().await;
        self.delivery_gate.cancel();
        if let Err(e) = session.disconnect().await {
            warn!("Disconnect of {} was not clean: {}", session.client_id(), e);
        }
        self.state.reset();
        info!("Disconnected from the broker");

        DisconnectOutcome::Disconnected
    }

    /// Teardown for process exit. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if self.disconnect().await == DisconnectOutcome::NotConnected {
            self.coordinator.stop_all().await;
        }
        info!("Monitor shut down");
    }
}
