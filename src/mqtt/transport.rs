//! Transport abstraction shared by the monitor and the sensor publishers
//!
//! A [`Transport`] opens [`Session`]s against a broker. Incoming messages of a
//! session are handed to its [`DeliveryHandler`] on a task owned by the
//! transport, one message at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::QoS;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Broker unreachable, session rejected or handshake timed out
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Disconnect failed: {0}")]
    Disconnect(String),

    #[error("Session is not connected")]
    NotConnected,
}

/// Receives messages delivered on a subscribed session.
///
/// Called from a transport task, so implementations must not block for long
/// and must never panic on unexpected input.
pub trait DeliveryHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}

/// Message the broker publishes on behalf of a client that vanished without
/// a clean disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
}

/// Parameters for opening one session
#[derive(Clone)]
pub struct SessionOptions {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub qos: QoS,
    pub last_will: Option<LastWill>,
    pub handler: Option<Arc<dyn DeliveryHandler>>,
}

impl SessionOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session: true,
            keep_alive: Duration::from_secs(5),
            qos: QoS::AtLeastOnce,
            last_will: None,
            handler: None,
        }
    }

    pub fn with_last_will(mut self, topic: impl Into<String>, payload: impl Into<String>) -> Self {
        self.last_will = Some(LastWill {
            topic: topic.into(),
            payload: payload.into(),
        });
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn DeliveryHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("client_id", &self.client_id)
            .field("clean_session", &self.clean_session)
            .field("keep_alive", &self.keep_alive)
            .field("qos", &self.qos)
            .field("last_will", &self.last_will)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a new session. Returns once the broker accepted it.
    async fn connect(&self, options: SessionOptions) -> Result<Box<dyn Session>, TransportError>;
}

#[async_trait]
pub trait Session: Send + Sync {
    fn client_id(&self) -> &str;

    fn is_connected(&self) -> bool;

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Clean disconnect. The last will is not announced.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
