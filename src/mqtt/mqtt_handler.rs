use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::transport::{DeliveryHandler, Session, SessionOptions, Transport, TransportError};

const DEFAULT_PORT: u16 = 1883;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
    Reconnecting,
}

/// Splits `host:port` (optionally prefixed with `tcp://` or `mqtt://`).
/// The port defaults to 1883.
pub fn split_broker_url(url: &str) -> Result<(String, u16), TransportError> {
    let stripped = url
        .trim()
        .trim_start_matches("tcp://")
        .trim_start_matches("mqtt://");
    let server_comps: Vec<&str> = stripped.split(':').collect();
    let server_addr = server_comps.first().copied().unwrap_or_default();
    if server_addr.is_empty() || server_comps.len() > 2 {
        return Err(TransportError::Connection(format!(
            "Invalid broker address: {}",
            url
        )));
    }
    let port = match server_comps.get(1) {
        Some(port) => port.parse().map_err(|e| {
            TransportError::Connection(format!("Invalid broker port in {}: {}", url, e))
        })?,
        None => DEFAULT_PORT,
    };
    Ok((server_addr.to_string(), port))
}

/// Transport backed by a real MQTT broker
#[derive(Debug, Clone)]
pub struct MqttTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    channel_capacity: usize,
}

impl MqttTransport {
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let (host, port) = split_broker_url(url)?;
        Ok(Self {
            host,
            port,
            connect_timeout,
            channel_capacity: 100,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, options: SessionOptions) -> Result<Box<dyn Session>, TransportError> {
        info!(
            "Connecting {} to broker {}",
            options.client_id,
            self.address()
        );

        let mut mqtt_options = MqttOptions::new(options.client_id.clone(), &self.host, self.port);
        mqtt_options
            .set_keep_alive(options.keep_alive)
            .set_clean_session(options.clean_session);
        if let Some(will) = &options.last_will {
            debug!("Registering last will on {}", will.topic);
            mqtt_options.set_last_will(rumqttc::LastWill::new(
                will.topic.clone(),
                will.payload.clone(),
                QoS::AtMostOnce,
                false,
            ));
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, self.channel_capacity);
        let (state_tx, mut state_rx) = watch::channel(ConnectionState::Connecting);
        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let handle = start_event_loop(
            event_loop,
            client.clone(),
            state_tx,
            options.handler.clone(),
            subscriptions.clone(),
            options.qos,
            cancel.clone(),
            options.client_id.clone(),
        );

        let state = match tokio::time::timeout(
            self.connect_timeout,
            state_rx.wait_for(|state| *state != ConnectionState::Connecting),
        )
        .await
        {
            Ok(Ok(state)) => state.clone(),
            Ok(Err(_)) => ConnectionState::Failed("event loop ended".to_string()),
            Err(_) => ConnectionState::Failed(format!(
                "no answer from broker within {:?}",
                self.connect_timeout
            )),
        };

        if state != ConnectionState::Connected {
            cancel.cancel();
            let reason = match state {
                ConnectionState::Failed(reason) => reason,
                other => format!("unexpected state {:?}", other),
            };
            error!(
                "Connection of {} to {} failed: {}",
                options.client_id,
                self.address(),
                reason
            );
            return Err(TransportError::Connection(reason));
        }

        info!("{} connected to {}", options.client_id, self.address());
        Ok(Box::new(MqttSession {
            client_id: options.client_id,
            client,
            qos: options.qos,
            state_rx,
            subscriptions,
            cancel,
            event_loop_handle: Mutex::new(Some(handle)),
        }))
    }
}

pub struct MqttSession {
    client_id: String,
    client: AsyncClient,
    qos: QoS,
    state_rx: watch::Receiver<ConnectionState>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    cancel: CancellationToken,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    fn ensure_usable(&self) -> Result<(), TransportError> {
        match *self.state_rx.borrow() {
            ConnectionState::Connected | ConnectionState::Reconnecting => Ok(()),
            _ => Err(TransportError::NotConnected),
        }
    }
}

#[async_trait]
impl Session for MqttSession {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Connected
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        self.ensure_usable()?;
        self.client
            .publish(topic, self.qos, false, payload.as_bytes())
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        debug!("{} published {} to {}", self.client_id, payload, topic);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_usable()?;
        self.client
            .subscribe(topic, self.qos)
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(topic.to_string());
        debug!("{} subscribed to {}", self.client_id, topic);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| TransportError::Disconnect(e.to_string()));

        let handle = self
            .event_loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!(
                    "Event loop of {} did not finish within {:?}, aborting",
                    self.client_id, DISCONNECT_GRACE
                );
                handle.abort();
            }
        }
        self.cancel.cancel();

        match &result {
            Ok(()) => info!("{} disconnected", self.client_id),
            Err(e) => warn!("{} disconnect was not clean: {}", self.client_id, e),
        }
        result
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        // Dropping without disconnect() leaves the broker to announce the will
        self.cancel.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
fn start_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    state_tx: watch::Sender<ConnectionState>,
    handler: Option<Arc<dyn DeliveryHandler>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    qos: QoS,
    cancel: CancellationToken,
    client_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut was_connected = false;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        state_tx.send_replace(ConnectionState::Failed(format!(
                            "broker refused session: {:?}",
                            ack.code
                        )));
                        break;
                    }
                    if was_connected {
                        info!("{} reconnected, restoring subscriptions", client_id);
                        let topics = subscriptions
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clone();
                        for topic in topics {
                            if let Err(e) = client.try_subscribe(topic.clone(), qos) {
                                error!("Failed to restore subscription {}: {}", topic, e);
                            }
                        }
                    }
                    was_connected = true;
                    state_tx.send_replace(ConnectionState::Connected);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => match &handler {
                    Some(handler) => handler.on_message(&publish.topic, &publish.payload),
                    None => debug!("{} ignoring message on {}", client_id, publish.topic),
                },
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("{} sent disconnect", client_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if !was_connected {
                        state_tx.send_replace(ConnectionState::Failed(e.to_string()));
                        break;
                    }
                    warn!("{} lost connection: {}", client_id, e);
                    state_tx.send_replace(ConnectionState::Reconnecting);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }

        if !matches!(*state_tx.borrow(), ConnectionState::Failed(_)) {
            state_tx.send_replace(ConnectionState::Disconnected);
        }
        debug!("Event loop of {} exited", client_id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_url_with_scheme_and_port() {
        assert_eq!(
            split_broker_url("tcp://broker.hivemq.com:1883").unwrap(),
            ("broker.hivemq.com".to_string(), 1883)
        );
    }

    #[test]
    fn broker_url_without_port_uses_default() {
        assert_eq!(
            split_broker_url("localhost").unwrap(),
            ("localhost".to_string(), DEFAULT_PORT)
        );
    }

    #[test]
    fn broker_url_rejects_garbage() {
        assert!(split_broker_url("").is_err());
        assert!(split_broker_url("host:port").is_err());
        assert!(split_broker_url("a:1:2").is_err());
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_connection_error() {
        // Port 1 on loopback refuses connections on any sane test host
        let transport = MqttTransport::new("127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let result = transport
            .connect(SessionOptions::new("envmonitor-test"))
            .await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }
}
