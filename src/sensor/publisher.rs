//! Sensor publisher with statum state machine
//!
//! ```text
//! Idle ──connect──► Running ──cancel / publish failure──► Stopped ──close──► (session released)
//! ```
//!
//! Every start builds a fresh `Idle` publisher, so a restart always opens a
//! new session instead of reusing a stale one.

use std::sync::Arc;

use statum::{machine, state};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::PublisherConfig;
use super::readings::ReadingSource;
use crate::mqtt::transport::{Session, SessionOptions, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("Failed to connect {client_id}: {source}")]
    Connect {
        client_id: String,
        #[source]
        source: TransportError,
    },

    #[error("{0}")]
    Publish(#[from] TransportError),
}

/// Why a publisher task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherExit {
    Cancelled,
    PublishFailed(String),
    ConnectFailed(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum PublisherState {
    Idle,
    Running,
    Stopped,
}

#[machine]
pub struct SensorPublisher<S: PublisherState> {
    config: PublisherConfig,
    source: Box<dyn ReadingSource>,
    session: Option<Box<dyn Session>>,
    cycles: u64,
}

impl SensorPublisher<Idle> {
    pub fn create(config: PublisherConfig, source: Box<dyn ReadingSource>) -> Self {
        debug!("Creating sensor publisher {}", config.name);
        Self::new(config, source, None, 0)
    }

    /// Opens a fresh session with the publisher's last will registered.
    ///
    /// `template` carries the broker-wide settings; identity and will are
    /// filled in from the publisher config.
    pub async fn connect(
        mut self,
        transport: &dyn Transport,
        template: &SessionOptions,
    ) -> Result<SensorPublisher<Running>, PublisherError> {
        let options = SessionOptions {
            client_id: self.config.client_id.clone(),
            handler: None,
            ..template.clone()
        }
        .with_last_will(self.config.disconnect_topic(), self.config.will_message());

        let session =
            transport
                .connect(options)
                .await
                .map_err(|source| PublisherError::Connect {
                    client_id: self.config.client_id.clone(),
                    source,
                })?;

        info!(
            "Sensor publisher {} connected as {}",
            self.config.name, self.config.client_id
        );
        self.session = Some(session);
        Ok(self.transition())
    }
}

impl SensorPublisher<Running> {
    async fn publish_cycle(&mut self, cancel: &CancellationToken) -> Result<(), PublisherError> {
        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;

        for reading in self.source.next_cycle() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            session.publish(&reading.topic, &reading.payload).await?;
            debug!(
                "Published message: {} to {}",
                reading.payload, reading.topic
            );
        }
        self.cycles += 1;
        Ok(())
    }

    /// Best-effort report on the error topic. A failure here is logged and swallowed.
    async fn report(&mut self, message: &str) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let topic = self.config.error_topic();
        match session.publish(&topic, message).await {
            Ok(()) => info!("Reported '{}' of {} on {}", message, self.config.name, topic),
            Err(e) => error!(
                "Failed to report error of {} on {}: {}",
                self.config.name, topic, e
            ),
        }
    }

    /// Publishes one cycle per interval until `cancel` fires or a publish fails.
    ///
    /// The sleep between cycles is interrupted by the token, so a stop is
    /// observed immediately rather than after the interval elapsed. Either
    /// way the loop ends with one report on the error topic.
    pub async fn run_until_cancelled(
        mut self,
        cancel: CancellationToken,
    ) -> (SensorPublisher<Stopped>, PublisherExit) {
        let interval = self.config.interval();
        info!(
            "Starting publish loop for {} every {:?}",
            self.config.name, interval
        );

        let exit = loop {
            if cancel.is_cancelled() {
                break PublisherExit::Cancelled;
            }

            if let Err(e) = self.publish_cycle(&cancel).await {
                error!("Publisher {} failed: {}", self.config.name, e);
                self.report(&e.to_string()).await;
                break PublisherExit::PublishFailed(e.to_string());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break PublisherExit::Cancelled,
                _ = tokio::time::sleep(interval) => {}
            }
        };

        if exit == PublisherExit::Cancelled {
            let message = format!("{} publisher stopped", self.config.name);
            self.report(&message).await;
        }

        info!(
            "Publish loop of {} ended after {} cycles: {:?}",
            self.config.name, self.cycles, exit
        );
        (self.transition(), exit)
    }
}

impl SensorPublisher<Stopped> {
    /// Releases the session with a clean disconnect
    pub async fn close(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.disconnect().await {
                warn!("Publisher {} did not disconnect cleanly: {}", self.config.name, e);
            }
        }
        debug!("Sensor publisher {} closed", self.config.name);
    }
}

/// Full publisher lifecycle as run by one coordinator task
pub async fn run_publisher(
    config: PublisherConfig,
    source: Box<dyn ReadingSource>,
    transport: Arc<dyn Transport>,
    template: SessionOptions,
    cancel: CancellationToken,
) -> PublisherExit {
    let name = config.name.clone();
    let idle = SensorPublisher::create(config, source);

    let running = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Publisher {} cancelled before it connected", name);
            return PublisherExit::Cancelled;
        }
        result = idle.connect(transport.as_ref(), &template) => match result {
            Ok(running) => running,
            Err(e) => {
                error!("{}", e);
                return PublisherExit::ConnectFailed(e.to_string());
            }
        },
    };

    let (stopped, exit) = running.run_until_cancelled(cancel).await;
    stopped.close().await;
    exit
}
