//! In-process broker
//!
//! Runs the whole publish/subscribe loop inside the process. Used for the
//! offline demo mode and as the transport double in tests: every successful
//! publish is recorded, deliveries run on a dispatch task per subscribing
//! session, and sessions dropped without `disconnect()` announce their last
//! will like a real broker would.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::transport::{LastWill, Session, SessionOptions, Transport, TransportError};

/// Accepted messages kept for inspection, oldest are dropped first
pub const PUBLISH_LOG_CAPACITY: usize = 1024;

struct PublishRecord {
    topic: String,
    payload: String,
}

struct SessionEntry {
    client_id: String,
    filters: HashSet<String>,
    outbox: Option<mpsc::UnboundedSender<(String, String)>>,
}

#[derive(Default)]
struct BrokerInner {
    next_session: u64,
    sessions: HashMap<u64, SessionEntry>,
    published: VecDeque<PublishRecord>,
    accepted: usize,
    attempts: usize,
    takeovers: usize,
    refuse_connects: bool,
    failing_topics: HashSet<String>,
    failing_clients: HashSet<String>,
}

impl BrokerInner {
    fn route(&mut self, client_id: &str, topic: &str, payload: &str) {
        if self.published.len() == PUBLISH_LOG_CAPACITY {
            self.published.pop_front();
        }
        self.published.push_back(PublishRecord {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        self.accepted += 1;
        debug!("Routing {} from {}", topic, client_id);

        for entry in self.sessions.values() {
            if !entry.filters.iter().any(|filter| topic_matches(filter, topic)) {
                continue;
            }
            if let Some(outbox) = &entry.outbox {
                if outbox.send((topic.to_string(), payload.to_string())).is_err() {
                    debug!("Dispatch task of {} already gone", entry.client_id);
                }
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct LocalBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Payloads accepted on one topic, in acceptance order.
    ///
    /// Only the last [`PUBLISH_LOG_CAPACITY`] accepted messages are kept.
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .filter(|record| record.topic == topic)
            .map(|record| record.payload.clone())
            .collect()
    }

    /// Messages accepted since the broker was created
    pub fn publish_count(&self) -> usize {
        self.lock().accepted
    }

    /// Publish calls including rejected ones
    pub fn publish_attempts(&self) -> usize {
        self.lock().attempts
    }

    pub fn connected_clients(&self) -> Vec<String> {
        let mut clients: Vec<String> = self
            .lock()
            .sessions
            .values()
            .map(|entry| entry.client_id.clone())
            .collect();
        clients.sort();
        clients
    }

    pub fn is_client_connected(&self, client_id: &str) -> bool {
        self.lock()
            .sessions
            .values()
            .any(|entry| entry.client_id == client_id)
    }

    /// Sessions that were kicked because the same client id connected again
    pub fn takeovers(&self) -> usize {
        self.lock().takeovers
    }

    pub fn set_refuse_connects(&self, refuse: bool) {
        self.lock().refuse_connects = refuse;
    }

    pub fn fail_publishes_to(&self, topic: &str) {
        self.lock().failing_topics.insert(topic.to_string());
    }

    pub fn fail_publishes_from(&self, client_id: &str) {
        self.lock().failing_clients.insert(client_id.to_string());
    }

    pub fn clear_faults(&self) {
        let mut inner = self.lock();
        inner.refuse_connects = false;
        inner.failing_topics.clear();
        inner.failing_clients.clear();
    }

    /// Publishes on behalf of a client that is not modelled as a session
    pub fn inject(&self, topic: &str, payload: &str) {
        self.lock().route("local-broker", topic, payload);
    }

    fn remove_session(&self, id: u64) -> bool {
        self.lock().sessions.remove(&id).is_some()
    }

    fn announce_will(&self, client_id: &str, will: &LastWill) {
        info!(
            "Client {} vanished, announcing will on {}",
            client_id, will.topic
        );
        self.lock().route(client_id, &will.topic, &will.payload);
    }
}

#[async_trait]
impl Transport for LocalBroker {
    async fn connect(&self, options: SessionOptions) -> Result<Box<dyn Session>, TransportError> {
        let outbox = options.handler.map(|handler| {
            let (tx, mut rx) = mpsc::unbounded_channel::<(String, String)>();
            let client_id = options.client_id.clone();
            tokio::spawn(async move {
                while let Some((topic, payload)) = rx.recv().await {
                    handler.on_message(&topic, payload.as_bytes());
                }
                debug!("Dispatch task of {} finished", client_id);
            });
            tx
        });

        let id = {
            let mut inner = self.lock();
            if inner.refuse_connects {
                return Err(TransportError::Connection(format!(
                    "local broker refused {}",
                    options.client_id
                )));
            }

            let stale: Vec<u64> = inner
                .sessions
                .iter()
                .filter(|(_, entry)| entry.client_id == options.client_id)
                .map(|(id, _)| *id)
                .collect();
            for stale_id in stale {
                warn!(
                    "Client id {} connected twice, dropping the older session",
                    options.client_id
                );
                inner.sessions.remove(&stale_id);
                inner.takeovers += 1;
            }

            inner.next_session += 1;
            let id = inner.next_session;
            inner.sessions.insert(
                id,
                SessionEntry {
                    client_id: options.client_id.clone(),
                    filters: HashSet::new(),
                    outbox,
                },
            );
            id
        };

        debug!("{} connected to local broker", options.client_id);
        Ok(Box::new(LocalSession {
            broker: self.clone(),
            id,
            client_id: options.client_id,
            last_will: options.last_will,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct LocalSession {
    broker: LocalBroker,
    id: u64,
    client_id: String,
    last_will: Option<LastWill>,
    closed: AtomicBool,
}

#[async_trait]
impl Session for LocalSession {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.broker.lock().sessions.contains_key(&self.id)
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        let mut inner = self.broker.lock();
        inner.attempts += 1;
        if self.closed.load(Ordering::SeqCst) || !inner.sessions.contains_key(&self.id) {
            return Err(TransportError::NotConnected);
        }
        if inner.failing_clients.contains(&self.client_id) || inner.failing_topics.contains(topic)
        {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "rejected by local broker".to_string(),
            });
        }
        inner.route(&self.client_id, topic, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut inner = self.broker.lock();
        match inner.sessions.get_mut(&self.id) {
            Some(entry) if !self.closed.load(Ordering::SeqCst) => {
                entry.filters.insert(topic.to_string());
                Ok(())
            }
            _ => Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "session closed".to_string(),
            }),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.broker.remove_session(self.id);
        debug!("{} disconnected from local broker", self.client_id);
        Ok(())
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // A session taken over by a newer one with the same id does not fire its will
        if self.broker.remove_session(self.id) {
            if let Some(will) = &self.last_will {
                self.broker.announce_will(&self.client_id, will);
            }
        }
    }
}

/// MQTT topic filter match with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
