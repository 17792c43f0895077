//! Latest reading per known topic
//!
//! Written by the transport's delivery task, read by whatever presents the
//! values. Each update replaces one key under the write lock and is then
//! announced on a broadcast channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Local};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::mqtt::topics::Topic;
use crate::mqtt::transport::DeliveryHandler;

const CHANGE_CHANNEL_CAPACITY: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reading {
    pub payload: String,
    pub received_at: DateTime<Local>,
}

impl Reading {
    pub fn now(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            received_at: Local::now(),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.payload,
            self.received_at.format("%H:%M:%S")
        )
    }
}

/// Notification sent for every update and for every reset of a topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub topic: Topic,
    pub reading: Option<Reading>,
}

/// Shared handle to the monitor's state map. Clones share the same map.
#[derive(Clone)]
pub struct MonitorState {
    readings: Arc<RwLock<HashMap<Topic, Option<Reading>>>>,
    changes: broadcast::Sender<StateChange>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorState {
    pub fn new() -> Self {
        let readings = Topic::ALL.iter().map(|topic| (*topic, None)).collect();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            readings: Arc::new(RwLock::new(readings)),
            changes,
        }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Overwrites the value of one topic
    pub fn update(&self, topic: Topic, reading: Reading) {
        self.readings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic, Some(reading.clone()));
        self.notify(topic, Some(reading));
    }

    /// Unsets every known topic
    pub fn reset(&self) {
        {
            let mut readings = self
                .readings
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for value in readings.values_mut() {
                *value = None;
            }
        }
        for topic in Topic::ALL {
            self.notify(topic, None);
        }
    }

    pub fn reading(&self, topic: Topic) -> Option<Reading> {
        self.readings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .cloned()
            .flatten()
    }

    pub fn payload(&self, topic: Topic) -> Option<String> {
        self.reading(topic).map(|reading| reading.payload)
    }

    /// Copy of the whole map, always containing all known topics
    pub fn snapshot(&self) -> HashMap<Topic, Option<Reading>> {
        self.readings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.readings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .all(Option::is_none)
    }

    fn notify(&self, topic: Topic, reading: Option<Reading>) {
        // No receiver is fine, nobody is looking at the values right now
        let _ = self.changes.send(StateChange { topic, reading });
    }
}

impl DeliveryHandler for MonitorState {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        match topic.parse::<Topic>() {
            Ok(known) => {
                let payload = String::from_utf8_lossy(payload).into_owned();
                debug!("Received {} on {}", payload, known);
                self.update(known, Reading::now(payload));
            }
            Err(e) => warn!("Received message for unknown topic: {}", e.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_every_topic_unset() {
        let state = MonitorState::new();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.len(), Topic::ALL.len());
        assert!(snapshot.values().all(Option::is_none));
        assert!(state.is_empty());
    }

    #[test]
    fn last_delivery_per_topic_wins() {
        let state = MonitorState::new();
        let deliveries = [
            ("floor/light/ID", "ON"),
            ("floor/window/status", "OPEN"),
            ("floor/room/temperature", "21.5°C"),
            ("floor/light/ID", "OFF"),
            ("floor/room/temperature", "22.0°C"),
            ("floor/window/status", "CLOSED"),
        ];
        for (topic, payload) in deliveries {
            state.on_message(topic, payload.as_bytes());
        }

        assert_eq!(state.payload(Topic::Light).as_deref(), Some("OFF"));
        assert_eq!(state.payload(Topic::Window).as_deref(), Some("CLOSED"));
        assert_eq!(state.payload(Topic::Temperature).as_deref(), Some("22.0°C"));
        assert_eq!(state.payload(Topic::Humidity), None);
    }

    #[test]
    fn random_delivery_sequences_keep_last_payload_per_topic() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        const UNKNOWN: [&str; 3] = ["floor/door/status", "floor/light", "room/sensor/error"];
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..200 {
            let state = MonitorState::new();
            let mut expected: HashMap<Topic, String> = HashMap::new();

            let length = rng.random_range(0..60);
            for n in 0..length {
                let payload = format!("v{}-{}", n, rng.random_range(0..1000));
                if rng.random_bool(0.2) {
                    let topic = UNKNOWN[rng.random_range(0..UNKNOWN.len())];
                    state.on_message(topic, payload.as_bytes());
                } else {
                    let topic = Topic::ALL[rng.random_range(0..Topic::ALL.len())];
                    state.on_message(topic.as_str(), payload.as_bytes());
                    expected.insert(topic, payload);
                }
            }

            let actual: HashMap<Topic, Option<String>> = state
                .snapshot()
                .into_iter()
                .map(|(topic, reading)| (topic, reading.map(|r| r.payload)))
                .collect();
            assert_eq!(actual.len(), Topic::ALL.len());
            for topic in Topic::ALL {
                assert_eq!(actual[&topic], expected.get(&topic).cloned(), "{}", topic);
            }
        }
    }

    #[test]
    fn unknown_topic_leaves_state_untouched() {
        let state = MonitorState::new();
        state.on_message("floor/light/ID", b"ON");
        let before = state.snapshot();

        state.on_message("floor/door/status", b"OPEN");
        state.on_message("", b"");

        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn non_utf8_payload_is_kept_lossy() {
        let state = MonitorState::new();
        state.on_message("floor/room/humidity", &[0x34, 0x32, 0xff]);
        assert_eq!(
            state.payload(Topic::Humidity).as_deref(),
            Some("42\u{fffd}")
        );
    }

    #[test]
    fn reset_clears_all_and_notifies() {
        let state = MonitorState::new();
        let mut changes = state.subscribe_changes();
        state.on_message("floor/light/ID", b"ON");
        state.reset();

        assert!(state.is_empty());
        let first = changes.try_recv().unwrap();
        assert_eq!(first.topic, Topic::Light);
        assert_eq!(first.reading.map(|r| r.payload).as_deref(), Some("ON"));
        for _ in Topic::ALL {
            assert_eq!(changes.try_recv().unwrap().reading, None);
        }
    }

    #[test]
    fn concurrent_writers_keep_one_value_per_topic() {
        let state = MonitorState::new();
        let threads: Vec<_> = (0..4)
            .map(|n| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        state.on_message("floor/room/temperature", format!("{}-{}", n, i).as_bytes());
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let last = state.payload(Topic::Temperature).unwrap();
        assert!(last.ends_with("-99"), "unexpected final value {}", last);
    }
}
