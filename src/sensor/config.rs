use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::readings::SensorConfig;
use crate::mqtt::topics::{
    disconnect_topic, error_topic, HUMIDITY_TOPIC, LIGHT_TOPIC, TEMPERATURE_TOPIC, WINDOW_TOPIC,
};

/// One simulated sensor publisher
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PublisherConfig {
    pub name: String,
    /// Broker session identity, must be unique across publishers
    pub client_id: String,
    /// Prefix of the error and last-will topics
    pub prefix: String,
    pub interval_ms: u64,
    pub sensors: Vec<SensorConfig>,
}

impl PublisherConfig {
    pub fn floor() -> Self {
        Self {
            name: "Floor".to_string(),
            client_id: "FloorPublisher".to_string(),
            prefix: "floor".to_string(),
            interval_ms: 1000,
            sensors: vec![
                SensorConfig::binary("light", LIGHT_TOPIC, "ON", "OFF"),
                SensorConfig::binary("window", WINDOW_TOPIC, "OPEN", "CLOSED"),
            ],
        }
    }

    pub fn room() -> Self {
        Self {
            name: "Room".to_string(),
            client_id: "RoomSensorPublisher".to_string(),
            prefix: "room/sensor".to_string(),
            interval_ms: 1000,
            sensors: vec![
                SensorConfig::range("temperature", TEMPERATURE_TOPIC, 18.0, 28.0, 1, "°C"),
                SensorConfig::range("humidity", HUMIDITY_TOPIC, 30.0, 60.0, 0, "%"),
            ],
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn error_topic(&self) -> String {
        error_topic(&self.prefix)
    }

    pub fn disconnect_topic(&self) -> String {
        disconnect_topic(&self.prefix)
    }

    pub fn will_message(&self) -> String {
        format!("{} sensor disconnected", self.name)
    }
}

pub fn default_publishers() -> Vec<PublisherConfig> {
    vec![PublisherConfig::floor(), PublisherConfig::room()]
}
