//! Known measurement topics
//!
//! The monitor only tracks a fixed set of streams. Everything else arriving on
//! the subscription is treated as an unknown topic and ignored by the state map.

use std::fmt;
use std::str::FromStr;

pub const TEMPERATURE_TOPIC: &str = "floor/room/temperature";
pub const HUMIDITY_TOPIC: &str = "floor/room/humidity";
pub const LIGHT_TOPIC: &str = "floor/light/ID";
pub const WINDOW_TOPIC: &str = "floor/window/status";

/// A measurement stream the monitor keeps the latest value for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Temperature,
    Humidity,
    Light,
    Window,
}

impl Topic {
    /// Subscription set of the monitor, in display order
    pub const ALL: [Topic; 4] = [
        Topic::Temperature,
        Topic::Humidity,
        Topic::Light,
        Topic::Window,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Temperature => TEMPERATURE_TOPIC,
            Topic::Humidity => HUMIDITY_TOPIC,
            Topic::Light => LIGHT_TOPIC,
            Topic::Window => WINDOW_TOPIC,
        }
    }

    /// Human readable label used by the console output
    pub fn label(&self) -> &'static str {
        match self {
            Topic::Temperature => "Temperature",
            Topic::Humidity => "Humidity",
            Topic::Light => "Light Status",
            Topic::Window => "Window Status",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned when a topic string is not part of the known set.
///
/// This is an expected condition on the delivery path and is never escalated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown topic: {0}")]
pub struct UnknownTopic(pub String);

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            TEMPERATURE_TOPIC => Ok(Topic::Temperature),
            HUMIDITY_TOPIC => Ok(Topic::Humidity),
            LIGHT_TOPIC => Ok(Topic::Light),
            WINDOW_TOPIC => Ok(Topic::Window),
            other => Err(UnknownTopic(other.to_string())),
        }
    }
}

/// Topic a publisher reports loop failures on
pub fn error_topic(prefix: &str) -> String {
    format!("{}/error", prefix.trim_end_matches('/'))
}

/// Last-will topic announced by the broker when a publisher drops uncleanly
pub fn disconnect_topic(prefix: &str) -> String {
    format!("{}/disconnect", prefix.trim_end_matches('/'))
}
