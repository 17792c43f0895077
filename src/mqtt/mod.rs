//! # MQTT Transport Module
//!
//! Everything that talks to a broker lives here. The rest of the crate only
//! sees the [`transport::Transport`] and [`transport::Session`] traits, so the
//! monitor and the sensor publishers run unchanged against a real broker or
//! against the in-process [`local_broker::LocalBroker`].
//!
//! ```text
//! mqtt/
//! ├── topics.rs        - Known topic set and per-publisher meta topics
//! ├── transport.rs     - Transport/Session traits, options, errors
//! ├── mqtt_handler.rs  - rumqttc backed transport with its event loop task
//! └── local_broker.rs  - In-process broker for offline mode and tests
//! ```
//!
//! ## Delivery model
//!
//! Each subscribing session owns one task that hands incoming messages to its
//! [`transport::DeliveryHandler`] in arrival order. No ordering is promised
//! across topics or across reconnects.

pub mod local_broker;
pub mod mqtt_handler;
pub mod topics;
pub mod transport;

pub use local_broker::LocalBroker;
pub use mqtt_handler::MqttTransport;
pub use topics::{Topic, UnknownTopic};
pub use transport::{DeliveryHandler, LastWill, Session, SessionOptions, Transport, TransportError};
