//! # envmonitor
//!
//! Environment monitoring demo: simulated sensors publish readings over MQTT
//! and a monitor keeps the latest value per topic.
//!
//! ```text
//! sensor publishers ──► broker ──► Monitor delivery task ──► MonitorState ──► UI
//!        ▲                                                                  │
//!        └──────── LifecycleCoordinator ◄── Monitor ◄── MonitorHandle ◄─────┘
//! ```
//!
//! Publishers only run while the monitor is connected. Connecting starts
//! them, disconnecting or shutting down stops them and waits until every
//! publisher task is gone.

pub mod config;
pub mod lifecycle;
pub mod monitor;
pub mod mqtt;
pub mod sensor;
pub mod ui;

pub use config::{ConfigError, EnvMonitorConfig};
pub use monitor::{ConnectOutcome, DisconnectOutcome, Monitor, MonitorError, MonitorHandle};
