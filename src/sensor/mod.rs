//! Simulated sensors
//!
//! A sensor publisher owns one broker session and pushes one reading per
//! configured sensor every interval until its cancellation token fires.

pub mod config;
pub mod publisher;
pub mod readings;

pub use config::{default_publishers, PublisherConfig};
pub use publisher::{run_publisher, PublisherError, PublisherExit, SensorPublisher};
pub use readings::{
    RandomReadings, ReadingSource, ScriptedReadings, SensorConfig, SensorKind, SensorReading,
};
