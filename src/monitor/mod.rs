//! Subscriber side: latest-value state map, the monitor owning the broker
//! session, and the handle presentation layers drive it through.

pub mod monitor;
pub mod monitor_handle;
pub mod state;

pub use monitor::{ConnectOutcome, DisconnectOutcome, Monitor, MonitorError};
pub use monitor_handle::{MonitorAction, MonitorHandle, MonitorStatus};
pub use state::{MonitorState, Reading, StateChange};
