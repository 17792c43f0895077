//! Publisher lifecycle
//!
//! Publishers rise and fall with the monitor's broker connection. The
//! coordinator is the only owner of publisher tasks and their cancellation
//! tokens; nothing else can start or stop a publisher.

pub mod coordinator;

pub use coordinator::{random_sources, LifecycleCoordinator, SourceFactory};
