//! Console front-end
//!
//! The monitor does not render anything itself. This is the presentation
//! layer shipped with the binary: it triggers connect/disconnect through the
//! [`crate::monitor::MonitorHandle`] and prints state changes as they arrive.

pub mod console;

pub use console::{render_state, run_console, ConsoleCommand};
