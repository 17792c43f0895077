//! Monitor Handle - command interface for presentation layers
//!
//! The monitor lives on its own task and is driven through [`MonitorAction`]s.
//! A presentation layer keeps a cheap [`MonitorHandle`], triggers connect and
//! disconnect through it and reads values from the shared [`MonitorState`].
//!
//! ```text
//! UI ─[MonitorAction]→ monitor task ─→ Monitor ─→ LifecycleCoordinator
//!  ▲                                      │
//!  └────────[StateChange broadcast]───────┘
//! ```
//!
//! When the last handle is dropped the task runs the shutdown teardown before
//! it exits, so publisher tasks never outlive the handle.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::monitor::{ConnectOutcome, DisconnectOutcome, Monitor, MonitorError};
use super::state::{MonitorState, StateChange};

macro_rules! respond {
    ($result:expr, $response_tx:expr) => {
        if $response_tx.send($result).is_err() {
            error!("Failed to send monitor response");
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorStatus {
    pub connected: bool,
    pub client_id: Option<String>,
    pub running_publishers: Vec<String>,
}

#[derive(Debug)]
pub enum MonitorAction {
    Connect {
        response_tx: oneshot::Sender<Result<ConnectOutcome, MonitorError>>,
    },
    Disconnect {
        response_tx: oneshot::Sender<DisconnectOutcome>,
    },
    Status {
        response_tx: oneshot::Sender<MonitorStatus>,
    },
    Shutdown {
        response_tx: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorAction>,
    state: MonitorState,
}

impl MonitorHandle {
    /// Moves the monitor onto its own task
    pub fn spawn(monitor: Monitor) -> (Self, JoinHandle<()>) {
        let state = monitor.state().clone();
        let (tx, rx) = mpsc::channel::<MonitorAction>(32);
        let worker_handle = tokio::spawn(run_monitor(monitor, rx));
        info!("Monitor task spawned");
        (Self { tx, state }, worker_handle)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> MonitorAction,
    ) -> Result<T, MonitorError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(build(response_tx))
            .await
            .map_err(|e| MonitorError::Channel(format!("Failed to send action: {}", e)))?;
        response_rx
            .await
            .map_err(|e| MonitorError::Channel(format!("No response from monitor: {}", e)))
    }

    pub async fn connect(&self) -> Result<ConnectOutcome, MonitorError> {
        self.request(|response_tx| MonitorAction::Connect { response_tx })
            .await?
    }

    pub async fn disconnect(&self) -> Result<DisconnectOutcome, MonitorError> {
        self.request(|response_tx| MonitorAction::Disconnect { response_tx })
            .await
    }

    pub async fn status(&self) -> Result<MonitorStatus, MonitorError> {
        self.request(|response_tx| MonitorAction::Status { response_tx })
            .await
    }

    pub async fn shutdown(&self) -> Result<(), MonitorError> {
        self.request(|response_tx| MonitorAction::Shutdown { response_tx })
            .await
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<StateChange> {
        self.state.subscribe_changes()
    }
}

async fn run_monitor(mut monitor: Monitor, mut rx: mpsc::Receiver<MonitorAction>) {
    while let Some(action) = rx.recv().await {
        debug!("Monitor action: {:?}", action);
        match action {
            MonitorAction::Connect { response_tx } => {
                respond!(monitor.connect().await, response_tx);
            }
            MonitorAction::Disconnect { response_tx } => {
                respond!(monitor.disconnect().await, response_tx);
            }
            MonitorAction::Status { response_tx } => {
                let status = MonitorStatus {
                    connected: monitor.is_connected(),
                    client_id: monitor.client_id().map(str::to_string),
                    running_publishers: monitor.coordinator().running(),
                };
                respond!(status, response_tx);
            }
            MonitorAction::Shutdown { response_tx } => {
                monitor.shutdown().await;
                respond!((), response_tx);
                return;
            }
        }
    }

    debug!("All monitor handles dropped");
    monitor.shutdown().await;
}
