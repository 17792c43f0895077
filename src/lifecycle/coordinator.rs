use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::mqtt::transport::{SessionOptions, Transport};
use crate::sensor::{run_publisher, PublisherConfig, PublisherExit, RandomReadings, ReadingSource};

/// Builds the reading source for each newly spawned publisher task
pub type SourceFactory = Arc<dyn Fn(&PublisherConfig) -> Box<dyn ReadingSource> + Send + Sync>;

pub fn random_sources() -> SourceFactory {
    Arc::new(|config: &PublisherConfig| {
        Box::new(RandomReadings::new(config.sensors.clone())) as Box<dyn ReadingSource>
    })
}

struct PublisherTask {
    cancel: CancellationToken,
    handle: JoinHandle<PublisherExit>,
}

/// Owns the publisher tasks and starts/stops them together.
///
/// Tasks are keyed by client id. A new task for an identity is only spawned
/// once the previous one has finished, so the broker never sees two sessions
/// with the same identity from this process.
pub struct LifecycleCoordinator {
    transport: Arc<dyn Transport>,
    template: SessionOptions,
    publishers: Vec<PublisherConfig>,
    source_factory: SourceFactory,
    stop_timeout: Duration,
    tasks: HashMap<String, PublisherTask>,
}

impl LifecycleCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        template: SessionOptions,
        publishers: Vec<PublisherConfig>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            template,
            publishers,
            source_factory: random_sources(),
            stop_timeout,
            tasks: HashMap::new(),
        }
    }

    pub fn with_source_factory(mut self, source_factory: SourceFactory) -> Self {
        self.source_factory = source_factory;
        self
    }

    pub fn publishers(&self) -> &[PublisherConfig] {
        &self.publishers
    }

    /// Spawns every configured publisher that has no live task.
    ///
    /// Returns the number of tasks spawned.
    pub fn start_all(&mut self) -> usize {
        let mut spawned = 0;

        for config in &self.publishers {
            if let Some(task) = self.tasks.get(&config.client_id) {
                if !task.handle.is_finished() {
                    warn!(
                        "Publisher {} is still running, not spawning a second task",
                        config.client_id
                    );
                    continue;
                }
            }
            if self.tasks.remove(&config.client_id).is_some() {
                debug!("Reaped finished task of {}", config.client_id);
            }

            let cancel = CancellationToken::new();
            let handle = tokio::spawn(run_publisher(
                config.clone(),
                (self.source_factory)(config),
                self.transport.clone(),
                self.template.clone(),
                cancel.clone(),
            ));
            self.tasks
                .insert(config.client_id.clone(), PublisherTask { cancel, handle });
            info!("Started publisher {} ({})", config.name, config.client_id);
            spawned += 1;
        }

        spawned
    }

    /// Stops every publisher task and waits until all of them are gone.
    ///
    /// All tokens are cancelled before the first join, so every loop observes
    /// the stop at the same time. A task that does not finish within the stop
    /// timeout is aborted.
    pub async fn stop_all(&mut self) -> usize {
        if self.tasks.is_empty() {
            debug!("No publisher tasks to stop");
            return 0;
        }

        let tasks: Vec<(String, PublisherTask)> = self.tasks.drain().collect();
        for (_, task) in &tasks {
            task.cancel.cancel();
        }

        let stopped = tasks.len();
        for (client_id, mut task) in tasks {
            match tokio::time::timeout(self.stop_timeout, &mut task.handle).await {
                Ok(Ok(exit)) => info!("Publisher {} stopped: {:?}", client_id, exit),
                Ok(Err(e)) => error!("Publisher task {} ended abnormally: {}", client_id, e),
                Err(_) => {
                    warn!(
                        "Publisher {} did not stop within {:?}, aborting",
                        client_id, self.stop_timeout
                    );
                    task.handle.abort();
                    let _ = task.handle.await;
                }
            }
        }

        info!("Stopped {} publisher tasks", stopped);
        stopped
    }

    /// Client ids of publisher tasks that are still alive
    pub fn running(&self) -> Vec<String> {
        let mut running: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, task)| !task.handle.is_finished())
            .map(|(client_id, _)| client_id.clone())
            .collect();
        running.sort();
        running
    }

    pub fn is_running(&self, client_id: &str) -> bool {
        self.tasks
            .get(client_id)
            .is_some_and(|task| !task.handle.is_finished())
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        for (client_id, task) in self.tasks.drain() {
            debug!("Dropping coordinator, aborting publisher {}", client_id);
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}
