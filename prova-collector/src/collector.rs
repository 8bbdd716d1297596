use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use prova_store::Repository;
use tokio::sync::oneshot;

use crate::application::Application;
use crate::checkpoint::{AppCheckpoint, Checkpoint, CheckpointStore};
use crate::normalize::normalize;
use crate::source::source_events;

/// Stream of application updates for watch mode.
pub type ApplicationStream = BoxStream<'static, Application>;

/// Client used by the polling fallback to fetch the controller's current
/// application list.
#[async_trait]
pub trait ControllerClient: Send + Sync + 'static {
    async fn list_applications(&self) -> anyhow::Result<Vec<Application>>;
}

/// Observes controller applications and sinks deterministic canonical events
/// into the repository.
///
/// Failures never escape the collector: a failing application update is
/// logged and skipped, and a failing checkpoint save is retried on the next
/// advance.
pub struct Collector {
    sink: Box<dyn Repository>,
    checkpoint: Box<dyn CheckpointStore>,
    default_environment: String,
    cursors: HashMap<String, AppCheckpoint>,
}

impl Collector {
    pub fn new(sink: Box<dyn Repository>, checkpoint: Box<dyn CheckpointStore>) -> Self {
        Self {
            sink,
            checkpoint,
            default_environment: String::new(),
            cursors: HashMap::new(),
        }
    }

    /// Environment to stamp on events whose application has no destination
    /// namespace.
    pub fn default_environment(mut self, environment: impl Into<String>) -> Self {
        self.default_environment = environment.into();
        self
    }

    /// Loads the persisted checkpoint; a missing checkpoint is a first run.
    pub async fn load_checkpoint(&mut self) {
        match self.checkpoint.load().await {
            Ok(checkpoint) => self.cursors = checkpoint.apps,
            Err(err) => {
                tracing::error!(error = %err, "checkpoint load failed, starting empty");
            }
        }
    }

    /// Processes one application update: derives its source events, skips
    /// everything the checkpoint already covers, ingests the rest, and
    /// advances the cursor after each successful ingest.
    pub async fn observe(&mut self, app: &Application) {
        let mut advanced = false;

        for source in source_events(app) {
            let cursor = self.cursors.entry(source.app_key().to_owned()).or_default();
            if !cursor.should_process(&source) {
                continue;
            }

            let event = match normalize(&source, &self.default_environment) {
                Ok(event) => event,
                Err(err) => {
                    tracing::error!(error = %err, app = %source.app, "normalize failed");
                    return;
                }
            };

            if let Err(err) = self.sink.ingest(event).await {
                tracing::error!(error = %err, app = %source.app, "ingest failed");
                return;
            }

            cursor.advance(&source);
            advanced = true;
        }

        if advanced {
            self.save_checkpoint().await;
        }
    }

    /// Persists the checkpoint; save failures are logged, the in-memory
    /// cursor stays authoritative and the next advance retries.
    pub async fn save_checkpoint(&self) {
        let checkpoint = Checkpoint {
            apps: self.cursors.clone(),
        };
        if let Err(err) = self.checkpoint.save(&checkpoint).await {
            tracing::error!(error = %err, "checkpoint save failed");
        }
    }

    /// Drives a subscribed stream of application updates. Preferred over
    /// polling; every update runs through [`Collector::observe`].
    pub fn start_watch(mut self, mut stream: ApplicationStream) -> CollectorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            self.load_checkpoint().await;
            tracing::info!("collector watching application updates");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    update = stream.next() => match update {
                        Some(app) => self.observe(&app).await,
                        None => {
                            tracing::info!("application stream ended");
                            break;
                        }
                    },
                }
            }

            self.save_checkpoint().await;
        });

        CollectorHandle { task, shutdown_tx }
    }

    /// Polling fallback: fetches the application list at a fixed interval and
    /// is idle in between.
    pub fn start_polling<C: ControllerClient>(
        mut self,
        client: C,
        interval: Duration,
    ) -> CollectorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            self.load_checkpoint().await;
            tracing::info!(interval = ?interval, "collector polling controller");

            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match client.list_applications().await {
                            Ok(apps) => {
                                for app in &apps {
                                    self.observe(app).await;
                                }
                            }
                            Err(err) => {
                                tracing::error!(error = %err, "controller fetch failed");
                            }
                        }
                    }
                }
            }

            self.save_checkpoint().await;
        });

        CollectorHandle { task, shutdown_tx }
    }
}

/// Handle to a running collector task.
pub struct CollectorHandle {
    task: tokio::task::JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

impl CollectorHandle {
    /// Signals the collector to stop and waits for it to persist its
    /// checkpoint and exit.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.shutdown_tx.send(());
        self.task.await
    }
}
