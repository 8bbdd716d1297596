use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::source::{SourceEvent, SourceEventType};

/// The collector's durable cursor, one entry per application UID.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub apps: HashMap<String, AppCheckpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppCheckpoint {
    #[serde(default)]
    pub last_history_id: i64,
    #[serde(default)]
    pub last_history_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_start_key: String,
    #[serde(default)]
    pub last_terminal_key: String,
    #[serde(default)]
    pub last_health: String,
}

impl AppCheckpoint {
    /// Whether a source event moves past this cursor and should be emitted.
    ///
    /// History-backed events advance on a strictly greater history id (or a
    /// later occurrence at the same id); operation events advance on a new
    /// operation key; health events only when the status actually changed.
    pub fn should_process(&self, event: &SourceEvent) -> bool {
        if event.id.trim().is_empty() {
            return false;
        }
        match event.event_type {
            SourceEventType::DeploymentRecorded | SourceEventType::SyncFinished => {
                if event.history_id > 0 {
                    if event.history_id > self.last_history_id {
                        return true;
                    }
                    return event.history_id == self.last_history_id
                        && self
                            .last_history_at
                            .map_or(true, |last| event.occurred_at > last);
                }
                let key = event.operation_key.trim();
                !key.is_empty() && key != self.last_terminal_key.trim()
            }
            SourceEventType::SyncStarted => {
                let key = event.operation_key.trim();
                !key.is_empty() && key != self.last_start_key.trim()
            }
            SourceEventType::HealthChanged => {
                let health = event.health_status.trim();
                !health.is_empty() && !health.eq_ignore_ascii_case(self.last_health.trim())
            }
        }
    }

    /// Advances the cursor past a successfully ingested event.
    pub fn advance(&mut self, event: &SourceEvent) {
        match event.event_type {
            SourceEventType::DeploymentRecorded | SourceEventType::SyncFinished => {
                if event.history_id > 0 {
                    if event.history_id > self.last_history_id {
                        self.last_history_id = event.history_id;
                    }
                    if self
                        .last_history_at
                        .map_or(true, |last| event.occurred_at > last)
                    {
                        self.last_history_at = Some(event.occurred_at);
                    }
                } else if !event.operation_key.trim().is_empty() {
                    self.last_terminal_key = event.operation_key.trim().to_owned();
                }
            }
            SourceEventType::SyncStarted => {
                if !event.operation_key.trim().is_empty() {
                    self.last_start_key = event.operation_key.trim().to_owned();
                }
            }
            SourceEventType::HealthChanged => {
                if !event.health_status.trim().is_empty() {
                    self.last_health = event.health_status.trim().to_owned();
                }
            }
        }
    }
}

/// Durable byte store for the collector checkpoint, independent of the event
/// repository.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<Checkpoint>;
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Stores the checkpoint as a JSON file, creating parent directories on
/// first save. A missing file loads as an empty checkpoint (first run).
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Checkpoint> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Checkpoint::default())
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}
