use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dyn_clone::DynClone;
use parse_display::{Display, FromStr};
use prova_core::{Event, Subject};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Applied when a timeline query does not specify a limit.
pub const DEFAULT_TIMELINE_LIMIT: usize = 50;
/// Hard cap on any timeline page.
pub const MAX_TIMELINE_LIMIT: usize = 500;
/// Applied when a correlation lookup does not specify a limit.
pub const DEFAULT_CORRELATION_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromStr, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Accepted,
    Duplicate,
}

/// Outcome of an ingest call. A `Duplicate` receipt carries the ingestion
/// time of the original event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReceipt {
    pub id: String,
    pub status: IngestStatus,
    pub ingested_at: DateTime<Utc>,
}

/// A distinct `(subject, cluster, namespace)` triple observed in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// Filters for a subject-scoped timeline query.
///
/// The time range is inclusive on both ends. `include_supporting` opts events
/// flagged `supporting_observation=true` back into the result; they are
/// excluded by default. The cursor advances strictly past `(time, id)`.
#[derive(Debug, Clone, Default)]
pub struct TimelineQuery {
    pub subject: Option<Subject>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub ty: Option<String>,
    pub correlation: Option<(String, String)>,
    pub include_supporting: bool,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl TimelineQuery {
    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn include_supporting(mut self) -> Self {
        self.include_supporting = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

#[derive(Debug, Default, Serialize)]
pub struct TimelineResult {
    pub items: Vec<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromStr, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Pending,
    Completed,
    Failed,
}

/// An export job record. Jobs move `pending -> (completed | failed)` exactly
/// once, then stay terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: String,
    pub status: ExportStatus,
    pub format: String,
    pub filter: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// The append-only event store.
///
/// Ingest is linearizable per event id: the first accepted body wins,
/// identical re-deliveries observe `duplicate`, and differing bodies observe
/// [`StoreError::Conflict`] without altering the store.
#[async_trait]
pub trait Repository: DynClone + Send + Sync {
    async fn ingest(&self, event: Event) -> Result<IngestReceipt>;

    async fn get(&self, id: &str) -> Result<Event>;

    async fn query_timeline(&self, query: TimelineQuery) -> Result<TimelineResult>;

    async fn list_subjects(&self) -> Result<Vec<SubjectInfo>>;

    /// Exact-match lookup on `extensions[key]`; `key` is restricted to
    /// `[A-Za-z0-9_-]`. Results are ordered `(time ASC, id ASC)`.
    async fn events_by_extension(&self, key: &str, value: &str, limit: usize)
        -> Result<Vec<Event>>;

    async fn create_export(&self, format: &str, filter: Value) -> Result<ExportJob>;

    async fn set_export_completed(&self, id: &str, artifact_uri: &str) -> Result<()>;

    async fn set_export_failed(&self, id: &str, message: &str) -> Result<()>;

    async fn get_export(&self, id: &str) -> Result<ExportJob>;

    /// Always fails: the store is append-only.
    async fn delete_event(&self, id: &str) -> Result<()>;
}

dyn_clone::clone_trait_object!(Repository);

/// Validates an incoming event and fills its integrity hash.
pub(crate) fn prepare(event: Event) -> Result<Event> {
    event.validate()?;
    Ok(event.ensure_integrity()?)
}

pub(crate) fn clamp_timeline_limit(limit: Option<usize>) -> usize {
    match limit {
        None | Some(0) => DEFAULT_TIMELINE_LIMIT,
        Some(limit) => limit.min(MAX_TIMELINE_LIMIT),
    }
}

pub(crate) fn correlation_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_CORRELATION_LIMIT
    } else {
        limit
    }
}

/// Extension keys may only contain `[A-Za-z0-9_-]`.
pub fn valid_extension_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub(crate) fn check_correlation(key: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(StoreError::InvalidInput(
            "correlation value is required".to_owned(),
        ));
    }
    if !valid_extension_key(key) {
        return Err(StoreError::InvalidInput(format!(
            "invalid extension key `{key}`"
        )));
    }
    Ok(())
}

pub(crate) fn new_export_job(format: &str, filter: Value) -> ExportJob {
    let format = if format.trim().is_empty() {
        "json"
    } else {
        format.trim()
    };
    ExportJob {
        id: format!("exp_{}", Uuid::new_v4().simple()),
        status: ExportStatus::Pending,
        format: format.to_owned(),
        filter,
        artifact_uri: None,
        error: None,
        created_at: Utc::now(),
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_keys_are_restricted() {
        assert!(valid_extension_key("commit_sha"));
        assert!(valid_extension_key("history-id"));
        assert!(valid_extension_key("A1"));
        assert!(!valid_extension_key(""));
        assert!(!valid_extension_key("a.b"));
        assert!(!valid_extension_key("a b"));
        assert!(!valid_extension_key("$.cluster"));
    }

    #[test]
    fn timeline_limit_defaults_and_caps() {
        assert_eq!(clamp_timeline_limit(None), 50);
        assert_eq!(clamp_timeline_limit(Some(0)), 50);
        assert_eq!(clamp_timeline_limit(Some(10)), 10);
        assert_eq!(clamp_timeline_limit(Some(9999)), 500);
    }

    #[test]
    fn export_jobs_default_to_json() {
        let job = new_export_job("  ", Value::Null);
        assert_eq!(job.format, "json");
        assert_eq!(job.status, ExportStatus::Pending);
        assert!(job.id.starts_with("exp_"));
    }
}
