use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde_json::{Map, Value};

use crate::application::{Application, HistoryEntry};

/// Producer identifier stamped on every collector event.
pub const SOURCE: &str = "gitops";

/// History entries within this window of a terminal operation on the same
/// revision are suppressed; the terminal operation event represents that
/// deployment.
const OVERLAP_JITTER_SECONDS: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromStr)]
pub enum SourceEventType {
    #[display("deployment.recorded")]
    DeploymentRecorded,
    #[display("sync.started")]
    SyncStarted,
    #[display("sync.finished")]
    SyncFinished,
    #[display("health.changed")]
    HealthChanged,
}

/// A per-operation observation extracted from controller state, before
/// normalization into a canonical event.
///
/// The `id` is deterministic: re-deriving events from the same controller
/// state always yields the same identities, so the repository's idempotent
/// ingest absorbs replays.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub id: String,
    pub app_uid: String,
    pub app: String,
    pub cluster: String,
    pub namespace: String,
    pub revision: String,
    pub occurred_at: DateTime<Utc>,
    pub actor: String,
    pub event_type: SourceEventType,
    pub result: String,
    pub health_status: String,
    pub history_id: i64,
    pub operation_key: String,
    pub payload: Map<String, Value>,
}

impl SourceEvent {
    /// Checkpoints are keyed by the application UID, falling back to the name
    /// for controllers that do not expose one.
    pub fn app_key(&self) -> &str {
        let uid = self.app_uid.trim();
        if uid.is_empty() {
            self.app.trim()
        } else {
            uid
        }
    }
}

/// Derives the durable source events for one application snapshot:
/// `deployment.recorded` per history entry, the current operation's
/// `sync.started` / `sync.finished`, and the application-level health as
/// `health.changed`.
pub fn source_events(app: &Application) -> Vec<SourceEvent> {
    let mut out = Vec::with_capacity(app.history.len() + 2);

    let app_uid = app.uid.trim().to_owned();
    let app_name = app.name.trim().to_owned();
    let revision = app.sync_revision.trim().to_owned();
    let cluster = non_empty(app.dest_cluster.trim(), "unknown");
    let namespace = app.namespace.trim().to_owned();
    let actor = app.actor();
    let annotations = app.vendor_annotations();
    let terminal = terminal_operation_window(app, &revision);

    for entry in &app.history {
        let occurred = history_occurred_at(entry, app);
        let entry_revision = non_empty(entry.revision.trim(), &revision);
        if let Some((terminal_revision, started, finished)) = &terminal {
            if same_revision_window(&entry_revision, terminal_revision, occurred, *started, *finished)
            {
                continue;
            }
        }

        let mut payload = Map::new();
        payload.insert("history_id".to_owned(), Value::from(entry.id));
        payload.insert("sync_revision".to_owned(), Value::from(entry_revision.clone()));
        insert_annotations(&mut payload, &annotations);

        out.push(SourceEvent {
            id: history_event_id(&app_uid, entry.id, &entry_revision, occurred),
            app_uid: app_uid.clone(),
            app: app_name.clone(),
            cluster: cluster.clone(),
            namespace: namespace.clone(),
            revision: entry_revision.clone(),
            occurred_at: occurred,
            actor: actor.clone(),
            event_type: SourceEventType::DeploymentRecorded,
            result: "Recorded".to_owned(),
            health_status: String::new(),
            history_id: entry.id,
            operation_key: history_operation_key(entry.id, &entry_revision, occurred),
            payload,
        });
    }

    if let Some(operation) = &app.operation {
        let phase = operation.phase;
        let started_at = operation.started_at;
        let finished_at = operation
            .finished_at
            .or(started_at)
            .unwrap_or_else(|| app.most_recent_time());
        let op_key = operation_key(&revision, started_at, operation.finished_at);

        let mut payload = Map::new();
        payload.insert("operation_phase".to_owned(), Value::from(phase.to_string()));
        insert_annotations(&mut payload, &annotations);

        if phase.is_terminal() {
            out.push(SourceEvent {
                id: operation_event_id(&app_uid, &op_key, "finish"),
                app_uid: app_uid.clone(),
                app: app_name.clone(),
                cluster: cluster.clone(),
                namespace: namespace.clone(),
                revision: revision.clone(),
                occurred_at: finished_at,
                actor: actor.clone(),
                event_type: SourceEventType::SyncFinished,
                result: phase.to_string(),
                health_status: String::new(),
                history_id: 0,
                operation_key: op_key,
                payload,
            });
        } else if let Some(started_at) = started_at {
            out.push(SourceEvent {
                id: operation_event_id(&app_uid, &op_key, "start"),
                app_uid: app_uid.clone(),
                app: app_name.clone(),
                cluster: cluster.clone(),
                namespace: namespace.clone(),
                revision: revision.clone(),
                occurred_at: started_at,
                actor: actor.clone(),
                event_type: SourceEventType::SyncStarted,
                result: phase.to_string(),
                health_status: String::new(),
                history_id: 0,
                operation_key: op_key,
                payload,
            });
        }
    }

    let health = app.health.trim();
    if !health.is_empty() {
        let occurred = app.reconciled_at.unwrap_or_else(Utc::now);

        let mut payload = Map::new();
        payload.insert("health_status".to_owned(), Value::from(health));
        payload.insert(
            "observed_at".to_owned(),
            Value::from(prova_core::rfc3339_nanos(occurred)),
        );
        insert_annotations(&mut payload, &annotations);

        out.push(SourceEvent {
            id: health_event_id(&app_uid, health, occurred),
            app_uid: app_uid.clone(),
            app: app_name.clone(),
            cluster,
            namespace,
            revision,
            occurred_at: occurred,
            actor: "gitops".to_owned(),
            event_type: SourceEventType::HealthChanged,
            result: String::new(),
            health_status: health.to_owned(),
            history_id: 0,
            operation_key: String::new(),
            payload,
        });
    }

    out
}

fn insert_annotations(payload: &mut Map<String, Value>, annotations: &std::collections::BTreeMap<String, String>) {
    if annotations.is_empty() {
        return;
    }
    payload.insert(
        "annotations".to_owned(),
        Value::Object(
            annotations
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                .collect(),
        ),
    );
}

fn history_occurred_at(entry: &HistoryEntry, app: &Application) -> DateTime<Utc> {
    entry
        .deployed_at
        .or(entry.deploy_started_at)
        .unwrap_or_else(|| app.most_recent_time())
}

fn terminal_operation_window(
    app: &Application,
    revision: &str,
) -> Option<(String, DateTime<Utc>, DateTime<Utc>)> {
    let operation = app.operation.as_ref()?;
    if !operation.phase.is_terminal() {
        return None;
    }
    let started = operation.started_at?;
    let finished = operation.finished_at.unwrap_or(started);
    Some((revision.trim().to_owned(), started, finished))
}

fn same_revision_window(
    history_revision: &str,
    terminal_revision: &str,
    history_occurred: DateTime<Utc>,
    terminal_started: DateTime<Utc>,
    terminal_finished: DateTime<Utc>,
) -> bool {
    if history_revision.is_empty() || terminal_revision.is_empty() {
        return false;
    }
    if history_revision != terminal_revision {
        return false;
    }
    let jitter = chrono::Duration::seconds(OVERLAP_JITTER_SECONDS);
    let start = terminal_started - jitter;
    let end = terminal_finished + jitter;
    history_occurred >= start && history_occurred <= end
}

pub fn history_event_id(
    app_uid: &str,
    history_id: i64,
    revision: &str,
    occurred: DateTime<Utc>,
) -> String {
    if history_id > 0 {
        format!("{app_uid}:hist:{history_id}")
    } else {
        format!("{app_uid}:hist:{revision}:{}", occurred.timestamp())
    }
}

pub fn operation_event_id(app_uid: &str, operation_key: &str, suffix: &str) -> String {
    format!("{app_uid}:op:{operation_key}:{suffix}")
}

pub fn health_event_id(app_uid: &str, health: &str, occurred: DateTime<Utc>) -> String {
    format!(
        "{app_uid}:health:{}:{}",
        health.trim().to_lowercase(),
        occurred.timestamp()
    )
}

/// De-dup key for a single controller operation:
/// `<revision>:<unix_nanos(started_at)>`, falling back to the finish time,
/// then to the literal `unknown`.
pub fn operation_key(
    revision: &str,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
) -> String {
    let revision = non_empty(revision.trim(), "unknown");
    if let Some(started_at) = started_at {
        return format!("{revision}:{}", nanos(started_at));
    }
    if let Some(finished_at) = finished_at {
        return format!("{revision}:{}", nanos(finished_at));
    }
    format!("{revision}:unknown")
}

fn history_operation_key(history_id: i64, revision: &str, occurred: DateTime<Utc>) -> String {
    if history_id > 0 {
        format!("hist:{history_id}")
    } else {
        operation_key(revision, None, Some(occurred))
    }
}

fn nanos(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt()
        .unwrap_or_else(|| time.timestamp() * 1_000_000_000)
}

fn non_empty(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_owned()
    } else {
        value.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::application::{OperationPhase, OperationState};

    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, hour, minute, 0).unwrap()
    }

    fn app() -> Application {
        Application {
            uid: "uid-1".to_owned(),
            name: "payments-api".to_owned(),
            namespace: "prod-eu".to_owned(),
            dest_cluster: "eu-1".to_owned(),
            sync_revision: "rev-1".to_owned(),
            health: "Healthy".to_owned(),
            reconciled_at: Some(at(12, 5)),
            ..Application::default()
        }
    }

    #[test]
    fn terminal_operation_suppresses_overlapping_history() {
        let mut app = app();
        app.operation = Some(OperationState {
            phase: OperationPhase::Succeeded,
            started_at: Some(at(12, 0)),
            finished_at: Some(at(12, 2)),
            ..OperationState::default()
        });
        app.history = vec![HistoryEntry {
            id: 7,
            revision: "rev-1".to_owned(),
            deployed_at: Some(at(12, 1)),
            deploy_started_at: None,
        }];

        let events = source_events(&app);
        let finished: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == SourceEventType::SyncFinished)
            .collect();
        let recorded: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == SourceEventType::DeploymentRecorded)
            .collect();

        assert_eq!(finished.len(), 1);
        assert_eq!(recorded.len(), 0);
    }

    #[test]
    fn history_outside_the_window_is_kept() {
        let mut app = app();
        app.operation = Some(OperationState {
            phase: OperationPhase::Succeeded,
            started_at: Some(at(12, 0)),
            finished_at: Some(at(12, 2)),
            ..OperationState::default()
        });
        app.history = vec![HistoryEntry {
            id: 6,
            revision: "rev-0".to_owned(),
            deployed_at: Some(at(11, 0)),
            deploy_started_at: None,
        }];

        let events = source_events(&app);
        assert!(events
            .iter()
            .any(|e| e.event_type == SourceEventType::DeploymentRecorded && e.history_id == 6));
    }

    #[test]
    fn identities_are_deterministic() {
        let mut app = app();
        app.operation = Some(OperationState {
            phase: OperationPhase::Running,
            started_at: Some(at(12, 0)),
            ..OperationState::default()
        });

        let first = source_events(&app);
        let second = source_events(&app);
        let first_ids: Vec<_> = first.iter().map(|e| e.id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|e| e.id.clone()).collect();
        assert_eq!(first_ids, second_ids);

        let start = first
            .iter()
            .find(|e| e.event_type == SourceEventType::SyncStarted)
            .unwrap();
        assert_eq!(
            start.id,
            format!("uid-1:op:rev-1:{}:start", at(12, 0).timestamp_nanos_opt().unwrap())
        );

        let health = first
            .iter()
            .find(|e| e.event_type == SourceEventType::HealthChanged)
            .unwrap();
        assert_eq!(health.id, format!("uid-1:health:healthy:{}", at(12, 5).timestamp()));
    }

    #[test]
    fn operation_key_falls_back_in_order() {
        assert_eq!(
            operation_key("rev-1", Some(at(12, 0)), Some(at(12, 2))),
            format!("rev-1:{}", at(12, 0).timestamp_nanos_opt().unwrap())
        );
        assert_eq!(
            operation_key("rev-1", None, Some(at(12, 2))),
            format!("rev-1:{}", at(12, 2).timestamp_nanos_opt().unwrap())
        );
        assert_eq!(operation_key("", None, None), "unknown:unknown");
    }
}
