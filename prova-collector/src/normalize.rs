use serde_json::{Map, Value};

use prova_core::Event;

use crate::application::{
    ANNOTATION_APPROVALS_JSON, ANNOTATION_APPROVALS_REF, ANNOTATION_CHANGE_ID, ANNOTATION_TICKET,
};
use crate::error::{CollectorError, Result};
use crate::source::{SourceEvent, SOURCE};

/// Normalizes a source event into the canonical event the repository stores.
///
/// The canonical id is `evt_gitops_<deterministic source id>`, so repeated
/// normalization of the same controller state collapses to duplicates at
/// ingest.
pub fn normalize(source: &SourceEvent, default_environment: &str) -> Result<Event> {
    if source.id.trim().is_empty() || source.app.trim().is_empty() {
        return Err(CollectorError::InvalidSourceEvent(
            "missing id or application".to_owned(),
        ));
    }

    let environment = first_non_empty(&[source.namespace.trim(), default_environment.trim()], "unknown");
    let cluster = first_non_empty(&[source.cluster.trim()], "unknown");
    let actor = first_non_empty(&[source.actor.trim()], "gitops");
    let revision = source.revision.trim();
    let result = source.result.trim();
    let health = source.health_status.trim();
    let event_type = source.event_type.to_string();

    let mut event = Event::new(format!("evt_gitops_{}", source.id), SOURCE, &event_type)
        .subject(source.app.trim())
        .time(source.occurred_at)
        .extension("cluster", cluster)
        .extension("namespace", environment)
        .extension("initiator", actor)
        .extension("sync_revision", revision)
        .extension("gitops_event_type", event_type.as_str());

    if !revision.is_empty() {
        event = event.extension("commit_sha", revision);
    }
    if !result.is_empty() {
        event = event.extension("gitops_result", result);
    }
    if source.history_id > 0 {
        event = event.extension("history_id", source.history_id.to_string());
    }
    if !source.operation_key.trim().is_empty() {
        event = event.extension("operation_id", source.operation_key.trim());
    }
    if !health.is_empty() {
        event = event.extension("health_status", health);
    }

    let mut data = Map::new();
    data.insert("gitops_app".to_owned(), Value::from(source.app.trim()));
    data.insert("phase".to_owned(), Value::from(result));
    data.insert("result".to_owned(), Value::from(result));

    if !source.payload.is_empty() {
        if let Some(annotations) = payload_annotations(&source.payload) {
            if let Some(v) = annotation(&annotations, ANNOTATION_CHANGE_ID) {
                event = event.extension("external_change_id", v);
            }
            if let Some(v) = annotation(&annotations, ANNOTATION_TICKET) {
                event = event.extension("ticket_id", v);
            }
            if let Some(v) = annotation(&annotations, ANNOTATION_APPROVALS_REF) {
                event = event.extension("approval_reference", v);
            }
            if let Some(v) = annotation(&annotations, ANNOTATION_APPROVALS_JSON) {
                event = event.extension("approvals_json", v.clone());
                if let Ok(parsed) = serde_json::from_str::<Vec<Map<String, Value>>>(&v) {
                    data.insert(
                        "approvals".to_owned(),
                        Value::from(parsed.into_iter().map(Value::Object).collect::<Vec<_>>()),
                    );
                }
            }
        }
        data.insert(
            "source_payload".to_owned(),
            Value::Object(source.payload.clone()),
        );
    }

    Ok(event.data(Value::Object(data))?.ensure_integrity()?)
}

fn payload_annotations(payload: &Map<String, Value>) -> Option<Map<String, Value>> {
    match payload.get("annotations") {
        Some(Value::Object(map)) if !map.is_empty() => Some(map.clone()),
        _ => None,
    }
}

fn annotation(annotations: &Map<String, Value>, key: &str) -> Option<String> {
    match annotations.get(key) {
        Some(Value::String(v)) => {
            let v = v.trim();
            if v.is_empty() {
                None
            } else {
                Some(v.to_owned())
            }
        }
        _ => None,
    }
}

fn first_non_empty<'a>(candidates: &[&'a str], fallback: &'a str) -> &'a str {
    candidates
        .iter()
        .copied()
        .find(|v| !v.is_empty())
        .unwrap_or(fallback)
}
