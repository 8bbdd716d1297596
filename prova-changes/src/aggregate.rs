use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use prova_core::{extensions, timeline_order, Event};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::change::{
    ApprovalEvidence, Change, ChangeDetail, HealthStatus, PostDeployDegradation, ResultStatus,
    EVIDENCE_WINDOW_SECONDS,
};

/// Annotation keys consulted when an event carries its correlation data in
/// the body rather than in extensions.
const ANNOTATION_CHANGE_ID: &str = "prova.io/change-id";
const ANNOTATION_TICKET: &str = "prova.io/ticket";
const ANNOTATION_APPROVALS_REF: &str = "prova.io/approvals-ref";
const ANNOTATION_APPROVALS_JSON: &str = "prova.io/approvals-json";

/// Groups events by change identity and folds each group into a
/// [`ChangeDetail`]. Input order does not matter: events are sorted into
/// timeline order before the fold, so shuffled input produces identical
/// summaries.
pub fn build_changes(mut events: Vec<Event>) -> HashMap<String, ChangeDetail> {
    events.sort_by(timeline_order);

    let mut out: HashMap<String, ChangeDetail> = HashMap::new();
    for event in events {
        let identity = derive_identity(&event);
        let detail = out
            .entry(identity.id.clone())
            .or_insert_with(|| seed_change(&event, &identity));
        accumulate(detail, &event);
    }

    for detail in out.values_mut() {
        finalize(detail);
    }
    out
}

/// Flattens the grouped changes into the listing order:
/// `(completed_at DESC, id ASC)`.
pub fn change_summaries(by_id: &HashMap<String, ChangeDetail>) -> Vec<Change> {
    let mut out: Vec<Change> = by_id.values().map(|d| d.change.clone()).collect();
    out.sort_by(|a, b| {
        b.completed_at
            .cmp(&a.completed_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

pub(crate) struct ChangeIdentity {
    pub id: String,
    pub provider: String,
    pub reference: String,
    pub revision: String,
}

/// The stable change identity of one event:
/// `sha256(lower(app:env:cluster) | provider | reference)`, falling back to
/// the revision plus the event's RFC 3339 timestamp when no reference exists.
pub(crate) fn derive_identity(event: &Event) -> ChangeIdentity {
    let ext = &event.extensions;
    let cluster = extensions::string_value(ext, "cluster");
    let namespace = extensions::string_value(ext, "namespace");
    let scope = format!("{}:{}:{}", event.subject, namespace, cluster).to_lowercase();
    let provider = normalize_provider(&event.source, ext);
    let reference = extensions::first_string(
        ext,
        &[
            "primary_reference",
            "operation_id",
            "history_id",
            "deploy_id",
            "pipeline_id",
            "run_id",
            "job_id",
        ],
    );
    let revision = extensions::first_string(ext, &["revision", "sync_revision", "commit_sha"]);

    let id = if reference.is_empty() {
        let completed = event.time.to_rfc3339_opts(SecondsFormat::Secs, true);
        stable_hash(&format!("{scope}:{provider}:{revision}:{completed}"))
    } else {
        stable_hash(&format!("{scope}:{provider}:{reference}"))
    };

    ChangeIdentity {
        id: format!("chg_{id}"),
        provider,
        reference,
        revision,
    }
}

fn stable_hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn normalize_provider(source: &str, ext: &std::collections::BTreeMap<String, Value>) -> String {
    // A supporting observation that carries operation references belongs to
    // the GitOps deployment it supports.
    if extensions::bool_value(ext, "supporting_observation")
        && !extensions::first_string(
            ext,
            &["operation_id", "history_id", "deploy_id", "sync_revision"],
        )
        .is_empty()
    {
        return "gitops".to_owned();
    }

    let explicit = extensions::string_value(ext, "primary_provider");
    if !explicit.is_empty() {
        return explicit.to_lowercase();
    }

    match source.trim().to_lowercase().as_str() {
        "argocd" | "argo" => "argo".to_owned(),
        "github_actions" | "gha" => "gha".to_owned(),
        "gitlab_ci" | "gitlabci" => "gitlabci".to_owned(),
        "jenkins" => "jenkins".to_owned(),
        "" => "generic".to_owned(),
        other => other.to_owned(),
    }
}

fn seed_change(event: &Event, identity: &ChangeIdentity) -> ChangeDetail {
    ChangeDetail {
        change: Change {
            id: identity.id.clone(),
            change_id: identity.id.clone(),
            permalink: format!("/ui/explorer/change/{}", identity.id),
            subject: event.subject.clone(),
            application: event.subject.clone(),
            project: String::new(),
            target_cluster: extensions::string_value(&event.extensions, "cluster"),
            namespace: extensions::string_value(&event.extensions, "namespace"),
            primary_provider: identity.provider.clone(),
            primary_reference: identity.reference.clone(),
            revision: identity.revision.clone(),
            initiator: String::new(),
            external_change_id: String::new(),
            ticket_id: String::new(),
            approval_reference: String::new(),
            result_status: ResultStatus::Unknown,
            health_status: HealthStatus::Unknown,
            health_at_operation_start: HealthStatus::Unknown,
            health_after_deploy: HealthStatus::Unknown,
            post_deploy_degradation: PostDeployDegradation::default(),
            evidence_last_updated_at: event.time,
            evidence_window_seconds: EVIDENCE_WINDOW_SECONDS,
            evidence_may_be_incomplete: false,
            has_approvals: false,
            started_at: event.time,
            completed_at: event.time,
            event_count: 0,
        },
        events: Vec::new(),
    }
}

fn accumulate(detail: &mut ChangeDetail, event: &Event) {
    let change = &mut detail.change;

    let (external_change_id, ticket_id, approval_reference) = correlation_fields(event);
    if change.external_change_id.is_empty() {
        change.external_change_id = external_change_id;
    }
    if change.ticket_id.is_empty() {
        change.ticket_id = ticket_id;
    }
    if change.approval_reference.is_empty() {
        change.approval_reference = approval_reference;
    }

    if !approvals_from_event(event).is_empty() {
        change.has_approvals = true;
    }
    if change.project.is_empty() {
        change.project = extensions::string_value(&event.extensions, "project");
    }
    if change.namespace.is_empty() {
        change.namespace = extensions::string_value(&event.extensions, "namespace");
    }
    if change.target_cluster.is_empty() {
        change.target_cluster = extensions::string_value(&event.extensions, "cluster");
    }
    if change.initiator.is_empty() {
        change.initiator = extensions::string_value(&event.extensions, "initiator");
    }

    change.result_status = merge_result(change.result_status, infer_result(event));
    change.health_status = merge_health(change.health_status, infer_health(event));

    detail.events.push(event.clone());
}

fn finalize(detail: &mut ChangeDetail) {
    detail.events.sort_by(timeline_order);
    let Some(first) = detail.events.first() else {
        return;
    };
    let started_at = first.time;
    let completed_at = detail.events.last().map(|e| e.time).unwrap_or(started_at);

    let change = &mut detail.change;
    change.started_at = started_at;
    change.completed_at = completed_at;
    change.event_count = detail.events.len();
    change.evidence_last_updated_at = completed_at;
    change.evidence_window_seconds = EVIDENCE_WINDOW_SECONDS;
    change.evidence_may_be_incomplete =
        Utc::now() - completed_at < chrono::Duration::seconds(EVIDENCE_WINDOW_SECONDS);

    let mut start_health = HealthStatus::Unknown;
    let mut end_health = HealthStatus::Unknown;
    let mut last_health = HealthStatus::Unknown;
    let mut first_degraded: Option<DateTime<Utc>> = None;

    for event in &detail.events {
        let health = infer_health(event);
        if health == HealthStatus::Unknown {
            continue;
        }
        if event.time <= started_at {
            start_health = health;
        }
        if event.time >= completed_at && end_health == HealthStatus::Unknown {
            end_health = health;
        }
        if first_degraded.is_none()
            && event.time > started_at
            && health == HealthStatus::Degraded
        {
            first_degraded = Some(event.time);
        }
        last_health = health;
    }

    if end_health == HealthStatus::Unknown {
        end_health = last_health;
    }

    change.health_at_operation_start = start_health;
    change.health_after_deploy = end_health;
    change.post_deploy_degradation = PostDeployDegradation {
        observed: start_health == HealthStatus::Healthy && first_degraded.is_some(),
        first_timestamp: first_degraded,
    };
}

/// Classifies an event's contribution to the change result by bucketing its
/// type together with the body's `status`/`result`/`phase`/`outcome` field.
pub fn infer_result(event: &Event) -> ResultStatus {
    let status = data_string(event, &["status", "result", "phase", "outcome"]);
    let bucket = format!("{} {}", event.ty, status).to_lowercase();

    if ["fail", "error", "degrad", "abort"]
        .iter()
        .any(|needle| bucket.contains(needle))
    {
        return ResultStatus::Failed;
    }
    if ["success", "succeed", "healthy", "complete"]
        .iter()
        .any(|needle| bucket.contains(needle))
    {
        return ResultStatus::Succeeded;
    }
    ResultStatus::Unknown
}

/// Once failed, a change stays failed.
pub fn merge_result(current: ResultStatus, next: ResultStatus) -> ResultStatus {
    match (current, next) {
        (ResultStatus::Failed, _) | (_, ResultStatus::Failed) => ResultStatus::Failed,
        (ResultStatus::Succeeded, _) | (_, ResultStatus::Succeeded) => ResultStatus::Succeeded,
        _ => ResultStatus::Unknown,
    }
}

/// Reads the health observation an event carries, if any.
pub fn infer_health(event: &Event) -> HealthStatus {
    let raw = extensions::first_string(&event.extensions, &["health_status", "health"]);
    match raw.to_lowercase().as_str() {
        "healthy" => HealthStatus::Healthy,
        "degraded" => HealthStatus::Degraded,
        "progressing" => HealthStatus::Progressing,
        "missing" => HealthStatus::Missing,
        _ => HealthStatus::Unknown,
    }
}

/// `degraded` wins absolutely; `progressing` wins over anything but
/// `degraded`; `healthy` and `missing` only fill in the unknown.
pub fn merge_health(current: HealthStatus, next: HealthStatus) -> HealthStatus {
    match next {
        HealthStatus::Degraded => HealthStatus::Degraded,
        HealthStatus::Progressing if current != HealthStatus::Degraded => {
            HealthStatus::Progressing
        }
        HealthStatus::Healthy if current == HealthStatus::Unknown => HealthStatus::Healthy,
        HealthStatus::Missing if current == HealthStatus::Unknown => HealthStatus::Missing,
        _ => current,
    }
}

fn data_string(event: &Event, keys: &[&str]) -> String {
    let Some(body) = event.data_object() else {
        return String::new();
    };
    for key in keys {
        if let Some(Value::String(v)) = body.get(*key) {
            let v = v.trim();
            if !v.is_empty() {
                return v.to_owned();
            }
        }
    }
    String::new()
}

/// Extracts `(external_change_id, ticket_id, approval_reference)` from an
/// event, preferring extensions and falling back to the source payload's
/// vendor annotations.
pub fn correlation_fields(event: &Event) -> (String, String, String) {
    let ext = &event.extensions;
    let mut external_change_id =
        extensions::first_string(ext, &["external_change_id", "change_id"]);
    let mut ticket_id = extensions::string_value(ext, "ticket_id");
    let mut approval_reference = extensions::string_value(ext, "approval_reference");

    if external_change_id.is_empty() || ticket_id.is_empty() || approval_reference.is_empty() {
        if let Some(annotations) = payload_annotations(event) {
            if external_change_id.is_empty() {
                external_change_id = annotation_string(&annotations, ANNOTATION_CHANGE_ID);
            }
            if ticket_id.is_empty() {
                ticket_id = annotation_string(&annotations, ANNOTATION_TICKET);
            }
            if approval_reference.is_empty() {
                approval_reference = annotation_string(&annotations, ANNOTATION_APPROVALS_REF);
            }
        }
    }

    (external_change_id, ticket_id, approval_reference)
}

/// Extracts the approvals an event carries: a top-level `approvals` array (or
/// single object) in the body, or the vendor `approvals-json` annotation.
pub fn approvals_from_event(event: &Event) -> Vec<ApprovalEvidence> {
    let Some(body) = event.data_object() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    match body.get("approvals") {
        Some(Value::Array(items)) => {
            for item in items {
                push_approval(&mut out, item);
            }
        }
        Some(single @ Value::Object(_)) => push_approval(&mut out, single),
        _ => {}
    }

    if let Some(annotations) = payload_annotations(event) {
        let raw = annotation_string(&annotations, ANNOTATION_APPROVALS_JSON);
        if !raw.is_empty() {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&raw) {
                for item in &items {
                    push_approval(&mut out, item);
                }
                return out;
            }
            if let Ok(single @ Value::Object(_)) = serde_json::from_str::<Value>(&raw) {
                push_approval(&mut out, &single);
            }
        }
    }
    out
}

fn push_approval(out: &mut Vec<ApprovalEvidence>, raw: &Value) {
    let Value::Object(map) = raw else {
        return;
    };
    let approval = ApprovalEvidence {
        source: map_string(map, &["source", "approval.source"]),
        identity: map_string(map, &["identity", "approval.identity"]),
        timestamp: map_string(map, &["timestamp", "approval.timestamp"]),
        reference: map_string(map, &["reference", "approval.reference"]),
        summary: map_string(map, &["summary", "approval.summary"]),
    };
    if !approval.is_empty() {
        out.push(approval);
    }
}

fn map_string(map: &Map<String, Value>, keys: &[&str]) -> String {
    for key in keys {
        if let Some(Value::String(v)) = map.get(*key) {
            let v = v.trim();
            if !v.is_empty() {
                return v.to_owned();
            }
        }
    }
    String::new()
}

fn payload_annotations(event: &Event) -> Option<Map<String, Value>> {
    let body = event.data_object()?;
    let Value::Object(payload) = body.get("source_payload")? else {
        return None;
    };
    match payload.get("annotations") {
        Some(Value::Object(annotations)) => Some(annotations.clone()),
        _ => None,
    }
}

fn annotation_string(annotations: &Map<String, Value>, key: &str) -> String {
    match annotations.get(key) {
        Some(Value::String(v)) => v.trim().to_owned(),
        _ => String::new(),
    }
}
