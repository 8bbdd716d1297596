use chrono::{DateTime, Utc};
use prova_changes::{infer_health, HealthStatus, PostDeployDegradation};
use prova_core::{extensions, timeline_order, Event};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

pub const SCHEMA_VERSION: &str = "evidence-pack/v1";
/// Source tag stamped on every pack.
pub const PACK_SOURCE: &str = "gitops";

/// The evidence-pack artifact, serialized as a single UTF-8 JSON object.
#[derive(Debug, Serialize)]
pub struct EvidencePack {
    pub schema_version: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub change_id: String,
    pub generated_at: DateTime<Utc>,
    pub source: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub application: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub initiator: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub result: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub external_change_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ticket_id: String,
    pub post_deploy_degradation: PostDeployDegradation,
    pub timeline: Vec<Event>,
    pub count: usize,
    /// SHA-256 of the sorted timeline JSON.
    pub checksum_sha256: String,
    /// SHA-256 of the canonical change document; a pure function of the
    /// input event set.
    pub deterministic_hash_sha256: String,
}

impl EvidencePack {
    /// Serializes the artifact (UTF-8, no BOM).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Summary fields of the change the pack describes, taking the first
/// non-empty value across the sorted events.
#[derive(Debug, Default, Serialize)]
struct PrimaryChange {
    change_id: String,
    application: String,
    cluster: String,
    namespace: String,
    revision: String,
    initiator: String,
    result: String,
    external_change_id: String,
    ticket_id: String,
    post_deploy_degradation: PostDeployDegradation,
}

/// The job-independent canonical document hashed into
/// `deterministic_hash_sha256`.
#[derive(Serialize)]
struct CanonicalDocument<'a> {
    change_id: &'a str,
    source: &'static str,
    application: &'a str,
    cluster: &'a str,
    namespace: &'a str,
    revision: &'a str,
    initiator: &'a str,
    result: &'a str,
    external_change_id: &'a str,
    ticket_id: &'a str,
    post_deploy_degradation: &'a PostDeployDegradation,
    timeline: &'a [Event],
}

/// Builds the evidence pack for a set of events. Events are sorted into
/// timeline order first, so the same input set always produces the same
/// `deterministic_hash_sha256`.
pub fn build_evidence_pack(mut events: Vec<Event>) -> Result<EvidencePack> {
    events.sort_by(timeline_order);

    let timeline_json = serde_json::to_vec(&events)?;
    let checksum = hex::encode(Sha256::digest(&timeline_json));

    let change = derive_primary_change(&events);
    let canonical = serde_json::to_vec(&CanonicalDocument {
        change_id: &change.change_id,
        source: PACK_SOURCE,
        application: &change.application,
        cluster: &change.cluster,
        namespace: &change.namespace,
        revision: &change.revision,
        initiator: &change.initiator,
        result: &change.result,
        external_change_id: &change.external_change_id,
        ticket_id: &change.ticket_id,
        post_deploy_degradation: &change.post_deploy_degradation,
        timeline: &events,
    })?;
    let deterministic = hex::encode(Sha256::digest(&canonical));

    Ok(EvidencePack {
        schema_version: SCHEMA_VERSION,
        change_id: change.change_id,
        generated_at: Utc::now(),
        source: PACK_SOURCE,
        application: change.application,
        cluster: change.cluster,
        namespace: change.namespace,
        revision: change.revision,
        initiator: change.initiator,
        result: change.result,
        external_change_id: change.external_change_id,
        ticket_id: change.ticket_id,
        post_deploy_degradation: change.post_deploy_degradation,
        count: events.len(),
        timeline: events,
        checksum_sha256: checksum,
        deterministic_hash_sha256: deterministic,
    })
}

fn derive_primary_change(events: &[Event]) -> PrimaryChange {
    let mut out = PrimaryChange::default();
    let Some(first) = events.first() else {
        return out;
    };

    out.application = first.subject.clone();
    out.cluster = extensions::string_value(&first.extensions, "cluster");
    out.namespace = extensions::string_value(&first.extensions, "namespace");

    let mut result = "unknown";
    for event in events {
        if out.change_id.is_empty() {
            out.change_id = extensions::string_value(&event.extensions, "change_id");
        }
        if out.revision.is_empty() {
            out.revision = extensions::first_string(
                &event.extensions,
                &["sync_revision", "revision", "commit_sha"],
            );
        }
        if out.initiator.is_empty() {
            out.initiator = extensions::string_value(&event.extensions, "initiator");
        }
        if out.external_change_id.is_empty() {
            out.external_change_id = extensions::first_string(
                &event.extensions,
                &["external_change_id", "change_id"],
            );
        }
        if out.ticket_id.is_empty() {
            out.ticket_id = extensions::first_string(
                &event.extensions,
                &["ticket_id", "ticket_key_primary"],
            );
        }

        let status = data_status(event);
        let bucket = format!("{} {}", event.ty, status).to_lowercase();
        if ["fail", "error", "degrad", "abort"]
            .iter()
            .any(|needle| bucket.contains(needle))
        {
            result = "failed";
        } else if result != "failed"
            && ["success", "succeed", "complete"]
                .iter()
                .any(|needle| bucket.contains(needle))
        {
            result = "succeeded";
        }
    }
    out.result = result.to_owned();

    if out.change_id.is_empty() {
        let input = format!(
            "{}:{}:{}:{}",
            out.application, out.cluster, out.namespace, out.revision
        );
        out.change_id = format!("chg_{}", hex::encode(Sha256::digest(input.as_bytes())));
    }

    out.post_deploy_degradation = derive_degradation(events);
    out
}

/// Degradation over the pack's own window: a healthy observation at or
/// before the first event, then a degraded one strictly after it.
fn derive_degradation(events: &[Event]) -> PostDeployDegradation {
    let Some(first) = events.first() else {
        return PostDeployDegradation::default();
    };
    let started_at = first.time;

    let mut start_health = HealthStatus::Unknown;
    let mut first_degraded = None;
    for event in events {
        let health = infer_health(event);
        if health == HealthStatus::Unknown {
            continue;
        }
        if event.time <= started_at {
            start_health = health;
        }
        if first_degraded.is_none()
            && event.time > started_at
            && health == HealthStatus::Degraded
        {
            first_degraded = Some(event.time);
        }
    }

    PostDeployDegradation {
        observed: start_health == HealthStatus::Healthy && first_degraded.is_some(),
        first_timestamp: first_degraded,
    }
}

fn data_status(event: &Event) -> String {
    let Some(body) = event.data_object() else {
        return String::new();
    };
    for key in ["status", "phase", "result", "outcome"] {
        if let Some(serde_json::Value::String(v)) = body.get(key) {
            let v = v.trim();
            if !v.is_empty() {
                return v.to_owned();
            }
        }
    }
    String::new()
}
