use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use prova_core::Event;
use serde::{Deserialize, Serialize};

/// Seconds after a change's last event during which its evidence may still be
/// incomplete.
pub const EVIDENCE_WINDOW_SECONDS: i64 = 300;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, FromStr, Serialize, Deserialize, Default,
)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, FromStr, Serialize, Deserialize, Default,
)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Progressing,
    Missing,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostDeployDegradation {
    pub observed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_timestamp: Option<DateTime<Utc>>,
}

/// A derived deployment operation: the fold of every raw event sharing one
/// change identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub change_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub permalink: String,
    pub subject: String,
    pub application: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    pub target_cluster: String,
    pub namespace: String,
    pub primary_provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub primary_reference: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub initiator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_change_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ticket_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub approval_reference: String,
    pub result_status: ResultStatus,
    pub health_status: HealthStatus,
    pub health_at_operation_start: HealthStatus,
    pub health_after_deploy: HealthStatus,
    pub post_deploy_degradation: PostDeployDegradation,
    pub evidence_last_updated_at: DateTime<Utc>,
    pub evidence_window_seconds: i64,
    pub evidence_may_be_incomplete: bool,
    pub has_approvals: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub event_count: usize,
}

/// A change together with its time-ordered events.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeDetail {
    #[serde(flatten)]
    pub change: Change,
    pub events: Vec<Event>,
}

#[derive(Debug, Default, Serialize)]
pub struct ChangeList {
    pub items: Vec<Change>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// One approval extracted from an event body or vendor annotation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvidence {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identity: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

impl ApprovalEvidence {
    pub fn is_empty(&self) -> bool {
        self.source.trim().is_empty()
            && self.identity.trim().is_empty()
            && self.timestamp.trim().is_empty()
            && self.reference.trim().is_empty()
            && self.summary.trim().is_empty()
    }

    /// Dedup key: lowercased source and identity, verbatim timestamp,
    /// reference and summary.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.source.trim().to_lowercase(),
            self.identity.trim().to_lowercase(),
            self.timestamp.trim(),
            self.reference.trim(),
            self.summary.trim()
        )
    }
}

/// The evidence sub-view: the change, its supporting observations, and its
/// deduplicated approvals.
#[derive(Debug, Serialize)]
pub struct ChangeEvidence {
    pub change: Change,
    pub supporting_observations: Vec<Event>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub approvals: Vec<ApprovalEvidence>,
}
