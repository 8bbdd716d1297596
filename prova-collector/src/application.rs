use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};

/// Vendor annotations recognized on controller applications. Their values
/// flow into event extensions and the evidence view.
pub const ANNOTATION_CHANGE_ID: &str = "prova.io/change-id";
pub const ANNOTATION_TICKET: &str = "prova.io/ticket";
pub const ANNOTATION_APPROVALS_REF: &str = "prova.io/approvals-ref";
pub const ANNOTATION_APPROVALS_JSON: &str = "prova.io/approvals-json";

/// A snapshot of one controller application, as delivered by a watch update
/// or a poll cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Application {
    pub uid: String,
    pub name: String,
    /// Destination namespace; doubles as the environment when no explicit
    /// default is configured.
    #[serde(default)]
    pub namespace: String,
    /// Destination cluster name or API server address.
    #[serde(default)]
    pub dest_cluster: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Revision the controller currently syncs to.
    #[serde(default)]
    pub sync_revision: String,
    #[serde(default)]
    pub operation: Option<OperationState>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Application-level health reported by the controller.
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub reconciled_at: Option<DateTime<Utc>>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, FromStr, Serialize, Deserialize, Default,
)]
pub enum OperationPhase {
    #[default]
    Running,
    Terminating,
    Succeeded,
    Failed,
    Error,
}

impl OperationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Error)
    }
}

/// The controller's current or last sync operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationState {
    pub phase: OperationPhase,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Username that initiated the operation, when known.
    #[serde(default)]
    pub initiated_by: String,
    /// Whether the operation was started by the controller's automation.
    #[serde(default)]
    pub automated: bool,
}

/// A durable deployment-history entry recorded by the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deploy_started_at: Option<DateTime<Utc>>,
}

impl Application {
    /// Resolves the acting identity for operation events.
    pub fn actor(&self) -> String {
        if let Some(operation) = &self.operation {
            let user = operation.initiated_by.trim();
            if !user.is_empty() {
                return user.to_owned();
            }
            if operation.automated {
                return "gitops-automated".to_owned();
            }
        }
        "gitops".to_owned()
    }

    /// The vendor annotations present on this application, trimmed.
    pub fn vendor_annotations(&self) -> BTreeMap<String, String> {
        [
            ANNOTATION_CHANGE_ID,
            ANNOTATION_TICKET,
            ANNOTATION_APPROVALS_REF,
            ANNOTATION_APPROVALS_JSON,
        ]
        .into_iter()
        .filter_map(|key| {
            self.annotations
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_owned(), v.to_owned()))
        })
        .collect()
    }

    /// The most recent timestamp the controller reported anywhere on this
    /// application, used as a last-resort occurrence time.
    pub fn most_recent_time(&self) -> DateTime<Utc> {
        let mut choices = vec![self.reconciled_at];
        if let Some(operation) = &self.operation {
            choices.push(operation.finished_at);
            choices.push(operation.started_at);
        }
        if let Some(last) = self.history.last() {
            choices.push(last.deployed_at);
            choices.push(last.deploy_started_at);
        }
        choices.into_iter().flatten().max().unwrap_or_else(Utc::now)
    }
}
