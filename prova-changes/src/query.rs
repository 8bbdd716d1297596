use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use prova_core::Subject;
use serde::{Deserialize, Serialize};

use crate::change::{HealthStatus, ResultStatus};

/// Applied when a change listing does not specify a limit.
pub const DEFAULT_CHANGE_LIMIT: usize = 100;
/// Hard cap on any change page.
pub const MAX_CHANGE_LIMIT: usize = 500;

/// Filter on whether a correlation field is populated at all.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, FromStr, Serialize, Deserialize, Default,
)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PresenceFilter {
    #[default]
    Any,
    Set,
    Unset,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, FromStr, Serialize, Deserialize, Default,
)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalsFilter {
    #[default]
    Any,
    Yes,
    No,
}

/// A change listing query: a bounded, subject-scoped time range plus optional
/// filters over the derived changes.
///
/// `q` is a free-text substring filter applied to the underlying events
/// before grouping — it matches the event id, source, type, subject, any
/// string extension value, and the raw body.
#[derive(Debug, Clone)]
pub struct ChangeQuery {
    pub subject: Subject,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub q: String,
    pub result_status: Option<ResultStatus>,
    pub health_status: Option<HealthStatus>,
    pub external_change_id: String,
    pub external_change_id_state: PresenceFilter,
    pub ticket_id: String,
    pub ticket_id_state: PresenceFilter,
    pub approval_reference: String,
    pub has_approvals: ApprovalsFilter,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl ChangeQuery {
    pub fn new(subject: Subject, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            subject,
            from,
            to,
            q: String::new(),
            result_status: None,
            health_status: None,
            external_change_id: String::new(),
            external_change_id_state: PresenceFilter::Any,
            ticket_id: String::new(),
            ticket_id_state: PresenceFilter::Any,
            approval_reference: String::new(),
            has_approvals: ApprovalsFilter::Any,
            limit: None,
            cursor: None,
        }
    }
}

pub(crate) fn clamp_change_limit(limit: Option<usize>) -> usize {
    match limit {
        None | Some(0) => DEFAULT_CHANGE_LIMIT,
        Some(limit) => limit.min(MAX_CHANGE_LIMIT),
    }
}
