use prova_core::{cursor, extensions, Event};

use crate::aggregate::{approvals_from_event, build_changes, change_summaries};
use crate::change::{Change, ChangeDetail, ChangeEvidence, ChangeList};
use crate::error::{ChangeError, Result};
use crate::query::{clamp_change_limit, ApprovalsFilter, ChangeQuery, PresenceFilter};

/// Lists the changes derived from one timeline snapshot, filtered, ordered
/// `(completed_at DESC, id ASC)` and paginated.
///
/// `events` is the subject-scoped, supporting-inclusive timeline slice for
/// the query's time range; computing everything from one snapshot keeps each
/// response internally consistent.
pub fn list_changes(events: Vec<Event>, query: &ChangeQuery) -> Result<ChangeList> {
    let events = filter_events(events, &query.q);
    let by_id = build_changes(events);
    let mut changes = change_summaries(&by_id);
    changes.retain(|change| matches_filters(change, query));

    if let Some(after) = cursor::decode(query.cursor.as_deref().unwrap_or_default())? {
        changes.retain(|change| {
            change.completed_at < after.ts
                || (change.completed_at == after.ts && change.id > after.id)
        });
    }

    let limit = clamp_change_limit(query.limit);
    let mut result = ChangeList::default();
    if changes.len() > limit {
        changes.truncate(limit);
        let last = &changes[limit - 1];
        result.next_cursor = Some(cursor::encode(last.completed_at, &last.id));
    }
    result.items = changes;
    Ok(result)
}

/// Returns one change with its time-ordered events.
pub fn change_detail(events: Vec<Event>, query: &ChangeQuery, id: &str) -> Result<ChangeDetail> {
    let events = filter_events(events, &query.q);
    let mut by_id = build_changes(events);
    by_id.remove(id).ok_or(ChangeError::NotFound)
}

/// Returns only the events of one change.
pub fn change_timeline(events: Vec<Event>, query: &ChangeQuery, id: &str) -> Result<Vec<Event>> {
    Ok(change_detail(events, query, id)?.events)
}

/// Returns the evidence sub-view: the change, its supporting observations,
/// and its deduplicated approvals.
pub fn change_evidence(events: Vec<Event>, query: &ChangeQuery, id: &str) -> Result<ChangeEvidence> {
    let detail = change_detail(events, query, id)?;

    let mut supporting = Vec::new();
    let mut approvals = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for event in &detail.events {
        if extensions::bool_value(&event.extensions, "supporting_observation") {
            supporting.push(event.clone());
        }
        for approval in approvals_from_event(event) {
            if seen.insert(approval.dedup_key()) {
                approvals.push(approval);
            }
        }
    }

    Ok(ChangeEvidence {
        change: detail.change,
        supporting_observations: supporting,
        approvals,
    })
}

fn filter_events(events: Vec<Event>, q: &str) -> Vec<Event> {
    let needle = q.trim().to_lowercase();
    if needle.is_empty() {
        return events;
    }
    events
        .into_iter()
        .filter(|event| event_matches(event, &needle))
        .collect()
}

fn event_matches(event: &Event, needle: &str) -> bool {
    if event.id.to_lowercase().contains(needle)
        || event.source.to_lowercase().contains(needle)
        || event.ty.to_lowercase().contains(needle)
        || event.subject.to_lowercase().contains(needle)
    {
        return true;
    }
    for value in event.extensions.values() {
        if let serde_json::Value::String(v) = value {
            if v.to_lowercase().contains(needle) {
                return true;
            }
        }
    }
    event.data.get().to_lowercase().contains(needle)
}

fn matches_filters(change: &Change, query: &ChangeQuery) -> bool {
    if let Some(result) = query.result_status {
        if change.result_status != result {
            return false;
        }
    }
    if let Some(health) = query.health_status {
        if change.health_status != health {
            return false;
        }
    }

    match query.external_change_id_state {
        PresenceFilter::Set if change.external_change_id.trim().is_empty() => return false,
        PresenceFilter::Unset if !change.external_change_id.trim().is_empty() => return false,
        _ => {}
    }
    let want_external = query.external_change_id.trim();
    if !want_external.is_empty()
        && !change.external_change_id.eq_ignore_ascii_case(want_external)
    {
        return false;
    }

    match query.ticket_id_state {
        PresenceFilter::Set if change.ticket_id.trim().is_empty() => return false,
        PresenceFilter::Unset if !change.ticket_id.trim().is_empty() => return false,
        _ => {}
    }
    let want_ticket = query.ticket_id.trim();
    if !want_ticket.is_empty() && !change.ticket_id.eq_ignore_ascii_case(want_ticket) {
        return false;
    }

    let want_approval_ref = query.approval_reference.trim();
    if !want_approval_ref.is_empty()
        && !change.approval_reference.eq_ignore_ascii_case(want_approval_ref)
    {
        return false;
    }

    match query.has_approvals {
        ApprovalsFilter::Yes if !change.has_approvals => return false,
        ApprovalsFilter::No if change.has_approvals => return false,
        _ => {}
    }

    true
}
