use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use prova_core::{cursor, extensions, timeline_order, Event};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::repository::{
    check_correlation, clamp_timeline_limit, correlation_limit, new_export_job, prepare,
    ExportJob, ExportStatus, IngestReceipt, IngestStatus, Repository, SubjectInfo, TimelineQuery,
    TimelineResult,
};

/// Single-process repository guarded by a reader/writer lock. Readers proceed
/// in parallel; writers serialize.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository(Arc<RwLock<Inner>>);

#[derive(Debug, Default)]
struct Inner {
    events: HashMap<String, Event>,
    exports: HashMap<String, ExportJob>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().events.is_empty()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn ingest(&self, event: Event) -> Result<IngestReceipt> {
        let mut event = prepare(event)?;

        let mut inner = self.0.write();
        if let Some(existing) = inner.events.get(&event.id) {
            if existing.integrity_hash == event.integrity_hash {
                return Ok(IngestReceipt {
                    id: existing.id.clone(),
                    status: IngestStatus::Duplicate,
                    ingested_at: existing.ingested_at.unwrap_or(existing.time),
                });
            }
            return Err(StoreError::Conflict);
        }

        let now = Utc::now();
        event.ingested_at = Some(now);
        let id = event.id.clone();
        inner.events.insert(id.clone(), event);

        Ok(IngestReceipt {
            id,
            status: IngestStatus::Accepted,
            ingested_at: now,
        })
    }

    async fn get(&self, id: &str) -> Result<Event> {
        self.0
            .read()
            .events
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn query_timeline(&self, query: TimelineQuery) -> Result<TimelineResult> {
        let limit = clamp_timeline_limit(query.limit);
        let after = cursor::decode(query.cursor.as_deref().unwrap_or_default())?;

        let mut items = self
            .0
            .read()
            .events
            .values()
            .filter(|event| matches_timeline(event, &query))
            .filter(|event| match &after {
                Some(after) => {
                    event.time > after.ts || (event.time == after.ts && event.id > after.id)
                }
                None => true,
            })
            .cloned()
            .collect::<Vec<_>>();

        items.sort_by(timeline_order);

        let mut result = TimelineResult::default();
        if items.len() > limit {
            items.truncate(limit);
            let last = &items[limit - 1];
            result.next_cursor = Some(cursor::encode(last.time, &last.id));
        }
        result.items = items;

        Ok(result)
    }

    async fn list_subjects(&self) -> Result<Vec<SubjectInfo>> {
        let inner = self.0.read();
        let mut out = inner
            .events
            .values()
            .map(|event| SubjectInfo {
                subject: event.subject.clone(),
                cluster: extensions::string_value(&event.extensions, "cluster"),
                namespace: extensions::string_value(&event.extensions, "namespace"),
            })
            .collect::<Vec<_>>();
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn events_by_extension(
        &self,
        key: &str,
        value: &str,
        limit: usize,
    ) -> Result<Vec<Event>> {
        check_correlation(key, value)?;
        let limit = correlation_limit(limit);

        let mut out = self
            .0
            .read()
            .events
            .values()
            .filter(|event| extensions::string_value(&event.extensions, key) == value)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(timeline_order);
        out.truncate(limit);
        Ok(out)
    }

    async fn create_export(&self, format: &str, filter: Value) -> Result<ExportJob> {
        let job = new_export_job(format, filter);
        self.0.write().exports.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn set_export_completed(&self, id: &str, artifact_uri: &str) -> Result<()> {
        let mut inner = self.0.write();
        let job = inner.exports.get_mut(id).ok_or(StoreError::NotFound)?;
        job.status = ExportStatus::Completed;
        job.artifact_uri = Some(artifact_uri.to_owned());
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn set_export_failed(&self, id: &str, message: &str) -> Result<()> {
        let mut inner = self.0.write();
        let job = inner.exports.get_mut(id).ok_or(StoreError::NotFound)?;
        job.status = ExportStatus::Failed;
        job.error = Some(message.to_owned());
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_export(&self, id: &str) -> Result<ExportJob> {
        self.0
            .read()
            .exports
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete_event(&self, _id: &str) -> Result<()> {
        Err(StoreError::AppendOnly)
    }
}

fn matches_timeline(event: &Event, query: &TimelineQuery) -> bool {
    if let Some(from) = query.from {
        if event.time < from {
            return false;
        }
    }
    if let Some(to) = query.to {
        if event.time > to {
            return false;
        }
    }
    if let Some(subject) = &query.subject {
        if event.subject != subject.app {
            return false;
        }
        if !subject.cluster.is_empty()
            && extensions::string_value(&event.extensions, "cluster") != subject.cluster
        {
            return false;
        }
        if !subject.environment.is_empty()
            && extensions::string_value(&event.extensions, "namespace") != subject.environment
        {
            return false;
        }
    }
    if let Some(source) = &query.source {
        if &event.source != source {
            return false;
        }
    }
    if let Some(ty) = &query.ty {
        if &event.ty != ty {
            return false;
        }
    }
    if let Some((key, value)) = &query.correlation {
        if &extensions::string_value(&event.extensions, key) != value {
            return false;
        }
    }
    if !query.include_supporting
        && extensions::bool_value(&event.extensions, "supporting_observation")
    {
        return false;
    }
    true
}
