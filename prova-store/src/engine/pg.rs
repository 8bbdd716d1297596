use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prova_core::{cursor, Event};
use serde_json::value::RawValue;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::{Result, StoreError};
use crate::repository::{
    check_correlation, clamp_timeline_limit, correlation_limit, new_export_job, prepare,
    ExportJob, IngestReceipt, IngestStatus, Repository, SubjectInfo, TimelineQuery,
    TimelineResult,
};

const EVENT_COLUMNS: &str = "id, type, source, COALESCE(subject, ''), event_time, \
     extensions::text, data::text, integrity_hash, ingested_at";

type EventRow = (
    String,
    String,
    String,
    String,
    DateTime<Utc>,
    String,
    String,
    String,
    DateTime<Utc>,
);

/// PostgreSQL repository: one row per event, `extensions` as JSONB for
/// indexed containment lookups, `data` as JSON so the stored body stays
/// byte-verbatim.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: &PgPool) -> Self {
        Self { pool: pool.clone() }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn ingest(&self, event: Event) -> Result<IngestReceipt> {
        let event = prepare(event)?;

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            "SELECT integrity_hash, ingested_at FROM events WHERE id = $1 FOR UPDATE",
        )
        .bind(&event.id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((hash, ingested_at)) = existing {
            if hash == event.integrity_hash {
                tx.commit().await?;
                return Ok(IngestReceipt {
                    id: event.id,
                    status: IngestStatus::Duplicate,
                    ingested_at,
                });
            }
            return Err(StoreError::Conflict);
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO events \
             (id, type, source, subject, event_time, extensions, data, integrity_hash, ingested_at) \
             VALUES ($1, $2, $3, NULLIF($4, ''), $5, $6::jsonb, $7::json, $8, $9)",
        )
        .bind(&event.id)
        .bind(&event.ty)
        .bind(&event.source)
        .bind(&event.subject)
        .bind(event.time)
        .bind(serde_json::to_string(&event.extensions)?)
        .bind(event.data.get())
        .bind(&event.integrity_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(IngestReceipt {
            id: event.id,
            status: IngestStatus::Accepted,
            ingested_at: now,
        })
    }

    async fn get(&self, id: &str) -> Result<Event> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        row_to_event(row)
    }

    async fn query_timeline(&self, query: TimelineQuery) -> Result<TimelineResult> {
        let limit = clamp_timeline_limit(query.limit);
        let after = cursor::decode(query.cursor.as_deref().unwrap_or_default())?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE 1=1"
        ));

        if let Some(from) = query.from {
            builder.push(" AND event_time >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            builder.push(" AND event_time <= ").push_bind(to);
        }
        if let Some(subject) = &query.subject {
            builder
                .push(" AND subject = ")
                .push_bind(subject.app.clone());
            builder
                .push(" AND extensions->>'cluster' = ")
                .push_bind(subject.cluster.clone());
            builder
                .push(" AND extensions->>'namespace' = ")
                .push_bind(subject.environment.clone());
        }
        if let Some(source) = &query.source {
            builder.push(" AND source = ").push_bind(source.clone());
        }
        if let Some(ty) = &query.ty {
            builder.push(" AND type = ").push_bind(ty.clone());
        }
        if let Some((key, value)) = &query.correlation {
            check_correlation(key, value)?;
            builder
                .push(" AND extensions->>")
                .push_bind(key.clone())
                .push(" = ")
                .push_bind(value.clone());
        }
        if !query.include_supporting {
            builder
                .push(" AND COALESCE(extensions->>'supporting_observation', 'false') != 'true'");
        }
        if let Some(after) = &after {
            builder
                .push(" AND (event_time > ")
                .push_bind(after.ts)
                .push(" OR (event_time = ")
                .push_bind(after.ts)
                .push(" AND id > ")
                .push_bind(after.id.clone())
                .push("))");
        }

        builder
            .push(" ORDER BY event_time ASC, id ASC LIMIT ")
            .push_bind((limit + 1) as i64);

        let rows: Vec<EventRow> = builder.build_query_as().fetch_all(&self.pool).await?;

        paginate(rows, limit)
    }

    async fn list_subjects(&self) -> Result<Vec<SubjectInfo>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT DISTINCT subject, COALESCE(extensions->>'cluster', ''), \
             COALESCE(extensions->>'namespace', '') \
             FROM events WHERE subject IS NOT NULL ORDER BY 1, 2, 3",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(subject, cluster, namespace)| SubjectInfo {
                subject,
                cluster,
                namespace,
            })
            .collect())
    }

    async fn events_by_extension(
        &self,
        key: &str,
        value: &str,
        limit: usize,
    ) -> Result<Vec<Event>> {
        check_correlation(key, value)?;
        let limit = correlation_limit(limit);

        let filter = serde_json::to_string(&serde_json::json!({ key: value }))?;
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE extensions @> $1::jsonb \
             ORDER BY event_time ASC, id ASC LIMIT $2"
        ))
        .bind(filter)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn create_export(&self, format: &str, filter: Value) -> Result<ExportJob> {
        let job = new_export_job(format, filter);

        sqlx::query(
            "INSERT INTO exports (id, status, format, filter_json, created_at) \
             VALUES ($1, $2, $3, $4::jsonb, $5)",
        )
        .bind(&job.id)
        .bind(job.status.to_string())
        .bind(&job.format)
        .bind(serde_json::to_string(&job.filter)?)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn set_export_completed(&self, id: &str, artifact_uri: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE exports SET status = 'completed', artifact_uri = $1, completed_at = $2 \
             WHERE id = $3",
        )
        .bind(artifact_uri)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_export_failed(&self, id: &str, message: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE exports SET status = 'failed', error_message = $1, completed_at = $2 \
             WHERE id = $3",
        )
        .bind(message)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn get_export(&self, id: &str) -> Result<ExportJob> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                String,
                String,
                Option<String>,
                Option<String>,
                DateTime<Utc>,
                Option<DateTime<Utc>>,
            ),
        >(
            "SELECT id, status, format, filter_json::text, artifact_uri, error_message, \
             created_at, completed_at FROM exports WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        export_from_row(row)
    }

    async fn delete_event(&self, _id: &str) -> Result<()> {
        Err(StoreError::AppendOnly)
    }
}

fn paginate(rows: Vec<EventRow>, limit: usize) -> Result<TimelineResult> {
    let mut items = rows
        .into_iter()
        .map(row_to_event)
        .collect::<Result<Vec<_>>>()?;

    let mut result = TimelineResult::default();
    if items.len() > limit {
        items.truncate(limit);
        let last = &items[limit - 1];
        result.next_cursor = Some(cursor::encode(last.time, &last.id));
    }
    result.items = items;
    Ok(result)
}

fn row_to_event(row: EventRow) -> Result<Event> {
    let (id, ty, source, subject, time, extensions, data, integrity_hash, ingested_at) = row;

    let extensions: BTreeMap<String, Value> = if extensions.is_empty() {
        BTreeMap::new()
    } else {
        serde_json::from_str(&extensions)?
    };

    Ok(Event {
        id,
        ty,
        source,
        subject,
        time,
        extensions,
        data: RawValue::from_string(data)?,
        integrity_hash,
        ingested_at: Some(ingested_at),
    })
}

fn export_from_row(
    row: (
        String,
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        DateTime<Utc>,
        Option<DateTime<Utc>>,
    ),
) -> Result<ExportJob> {
    let (id, status, format, filter, artifact_uri, error, created_at, completed_at) = row;

    let status = status
        .parse()
        .map_err(|_| StoreError::InvalidInput(format!("unknown export status `{status}`")))?;
    let filter = if filter.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&filter)?
    };

    Ok(ExportJob {
        id,
        status,
        format,
        filter,
        artifact_uri,
        error,
        created_at,
        completed_at,
    })
}
