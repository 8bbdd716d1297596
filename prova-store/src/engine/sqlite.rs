use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prova_core::{cursor, rfc3339_nanos, Event};
use serde_json::value::RawValue;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::{Result, StoreError};
use crate::repository::{
    check_correlation, clamp_timeline_limit, correlation_limit, new_export_job, prepare,
    ExportJob, IngestReceipt, IngestStatus, Repository, SubjectInfo, TimelineQuery,
    TimelineResult,
};

const EVENT_COLUMNS: &str = "id, type, source, COALESCE(subject, ''), event_time, \
     extensions, data, integrity_hash, ingested_at";

type EventRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

/// SQLite repository. Timestamps are stored as RFC 3339 UTC text with
/// nanosecond precision, which orders lexicographically the same as it
/// orders chronologically.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: &SqlitePool) -> Self {
        Self { pool: pool.clone() }
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn ingest(&self, event: Event) -> Result<IngestReceipt> {
        let event = prepare(event)?;

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, (String, String)>(
            "SELECT integrity_hash, ingested_at FROM events WHERE id = ?",
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
                    ingested_at: parse_time(&ingested_at)?,
                });
            }
            return Err(StoreError::Conflict);
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO events \
             (id, type, source, subject, event_time, extensions, data, integrity_hash, ingested_at) \
             VALUES (?, ?, ?, NULLIF(?, ''), ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.ty)
        .bind(&event.source)
        .bind(&event.subject)
        .bind(rfc3339_nanos(event.time))
        .bind(serde_json::to_string(&event.extensions)?)
        .bind(event.data.get())
        .bind(&event.integrity_hash)
        .bind(rfc3339_nanos(now))
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
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"
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

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE 1=1"
        ));

        if let Some(from) = query.from {
            builder
                .push(" AND event_time >= ")
                .push_bind(rfc3339_nanos(from));
        }
        if let Some(to) = query.to {
            builder
                .push(" AND event_time <= ")
                .push_bind(rfc3339_nanos(to));
        }
        if let Some(subject) = &query.subject {
            builder
                .push(" AND subject = ")
                .push_bind(subject.app.clone());
            builder
                .push(" AND json_extract(extensions, '$.cluster') = ")
                .push_bind(subject.cluster.clone());
            builder
                .push(" AND json_extract(extensions, '$.namespace') = ")
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
                .push(" AND json_extract(extensions, ")
                .push_bind(format!("$.{key}"))
                .push(") = ")
                .push_bind(value.clone());
        }
        if !query.include_supporting {
            builder.push(
                " AND COALESCE(json_extract(extensions, '$.supporting_observation'), 0) = 0",
            );
        }
        if let Some(after) = &after {
            let ts = rfc3339_nanos(after.ts);
            builder
                .push(" AND (event_time > ")
                .push_bind(ts.clone())
                .push(" OR (event_time = ")
                .push_bind(ts)
                .push(" AND id > ")
                .push_bind(after.id.clone())
                .push("))");
        }

        builder
            .push(" ORDER BY event_time ASC, id ASC LIMIT ")
            .push_bind((limit + 1) as i64);

        let rows: Vec<EventRow> = builder.build_query_as().fetch_all(&self.pool).await?;

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

    async fn list_subjects(&self) -> Result<Vec<SubjectInfo>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT DISTINCT subject, COALESCE(json_extract(extensions, '$.cluster'), ''), \
             COALESCE(json_extract(extensions, '$.namespace'), '') \
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

        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE json_extract(extensions, ?) = ? \
             ORDER BY event_time ASC, id ASC LIMIT ?"
        ))
        .bind(format!("$.{key}"))
        .bind(value)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn create_export(&self, format: &str, filter: Value) -> Result<ExportJob> {
        let job = new_export_job(format, filter);

        sqlx::query(
            "INSERT INTO exports (id, status, format, filter_json, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(job.status.to_string())
        .bind(&job.format)
        .bind(serde_json::to_string(&job.filter)?)
        .bind(rfc3339_nanos(job.created_at))
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn set_export_completed(&self, id: &str, artifact_uri: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE exports SET status = 'completed', artifact_uri = ?, completed_at = ? \
             WHERE id = ?",
        )
        .bind(artifact_uri)
        .bind(rfc3339_nanos(Utc::now()))
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
            "UPDATE exports SET status = 'failed', error_message = ?, completed_at = ? \
             WHERE id = ?",
        )
        .bind(message)
        .bind(rfc3339_nanos(Utc::now()))
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
                String,
                Option<String>,
            ),
        >(
            "SELECT id, status, format, filter_json, artifact_uri, error_message, \
             created_at, completed_at FROM exports WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        let (id, status, format, filter, artifact_uri, error, created_at, completed_at) = row;

        let status = status
            .parse()
            .map_err(|_| StoreError::InvalidInput(format!("unknown export status `{status}`")))?;
        let filter = if filter.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&filter)?
        };
        let completed_at = match completed_at {
            Some(raw) => Some(parse_time(&raw)?),
            None => None,
        };

        Ok(ExportJob {
            id,
            status,
            format,
            filter,
            artifact_uri,
            error,
            created_at: parse_time(&created_at)?,
            completed_at,
        })
    }

    async fn delete_event(&self, _id: &str) -> Result<()> {
        Err(StoreError::AppendOnly)
    }
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
        time: parse_time(&time)?,
        extensions,
        data: RawValue::from_string(data)?,
        integrity_hash,
        ingested_at: Some(parse_time(&ingested_at)?),
    })
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| StoreError::InvalidInput(format!("invalid stored time `{raw}`: {err}")))
}
