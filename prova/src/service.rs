use chrono::{DateTime, Utc};
use prova_changes::{ChangeDetail, ChangeEvidence, ChangeList, ChangeQuery};
use prova_core::{Event, Subject};
use prova_export::{build_evidence_pack, ArtifactSink};
use prova_store::{
    ExportJob, IngestReceipt, Repository, SubjectInfo, TimelineQuery, TimelineResult,
    MAX_TIMELINE_LIMIT,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] prova_store::StoreError),

    #[error(transparent)]
    Change(#[from] prova_changes::ChangeError),

    #[error(transparent)]
    Export(#[from] prova_export::ExportError),

    #[error(transparent)]
    Event(#[from] prova_core::EventError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Filter of an export job: one subject triple over a bounded time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportFilter {
    pub subject: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// The service boundary over the repository, change aggregation and export.
///
/// Thin by design: validation, integrity-hash computation and idempotency
/// live in the repository; change aggregation is computed per request from a
/// single timeline snapshot; export fans out to the artifact sink.
#[derive(Clone)]
pub struct Service {
    repo: Box<dyn Repository>,
    artifacts: Box<dyn ArtifactSink>,
}

impl Service {
    pub fn new(repo: Box<dyn Repository>, artifacts: Box<dyn ArtifactSink>) -> Self {
        Self { repo, artifacts }
    }

    pub fn repository(&self) -> &dyn Repository {
        self.repo.as_ref()
    }

    /// Ingests one canonical event.
    pub async fn ingest(&self, event: Event) -> Result<IngestReceipt> {
        Ok(self.repo.ingest(event).await?)
    }

    /// Ingests every event of a batch, in order, stopping at the first
    /// failure.
    pub async fn ingest_batch(&self, events: Vec<Event>) -> Result<Vec<IngestReceipt>> {
        let mut receipts = Vec::with_capacity(events.len());
        for event in events {
            receipts.push(self.repo.ingest(event).await?);
        }
        Ok(receipts)
    }

    /// Parses a CloudEvents payload (single or batch by content type) and
    /// ingests the result.
    pub async fn ingest_payload(
        &self,
        content_type: &str,
        body: &[u8],
    ) -> Result<Vec<IngestReceipt>> {
        let events = prova_core::parse_payload(content_type, body)?;
        self.ingest_batch(events).await
    }

    pub async fn get_event(&self, id: &str) -> Result<Event> {
        Ok(self.repo.get(id).await?)
    }

    pub async fn query_timeline(&self, query: TimelineQuery) -> Result<TimelineResult> {
        Ok(self.repo.query_timeline(query).await?)
    }

    pub async fn list_subjects(&self) -> Result<Vec<SubjectInfo>> {
        Ok(self.repo.list_subjects().await?)
    }

    /// Events whose `extensions[key]` equals `value`, ordered
    /// `(time ASC, id ASC)`.
    pub async fn events_by_extension(
        &self,
        key: &str,
        value: &str,
        limit: usize,
    ) -> Result<Vec<Event>> {
        Ok(self.repo.events_by_extension(key, value, limit).await?)
    }

    /// Lists the changes in the query's window, filtered and paginated.
    pub async fn list_changes(&self, query: &ChangeQuery) -> Result<ChangeList> {
        let events = self.events_for_change_query(query).await?;
        Ok(prova_changes::list_changes(events, query)?)
    }

    pub async fn change_detail(&self, id: &str, query: &ChangeQuery) -> Result<ChangeDetail> {
        let events = self.events_for_change_query(query).await?;
        Ok(prova_changes::change_detail(events, query, id)?)
    }

    pub async fn change_timeline(&self, id: &str, query: &ChangeQuery) -> Result<Vec<Event>> {
        let events = self.events_for_change_query(query).await?;
        Ok(prova_changes::change_timeline(events, query, id)?)
    }

    pub async fn change_evidence(&self, id: &str, query: &ChangeQuery) -> Result<ChangeEvidence> {
        let events = self.events_for_change_query(query).await?;
        Ok(prova_changes::change_evidence(events, query, id)?)
    }

    /// Creates an export job, builds the evidence pack for the filter's
    /// window, writes the artifact and completes the job. Any failure flips
    /// the job to `failed` with the message recorded.
    pub async fn create_export(&self, format: &str, filter: ExportFilter) -> Result<ExportJob> {
        let filter_json = serde_json::to_value(&filter)
            .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
        let job = self.repo.create_export(format, filter_json).await?;

        let events = match self.export_events(&filter).await {
            Ok(events) => events,
            Err(err) => {
                return self.fail_export(&job.id, err).await;
            }
        };

        let artifact = match build_evidence_pack(events).and_then(|pack| pack.to_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                return self.fail_export(&job.id, err.into()).await;
            }
        };

        match self.artifacts.write(&job.id, &artifact).await {
            Ok(uri) => {
                self.repo.set_export_completed(&job.id, &uri).await?;
                Ok(self.repo.get_export(&job.id).await?)
            }
            Err(err) => self.fail_export(&job.id, err.into()).await,
        }
    }

    pub async fn get_export(&self, id: &str) -> Result<ExportJob> {
        Ok(self.repo.get_export(id).await?)
    }

    /// Reads an export artifact back by the URI recorded on its job.
    pub async fn read_artifact(&self, uri: &str) -> Result<Vec<u8>> {
        Ok(self.artifacts.read(uri).await?)
    }

    /// One timeline snapshot feeds each change computation, so a single
    /// response is internally consistent.
    async fn events_for_change_query(&self, query: &ChangeQuery) -> Result<Vec<Event>> {
        let result = self
            .repo
            .query_timeline(
                TimelineQuery::default()
                    .subject(query.subject.clone())
                    .range(query.from, query.to)
                    .include_supporting()
                    .limit(MAX_TIMELINE_LIMIT),
            )
            .await?;
        Ok(result.items)
    }

    async fn export_events(&self, filter: &ExportFilter) -> Result<Vec<Event>> {
        let subject: Subject = filter
            .subject
            .parse()
            .map_err(|err: prova_core::EventError| ServiceError::InvalidInput(err.to_string()))?;
        let result = self
            .repo
            .query_timeline(
                TimelineQuery::default()
                    .subject(subject)
                    .range(filter.from, filter.to)
                    .include_supporting()
                    .limit(MAX_TIMELINE_LIMIT),
            )
            .await?;
        Ok(result.items)
    }

    async fn fail_export(&self, job_id: &str, err: ServiceError) -> Result<ExportJob> {
        if let Err(mark_err) = self.repo.set_export_failed(job_id, &err.to_string()).await {
            tracing::error!(error = %mark_err, job = %job_id, "failed to mark export failed");
        }
        Err(err)
    }
}
