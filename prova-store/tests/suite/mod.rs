//! Engine-independent repository test suite, run against every backend.

use chrono::{DateTime, TimeZone, Utc};
use prova_core::{Event, Subject};
use prova_store::{
    ExportStatus, IngestStatus, Repository, StoreError, TimelineQuery,
};

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 16, hour, minute, 0).unwrap()
}

pub fn subject() -> Subject {
    Subject::new("payments-api", "prod-eu", "eu-1")
}

pub fn event(id: &str, source: &str, ty: &str, time: DateTime<Utc>) -> Event {
    Event::new(id, source, ty)
        .subject("payments-api")
        .time(time)
        .extension("cluster", "eu-1")
        .extension("namespace", "prod-eu")
        .raw_data(r#"{"repo":"o/p"}"#)
        .unwrap()
}

pub async fn ingest_is_idempotent<R: Repository>(repo: R) -> anyhow::Result<()> {
    let receipt = repo
        .ingest(event("e1", "git", "push", at(12, 0)))
        .await?;
    assert_eq!(receipt.status, IngestStatus::Accepted);

    let duplicate = repo
        .ingest(event("e1", "git", "push", at(12, 0)))
        .await?;
    assert_eq!(duplicate.status, IngestStatus::Duplicate);
    assert_eq!(duplicate.ingested_at, receipt.ingested_at);

    let stored = repo.get("e1").await?;
    assert_eq!(stored.data.get(), r#"{"repo":"o/p"}"#);

    let all = repo
        .query_timeline(TimelineQuery::default().subject(subject()))
        .await?;
    assert_eq!(all.items.len(), 1);
    Ok(())
}

pub async fn conflicting_body_is_rejected<R: Repository>(repo: R) -> anyhow::Result<()> {
    repo.ingest(event("e1", "git", "push", at(12, 0))).await?;

    let other = event("e1", "git", "push", at(12, 0))
        .raw_data(r#"{"repo":"o/q"}"#)
        .unwrap();
    let err = repo.ingest(other).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict));

    // The losing body never replaces the first accepted one.
    let stored = repo.get("e1").await?;
    assert_eq!(stored.data.get(), r#"{"repo":"o/p"}"#);
    Ok(())
}

pub async fn rejects_invalid_events<R: Repository>(repo: R) -> anyhow::Result<()> {
    let mut missing_id = event("e1", "git", "push", at(12, 0));
    missing_id.id = String::new();
    assert!(matches!(
        repo.ingest(missing_id).await.unwrap_err(),
        StoreError::Event(_)
    ));

    let null_body = event("e2", "git", "push", at(12, 0))
        .raw_data("null")
        .unwrap();
    assert!(repo.ingest(null_body).await.is_err());
    Ok(())
}

pub async fn timeline_filters_and_orders<R: Repository>(repo: R) -> anyhow::Result<()> {
    repo.ingest(event("b", "git", "push", at(12, 0))).await?;
    repo.ingest(event("a", "git", "push", at(12, 0))).await?;
    repo.ingest(event("c", "gitops", "sync.finished", at(12, 2)))
        .await?;
    repo.ingest(
        event("d", "cluster", "pod.restart", at(12, 1)).extension("supporting_observation", true),
    )
    .await?;
    repo.ingest(
        event("other", "git", "push", at(12, 0)).subject("billing-api"),
    )
    .await?;

    let result = repo
        .query_timeline(TimelineQuery::default().subject(subject()))
        .await?;
    let ids: Vec<&str> = result.items.iter().map(|e| e.id.as_str()).collect();
    // Supporting observations are excluded by default; ties break on id.
    assert_eq!(ids, ["a", "b", "c"]);

    let result = repo
        .query_timeline(TimelineQuery::default().subject(subject()).include_supporting())
        .await?;
    let ids: Vec<&str> = result.items.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "d", "c"]);

    let mut query = TimelineQuery::default().subject(subject());
    query.source = Some("gitops".to_owned());
    let result = repo.query_timeline(query).await?;
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].id, "c");

    let mut query = TimelineQuery::default().subject(subject());
    query.ty = Some("push".to_owned());
    let result = repo.query_timeline(query).await?;
    assert_eq!(result.items.len(), 2);

    let result = repo
        .query_timeline(TimelineQuery::default().subject(subject()).range(at(12, 1), at(12, 2)))
        .await?;
    let ids: Vec<&str> = result.items.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["c"]);
    Ok(())
}

pub async fn timeline_pages_are_stable<R: Repository>(repo: R) -> anyhow::Result<()> {
    for (id, minute) in [("a", 0), ("b", 1), ("c", 1), ("d", 2), ("e", 3)] {
        repo.ingest(event(id, "git", "push", at(12, minute))).await?;
    }

    let full = repo
        .query_timeline(TimelineQuery::default().subject(subject()))
        .await?;
    assert_eq!(full.items.len(), 5);
    assert!(full.next_cursor.is_none());

    let mut collected = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let mut query = TimelineQuery::default().subject(subject()).limit(2);
        if let Some(cursor) = &cursor {
            query = query.cursor(cursor.clone());
        }
        let page = repo.query_timeline(query).await?;
        assert!(page.items.len() <= 2);
        collected.extend(page.items.into_iter().map(|e| e.id));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    let full_ids: Vec<String> = full.items.into_iter().map(|e| e.id).collect();
    assert_eq!(collected, full_ids);

    let err = repo
        .query_timeline(TimelineQuery::default().subject(subject()).cursor("@@not-a-cursor@@"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidCursor));
    Ok(())
}

pub async fn correlation_lookup_matches_extension<R: Repository>(repo: R) -> anyhow::Result<()> {
    repo.ingest(
        event("git-1", "git", "push", at(11, 59)).extension("commit_sha", "abc123"),
    )
    .await?;
    repo.ingest(
        event("argo-1", "gitops", "sync.finished", at(12, 2)).extension("commit_sha", "abc123"),
    )
    .await?;
    repo.ingest(
        event("git-2", "git", "push", at(12, 3)).extension("commit_sha", "fff999"),
    )
    .await?;

    let events = repo.events_by_extension("commit_sha", "abc123", 0).await?;
    let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["git-1", "argo-1"]);

    let err = repo
        .events_by_extension("$.cluster", "eu-1", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));
    Ok(())
}

pub async fn subjects_are_distinct<R: Repository>(repo: R) -> anyhow::Result<()> {
    repo.ingest(event("a", "git", "push", at(12, 0))).await?;
    repo.ingest(event("b", "git", "push", at(12, 1))).await?;
    repo.ingest(
        event("c", "git", "push", at(12, 2)).subject("billing-api"),
    )
    .await?;

    let subjects = repo.list_subjects().await?;
    assert_eq!(subjects.len(), 2);
    assert_eq!(subjects[0].subject, "billing-api");
    assert_eq!(subjects[1].subject, "payments-api");
    assert_eq!(subjects[1].cluster, "eu-1");
    assert_eq!(subjects[1].namespace, "prod-eu");
    Ok(())
}

pub async fn export_jobs_run_once<R: Repository>(repo: R) -> anyhow::Result<()> {
    let filter = serde_json::json!({
        "subject": "payments-api:prod-eu:eu-1",
        "from": "2026-02-16T00:00:00Z",
        "to": "2026-02-16T23:59:59Z",
    });
    let job = repo.create_export("json", filter.clone()).await?;
    assert_eq!(job.status, ExportStatus::Pending);
    assert_eq!(job.filter, filter);

    repo.set_export_completed(&job.id, "/tmp/artifacts/x.json")
        .await?;
    let job = repo.get_export(&job.id).await?;
    assert_eq!(job.status, ExportStatus::Completed);
    assert_eq!(job.artifact_uri.as_deref(), Some("/tmp/artifacts/x.json"));
    assert!(job.completed_at.is_some());

    let failed = repo.create_export("json", serde_json::json!({})).await?;
    repo.set_export_failed(&failed.id, "timeline unavailable")
        .await?;
    let failed = repo.get_export(&failed.id).await?;
    assert_eq!(failed.status, ExportStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("timeline unavailable"));

    assert!(matches!(
        repo.get_export("exp_missing").await.unwrap_err(),
        StoreError::NotFound
    ));
    assert!(matches!(
        repo.set_export_completed("exp_missing", "x").await.unwrap_err(),
        StoreError::NotFound
    ));
    Ok(())
}

pub async fn delete_is_refused<R: Repository>(repo: R) -> anyhow::Result<()> {
    repo.ingest(event("e1", "git", "push", at(12, 0))).await?;
    let err = repo.delete_event("e1").await.unwrap_err();
    assert!(matches!(err, StoreError::AppendOnly));
    assert!(repo.get("e1").await.is_ok());
    Ok(())
}
