use archivist::engine::{InMemorySearchEngine, Query};
use archivist::mutation::{
    CollectionRoleGuard, ConflictRetryPolicy, DocumentWriter, MutationOutcome,
    ScriptTemplateRegistry, ScriptedMutationBuilder,
};
use archivist::task::{PollBackoffPolicy, TaskPoller};
use archivist::{ArchiveError, ArchiverConfig, EngineConfig, ManualClock, Archiver};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

const REPORTS: &str = "optimize-report";
const COLLECTIONS: &str = "optimize-collection";

fn writer(engine: &InMemorySearchEngine, retry: ConflictRetryPolicy) -> DocumentWriter {
    let poller = TaskPoller::new(Arc::new(engine.clone()), PollBackoffPolicy::fixed(1, 20));
    let registry = ScriptTemplateRegistry::builtin().unwrap();
    let builder = ScriptedMutationBuilder::new(Arc::new(registry));
    DocumentWriter::new(Arc::new(engine.clone()), poller, builder, retry)
}

fn engine() -> InMemorySearchEngine {
    let engine = InMemorySearchEngine::new()
        .with_indices(&[REPORTS, COLLECTIONS])
        .unwrap();
    engine
        .insert(
            REPORTS,
            "r-1",
            json!({ "name": "Throughput", "owner": "ana", "views": 3, "shared": false }),
        )
        .unwrap();
    engine
        .insert(
            COLLECTIONS,
            "c-1",
            json!({
                "name": "Payments",
                "roles": [
                    { "identity": "ana", "role": "manager" },
                    { "identity": "ben", "role": "viewer" }
                ]
            }),
        )
        .unwrap();
    engine
}

#[derive(Serialize)]
struct ReportUpdate {
    name: String,
    owner: String,
    shared: bool,
}

#[tokio::test]
async fn test_overwrite_touches_only_declared_fields() {
    let engine = engine();
    let writer = writer(&engine, ConflictRetryPolicy::default().without_backoff());
    let update = ReportUpdate {
        name: "Throughput per day".to_string(),
        owner: "mallory".to_string(),
        shared: true,
    };

    writer
        .update_fields(REPORTS, "r-1", &["name", "shared"], &update)
        .await
        .unwrap();

    let doc = engine.document(REPORTS, "r-1").unwrap().unwrap();
    assert_eq!(doc["name"], "Throughput per day");
    assert_eq!(doc["shared"], true);
    assert_eq!(doc["owner"], "ana");
    assert_eq!(doc["views"], 3);
}

#[tokio::test]
async fn test_version_conflicts_are_retried_within_bound() {
    let engine = engine();
    engine.inject_version_conflicts(REPORTS, "r-1", 3).unwrap();
    let writer = writer(&engine, ConflictRetryPolicy::default().without_backoff());

    writer.increment(REPORTS, "r-1", "views", 2).await.unwrap();

    let doc = engine.document(REPORTS, "r-1").unwrap().unwrap();
    assert_eq!(doc["views"], 5);
}

#[tokio::test]
async fn test_exhausted_retries_raise_runtime_error() {
    let engine = engine();
    engine.inject_version_conflicts(REPORTS, "r-1", 6).unwrap();
    let writer = writer(&engine, ConflictRetryPolicy::default().without_backoff());

    let result = writer.increment(REPORTS, "r-1", "views", 1).await;

    match result {
        Err(ArchiveError::Runtime {
            operation,
            target_id,
            ..
        }) => {
            assert_eq!(operation, "increment_counter");
            assert_eq!(target_id, "r-1");
        }
        other => panic!("expected runtime error, got {:?}", other),
    }
    assert_eq!(engine.document(REPORTS, "r-1").unwrap().unwrap()["views"], 3);
}

#[tokio::test]
async fn test_missing_document_raises_not_found() {
    let engine = engine();
    let writer = writer(&engine, ConflictRetryPolicy::default().without_backoff());

    let result = writer.increment(REPORTS, "r-404", "views", 1).await;

    match result {
        Err(ArchiveError::NotFound { target_id }) => assert_eq!(target_id, "r-404"),
        other => panic!("expected not found, got {:?}", other),
    }
}

#[tokio::test]
async fn test_last_manager_cannot_be_demoted_or_removed() {
    let engine = engine();
    let writer = writer(&engine, ConflictRetryPolicy::default().without_backoff());

    let outcome = writer
        .guarded_update(COLLECTIONS, "c-1", CollectionRoleGuard::assign("ana", "viewer"))
        .await
        .unwrap();
    assert!(matches!(outcome, MutationOutcome::Skipped { .. }));

    let removed = writer
        .guarded_update_or_conflict(COLLECTIONS, "c-1", CollectionRoleGuard::remove("ana"))
        .await;
    assert!(matches!(removed, Err(ArchiveError::Conflict { .. })));

    let doc = engine.document(COLLECTIONS, "c-1").unwrap().unwrap();
    assert_eq!(doc["roles"][0], json!({ "identity": "ana", "role": "manager" }));
}

#[tokio::test]
async fn test_demotion_allowed_once_another_manager_exists() {
    let engine = engine();
    let writer = writer(&engine, ConflictRetryPolicy::default().without_backoff());

    writer
        .guarded_update_or_conflict(
            COLLECTIONS,
            "c-1",
            CollectionRoleGuard::assign("ben", "manager"),
        )
        .await
        .unwrap();
    writer
        .guarded_update_or_conflict(COLLECTIONS, "c-1", CollectionRoleGuard::remove("ana"))
        .await
        .unwrap();

    let doc = engine.document(COLLECTIONS, "c-1").unwrap().unwrap();
    assert_eq!(doc["roles"], json!([{ "identity": "ben", "role": "manager" }]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_lose_no_updates() {
    let engine = engine();
    engine.inject_version_conflicts(REPORTS, "r-1", 4).unwrap();
    let writer = writer(&engine, ConflictRetryPolicy::default().with_max_retries(100));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let writer = writer.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                writer.increment(REPORTS, "r-1", "views", 1).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let doc = engine.document(REPORTS, "r-1").unwrap().unwrap();
    assert_eq!(doc["views"], 23);
}

#[tokio::test]
async fn test_update_by_query_runs_as_task() {
    let engine = engine();
    engine
        .insert(REPORTS, "r-2", json!({ "name": "Latency", "owner": "ben", "views": 0 }))
        .unwrap();
    engine.set_polls_to_complete(3).unwrap();
    let writer = writer(&engine, ConflictRetryPolicy::default());

    let script = writer.builder().increment("views", 10).unwrap();
    let outcome = writer
        .update_by_query(REPORTS, Query::term("owner", "ben"), script)
        .await
        .unwrap();

    assert_eq!(outcome.updated, 1);
    assert!(outcome.any_rows_affected());
    assert_eq!(engine.document(REPORTS, "r-2").unwrap().unwrap()["views"], 10);
    assert_eq!(engine.document(REPORTS, "r-1").unwrap().unwrap()["views"], 3);
}

#[tokio::test]
async fn test_archiver_exposes_configured_writer() {
    let engine = engine();
    let config = ArchiverConfig::new("node-writer").engine(EngineConfig::Memory);
    let archiver = Archiver::new(
        config,
        Arc::new(engine.clone()),
        Arc::new(ManualClock::new(Utc::now())),
    )
    .unwrap();

    archiver
        .writer()
        .increment(REPORTS, "r-1", "views", 1)
        .await
        .unwrap();
    assert_eq!(engine.document(REPORTS, "r-1").unwrap().unwrap()["views"], 4);
}
