use archivist::core::{ProcessInstanceRecord, ProcessInstanceState, TaskKind};
use archivist::engine::{BulkMutationClient, ConflictMode, InMemorySearchEngine, Query};
use archivist::mutation::ScriptTemplateRegistry;
use archivist::task::{MutationRequest, PollBackoffPolicy, TaskPoller};
use archivist::{ArchiveError, ScriptedMutationBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const INDEX: &str = "operate-list-view";

fn engine_with_instances(count: i64) -> InMemorySearchEngine {
    let engine = InMemorySearchEngine::new().with_indices(&[INDEX]).unwrap();
    for key in 1..=count {
        let record = ProcessInstanceRecord::instance(key, 1, ProcessInstanceState::Active, None);
        engine
            .insert_record(INDEX, &record.document_id(), &record)
            .unwrap();
    }
    engine
}

fn poller(engine: &InMemorySearchEngine, backoff: PollBackoffPolicy) -> TaskPoller {
    let client: Arc<dyn BulkMutationClient> = Arc::new(engine.clone());
    TaskPoller::new(client, backoff)
}

fn builder() -> ScriptedMutationBuilder {
    ScriptedMutationBuilder::new(Arc::new(ScriptTemplateRegistry::builtin().unwrap()))
}

#[tokio::test]
async fn test_update_by_query_reports_counts_after_progress() {
    let engine = engine_with_instances(4);
    engine.set_polls_to_complete(3).unwrap();
    let poller = poller(&engine, PollBackoffPolicy::fixed(1, 10));

    let script = builder().increment("retries", 1).unwrap();
    let outcome = poller
        .run(&MutationRequest::UpdateByQuery {
            index: INDEX.to_string(),
            query: Query::MatchAll,
            script,
            conflicts: ConflictMode::Abort,
        })
        .await
        .unwrap();

    assert_eq!(outcome.total, 4);
    assert_eq!(outcome.updated, 4);
    assert!(outcome.any_rows_affected());
    assert_eq!(engine.document(INDEX, "3").unwrap().unwrap()["retries"], 1);
}

#[tokio::test]
async fn test_update_by_query_fails_on_version_conflict_when_aborting() {
    let engine = engine_with_instances(3);
    engine.inject_version_conflicts(INDEX, "2", 1).unwrap();
    let poller = poller(&engine, PollBackoffPolicy::fixed(1, 10));

    let script = builder().increment("retries", 1).unwrap();
    let result = poller
        .run(&MutationRequest::UpdateByQuery {
            index: INDEX.to_string(),
            query: Query::MatchAll,
            script,
            conflicts: ConflictMode::Abort,
        })
        .await;

    match result {
        Err(ArchiveError::TaskFailure { reason, .. }) => {
            assert!(reason.starts_with("version_conflict_engine_exception"), "{}", reason)
        }
        other => panic!("expected task failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_update_by_query_reports_skipped_conflicts_when_proceeding() {
    let engine = engine_with_instances(3);
    let before = engine.document(INDEX, "2").unwrap().unwrap();
    engine.inject_version_conflicts(INDEX, "2", 1).unwrap();
    let poller = poller(&engine, PollBackoffPolicy::fixed(1, 10));

    let script = builder().increment("retries", 1).unwrap();
    let outcome = poller
        .run(&MutationRequest::UpdateByQuery {
            index: INDEX.to_string(),
            query: Query::MatchAll,
            script,
            conflicts: ConflictMode::Proceed,
        })
        .await
        .unwrap();

    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.updated, 2);
    assert_eq!(outcome.version_conflicts, 1);
    assert!(outcome.skipped_on_conflict());
    assert_eq!(engine.document(INDEX, "2").unwrap().unwrap(), before);
}

#[tokio::test]
async fn test_delete_by_query_skips_documents_rewritten_while_running() {
    let engine = engine_with_instances(3);
    engine.set_polls_to_complete(3).unwrap();
    let poller = poller(&engine, PollBackoffPolicy::fixed(1, 10));

    let handle = poller
        .submit(&MutationRequest::DeleteByQuery {
            index: INDEX.to_string(),
            query: Query::MatchAll,
            conflicts: ConflictMode::Proceed,
        })
        .await
        .unwrap();
    let mut rewritten = engine.document(INDEX, "1").unwrap().unwrap();
    rewritten["retries"] = 7.into();
    engine.insert(INDEX, "1", rewritten.clone()).unwrap();

    let outcome = poller.wait(&handle).await.unwrap();

    assert_eq!(outcome.deleted, 2);
    assert_eq!(outcome.version_conflicts, 1);
    assert_eq!(engine.document(INDEX, "1").unwrap(), Some(rewritten));
    assert!(!engine.contains(INDEX, "2").unwrap());
}

#[tokio::test]
async fn test_completed_task_without_matches_affects_no_rows() {
    let engine = engine_with_instances(2);
    let poller = poller(&engine, PollBackoffPolicy::fixed(1, 10));

    let outcome = poller
        .run(&MutationRequest::DeleteByQuery {
            index: INDEX.to_string(),
            query: Query::term("key", 999),
            conflicts: ConflictMode::Proceed,
        })
        .await
        .unwrap();

    assert_eq!(outcome.updated, 0);
    assert_eq!(outcome.deleted, 0);
    assert!(!outcome.any_rows_affected());
    assert_eq!(engine.count(INDEX).unwrap(), 2);
}

#[tokio::test]
async fn test_task_error_raises_task_failure() {
    let engine = engine_with_instances(2);
    engine
        .fail_task(TaskKind::Delete, INDEX, "search_phase_execution_exception")
        .unwrap();
    let poller = poller(&engine, PollBackoffPolicy::fixed(1, 10));

    let result = poller
        .run(&MutationRequest::DeleteByQuery {
            index: INDEX.to_string(),
            query: Query::MatchAll,
            conflicts: ConflictMode::Proceed,
        })
        .await;

    match result {
        Err(ArchiveError::TaskFailure { reason, .. }) => {
            assert_eq!(reason, "search_phase_execution_exception")
        }
        other => panic!("expected task failure, got {:?}", other),
    }
    assert_eq!(engine.count(INDEX).unwrap(), 2);
}

#[tokio::test]
async fn test_status_read_failure_is_not_retried() {
    let engine = engine_with_instances(1);
    engine.fail_status_reads(1).unwrap();
    let poller = poller(&engine, PollBackoffPolicy::fixed(1, 10));

    let result = poller
        .run(&MutationRequest::DeleteByQuery {
            index: INDEX.to_string(),
            query: Query::MatchAll,
            conflicts: ConflictMode::Proceed,
        })
        .await;

    assert!(matches!(result, Err(ArchiveError::Poll { .. })));
    // A second status read would have succeeded and deleted the document.
    assert_eq!(engine.count(INDEX).unwrap(), 1);
}

#[tokio::test]
async fn test_exhausted_attempts_raise_poll_timeout() {
    let engine = engine_with_instances(3);
    engine.set_polls_to_complete(50).unwrap();
    let poller = poller(&engine, PollBackoffPolicy::fixed(1, 3));

    let result = poller
        .run(&MutationRequest::DeleteByQuery {
            index: INDEX.to_string(),
            query: Query::MatchAll,
            conflicts: ConflictMode::Proceed,
        })
        .await;

    match result {
        Err(err @ ArchiveError::PollTimeout { attempts, .. }) => {
            assert_eq!(attempts, 3);
            assert!(err.is_recoverable());
        }
        other => panic!("expected poll timeout, got {:?}", other),
    }
    assert_eq!(engine.count(INDEX).unwrap(), 3);
}

#[tokio::test]
async fn test_rejected_submission_raises_submission_error() {
    let engine = engine_with_instances(1);
    let poller = poller(&engine, PollBackoffPolicy::fixed(1, 3));

    let result = poller
        .run(&MutationRequest::Reindex {
            source_index: "operate-missing".to_string(),
            dest_index: "operate-missing-2026-01-01".to_string(),
            query: Query::MatchAll,
        })
        .await;

    match result {
        Err(ArchiveError::Submission { operation, index, .. }) => {
            assert_eq!(operation, "reindex");
            assert_eq!(index, "operate-missing");
        }
        other => panic!("expected submission error, got {:?}", other),
    }
    assert!(engine.submitted_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_interrupts_wait() {
    let engine = engine_with_instances(2);
    engine.set_polls_to_complete(1_000).unwrap();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let poller = poller(&engine, PollBackoffPolicy::fixed(60_000, 100)).with_shutdown(shutdown_rx);

    let handle = poller
        .submit(&MutationRequest::DeleteByQuery {
            index: INDEX.to_string(),
            query: Query::MatchAll,
            conflicts: ConflictMode::Proceed,
        })
        .await
        .unwrap();

    let waiting = {
        let poller = poller.clone();
        let handle = handle.clone();
        tokio::spawn(async move { poller.wait(&handle).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap();
    match result {
        Err(ArchiveError::Interrupted { task_id }) => assert_eq!(task_id, handle.id),
        other => panic!("expected interruption, got {:?}", other),
    }
    assert_eq!(engine.count(INDEX).unwrap(), 2);
}
