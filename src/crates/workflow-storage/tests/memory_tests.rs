use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use workflow_storage::{
    EventKind, EventRecord, ExecutionFilter, InMemoryStorage, Page, StorageError, StoragePort,
};

#[tokio::test]
async fn snapshot_versions_are_monotonic_and_write_once() {
    let storage = InMemoryStorage::new();
    let execution_id = Uuid::new_v4();

    storage
        .put_snapshot(execution_id, 0, json!({"status": "pending"}))
        .await
        .unwrap();
    storage
        .put_snapshot(execution_id, 1, json!({"status": "running"}))
        .await
        .unwrap();

    let err = storage
        .put_snapshot(execution_id, 1, json!({"status": "tampered"}))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::VersionConflict { version: 1, .. }));

    let (version, blob) = storage.latest_snapshot(execution_id).await.unwrap().unwrap();
    assert_eq!(version, 1);
    assert_eq!(blob["status"], "running");
}

#[tokio::test]
async fn events_get_monotonic_sequence_numbers() {
    let storage = InMemoryStorage::new();
    let execution_id = Uuid::new_v4();

    let e1 = storage
        .append_event(EventRecord {
            execution_id,
            seq: 0,
            wallclock: Utc::now(),
            kind: EventKind::ExecutionStarted,
        })
        .await
        .unwrap();
    let e2 = storage
        .append_event(EventRecord {
            execution_id,
            seq: 0,
            wallclock: Utc::now(),
            kind: EventKind::NodeStarted {
                node_id: "0".into(),
                attempt: 1,
            },
        })
        .await
        .unwrap();

    assert_eq!(e1.seq, 0);
    assert_eq!(e2.seq, 1);

    let events = storage.read_events(execution_id, 0).await.unwrap();
    assert_eq!(events.len(), 2);
    let events_from_1 = storage.read_events(execution_id, 1).await.unwrap();
    assert_eq!(events_from_1.len(), 1);
}

#[tokio::test]
async fn lease_is_exclusive_until_released() {
    let storage = InMemoryStorage::new();
    let execution_id = Uuid::new_v4();

    let token = storage.acquire_lease(execution_id, "scheduler-a", 10_000).await.unwrap();
    let conflict = storage.acquire_lease(execution_id, "scheduler-b", 10_000).await;
    assert!(conflict.is_err());

    storage.release_lease(&token).await.unwrap();
    let token2 = storage.acquire_lease(execution_id, "scheduler-b", 10_000).await;
    assert!(token2.is_ok());
}

#[tokio::test]
async fn delete_refuses_while_lease_held() {
    let storage = InMemoryStorage::new();
    let execution_id = Uuid::new_v4();
    let token = storage.acquire_lease(execution_id, "scheduler-a", 10_000).await.unwrap();

    let err = storage.delete_execution(execution_id).await.unwrap_err();
    assert!(matches!(err, StorageError::LeaseHeld(_)));

    storage.release_lease(&token).await.unwrap();
    storage.delete_execution(execution_id).await.unwrap();
}

#[tokio::test]
async fn list_executions_filters_by_flow_id() {
    let storage = InMemoryStorage::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    storage
        .put_snapshot(a, 0, json!({"flow_id": "checkout", "status": "completed"}))
        .await
        .unwrap();
    storage
        .put_snapshot(b, 0, json!({"flow_id": "onboarding", "status": "running"}))
        .await
        .unwrap();

    let filter = ExecutionFilter {
        flow_id: Some("checkout".to_string()),
        ..Default::default()
    };
    let page = storage.list_executions(filter, Page::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].execution_id, a);
}

#[tokio::test]
async fn list_executions_filters_by_created_at_range() {
    let storage = InMemoryStorage::new();
    let old = Uuid::new_v4();
    let recent = Uuid::new_v4();
    let now = Utc::now();
    let yesterday = now - chrono::Duration::days(1);

    storage
        .put_snapshot(
            old,
            0,
            json!({"flow_id": "checkout", "status": "completed", "created_at": yesterday.to_rfc3339()}),
        )
        .await
        .unwrap();
    storage
        .put_snapshot(
            recent,
            0,
            json!({"flow_id": "checkout", "status": "completed", "created_at": now.to_rfc3339()}),
        )
        .await
        .unwrap();

    let filter = ExecutionFilter {
        created_after: Some(now - chrono::Duration::hours(1)),
        ..Default::default()
    };
    let page = storage.list_executions(filter, Page::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].execution_id, recent);
}
