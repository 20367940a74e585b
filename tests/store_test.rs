//! Store contract tests, run against both the SQLite and in-memory stores.

use serde_json::json;
use strikeq::store::{MemoryStore, Query, SqliteStore, Store};
use strikeq::{Failure, Status, Task, TaskId};

fn task(id: u64, status: Status, fail_count: u32) -> Task {
    let mut task = Task::new(TaskId(id), json!({ "id": id }));
    task.status = status;
    task.fail_count = fail_count;
    task
}

async fn ids(store: &dyn Store, query: Query) -> Vec<u64> {
    store
        .query(&query)
        .await
        .unwrap()
        .iter()
        .map(|t| t.id.0)
        .collect()
}

/// Behavior every store must share.
async fn exercise(store: &dyn Store) {
    store.init().await.unwrap();
    store.init().await.unwrap();

    // Missing keys.
    assert!(store.get(TaskId(1)).await.unwrap_err().is_not_found());
    assert!(store.delete(TaskId(1)).await.unwrap_err().is_not_found());
    assert!(store.counter().await.unwrap_err().is_not_found());

    // Inserted out of order, always read back by ascending id.
    for t in [
        task(4, Status::Fail, 2),
        task(1, Status::Pending, 0),
        task(3, Status::Fail, 1),
        task(2, Status::Success, 0),
        task(0, Status::Running, 0),
    ] {
        store.put(&t).await.unwrap();
    }

    assert_eq!(ids(store, Query::All).await, vec![0, 1, 2, 3, 4]);
    assert_eq!(ids(store, Query::Status(Status::Fail)).await, vec![3, 4]);
    assert_eq!(
        ids(
            store,
            Query::StatusIn(vec![Status::Pending, Status::Running, Status::Fail])
        )
        .await,
        vec![0, 1, 3, 4]
    );
    assert!(ids(store, Query::StatusIn(vec![])).await.is_empty());
    assert_eq!(ids(store, Query::Failed { below: Some(2) }).await, vec![3]);
    assert_eq!(ids(store, Query::Failed { below: None }).await, vec![3, 4]);

    // Replacing a record moves it between index buckets.
    let retried = store.get(TaskId(3)).await.unwrap().started();
    let struck = retried.failed(Failure::new("boom").with_code("E1")).struck_out();
    store.put(&struck).await.unwrap();
    assert_eq!(ids(store, Query::Status(Status::Fail)).await, vec![4]);
    assert_eq!(ids(store, Query::Status(Status::Struckout)).await, vec![3]);

    let reread = store.get(TaskId(3)).await.unwrap();
    assert_eq!(reread, struck);
    assert_eq!(reread.errors[0].code.as_deref(), Some("E1"));

    store.delete(TaskId(3)).await.unwrap();
    assert!(store.get(TaskId(3)).await.unwrap_err().is_not_found());
    assert_eq!(ids(store, Query::All).await, vec![0, 1, 2, 4]);

    store.set_counter(0).await.unwrap();
    store.set_counter(5).await.unwrap();
    assert_eq!(store.counter().await.unwrap(), 5);

    // The block marker lives beside the counter without disturbing it.
    assert_eq!(store.blocker().await.unwrap(), None);
    store.set_blocker(Some(TaskId(4))).await.unwrap();
    store.set_blocker(Some(TaskId(2))).await.unwrap();
    assert_eq!(store.blocker().await.unwrap(), Some(TaskId(2)));
    store.set_blocker(None).await.unwrap();
    store.set_blocker(None).await.unwrap();
    assert_eq!(store.blocker().await.unwrap(), None);
    assert_eq!(store.counter().await.unwrap(), 5);
}

#[tokio::test]
async fn memory_store_contract() {
    exercise(&MemoryStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::connect(dir.path().join("contract.db")).await.unwrap();
    exercise(&store).await;
    store.close().await.unwrap();
}

#[tokio::test]
async fn sqlite_store_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a").join("b").join("queue.db");

    let store = SqliteStore::connect(&path).await.unwrap();
    store.put(&task(0, Status::Pending, 0)).await.unwrap();
    store.close().await.unwrap();

    assert!(path.exists());
}

#[tokio::test]
async fn sqlite_store_is_durable_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let store = SqliteStore::connect(&path).await.unwrap();
    let original = task(7, Status::Pending, 0).started().succeeded(json!([1, 2, 3]));
    store.put(&original).await.unwrap();
    store.set_counter(8).await.unwrap();
    store.close().await.unwrap();

    let store = SqliteStore::connect(&path).await.unwrap();
    assert_eq!(store.get(TaskId(7)).await.unwrap(), original);
    assert_eq!(store.counter().await.unwrap(), 8);
    store.close().await.unwrap();
}

#[tokio::test]
async fn sqlite_body_uses_camel_case_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::connect(dir.path().join("shape.db")).await.unwrap();
    store.put(&task(0, Status::Fail, 2)).await.unwrap();

    let body: String = sqlx::query_scalar("SELECT body FROM tasks WHERE id = 0")
        .fetch_one(store.pool())
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["failCount"], 2);
    assert_eq!(value["status"], "fail");

    let indexes: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'index' ORDER BY name")
            .fetch_all(store.pool())
            .await
            .unwrap();
    assert!(indexes.contains(&"idx_tasks_status".to_string()));
    assert!(indexes.contains(&"idx_tasks_fail_count".to_string()));
    store.close().await.unwrap();
}
