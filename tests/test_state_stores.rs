//! Tests for CheckpointStore implementations: memory, JSON files and SQLite.
//!
//! Every backend runs the same contract checks.

use std::future::Future;
use std::sync::Arc;

use taskrelay::engine::types::{StateDelta, TaskState, status};
use taskrelay::storage::json_store::JsonCheckpointStore;
use taskrelay::storage::memory_store::MemoryCheckpointStore;
use taskrelay::storage::sqlite_store::SqliteCheckpointStore;
use taskrelay::storage::{CheckpointStore, StoreError};

fn task(id: &str) -> TaskState {
    TaskState::new(
        id,
        "case-1",
        status::NEW,
        serde_json::json!({"destination": "台北"}),
    )
}

async fn create_and_load(store: &dyn CheckpointStore) {
    let state = task("t1");
    let version = store.create(&state).await.unwrap();

    let checkpoint = store.load("t1").await.unwrap();
    assert_eq!(checkpoint.version, version);
    assert_eq!(checkpoint.state, state);
    assert_eq!(checkpoint.state.request_payload["destination"], "台北");
}

async fn create_twice_fails(store: &dyn CheckpointStore) {
    store.create(&task("t1")).await.unwrap();
    let err = store.create(&task("t1")).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(id) if id == "t1"));
}

async fn load_missing(store: &dyn CheckpointStore) {
    let err = store.load("nope").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
}

async fn save_bumps_version(store: &dyn CheckpointStore) {
    let v1 = store.create(&task("t1")).await.unwrap();

    let mut state = store.load("t1").await.unwrap().state;
    state.apply(
        StateDelta::to(status::DISPATCHED_A)
            .dispatched("agent_a", "h-1")
            .trace("Task has been dispatched to agent_a. Awaiting result."),
    );
    let v2 = store.save("t1", &state, v1).await.unwrap();
    assert!(v2 > v1);

    let checkpoint = store.load("t1").await.unwrap();
    assert_eq!(checkpoint.version, v2);
    assert_eq!(checkpoint.state.status, status::DISPATCHED_A);
    assert_eq!(checkpoint.state.pending_dispatch["agent_a"].handle, "h-1");
    assert_eq!(checkpoint.state.trace.len(), 1);
}

async fn stale_save_conflicts(store: &dyn CheckpointStore) {
    let v1 = store.create(&task("t1")).await.unwrap();
    let base = store.load("t1").await.unwrap().state;

    let mut first = base.clone();
    first.apply(StateDelta::to(status::DISPATCHED_A));
    let v2 = store.save("t1", &first, v1).await.unwrap();

    // A second writer still holding v1 loses.
    let mut second = base;
    second.apply(StateDelta::to(status::ERROR_A));
    let err = store.save("t1", &second, v1).await.unwrap_err();
    assert!(err.is_conflict(), "{err}");
    match err {
        StoreError::Conflict {
            expected, actual, ..
        } => {
            assert_eq!(expected, v1);
            assert_eq!(actual, v2);
        }
        other => panic!("expected conflict, got {other}"),
    }

    let checkpoint = store.load("t1").await.unwrap();
    assert_eq!(checkpoint.state.status, status::DISPATCHED_A);
}

async fn save_missing_is_not_found(store: &dyn CheckpointStore) {
    let err = store.save("ghost", &task("ghost"), 1).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{err}");
}

async fn list_filters_and_orders(store: &dyn CheckpointStore) {
    for id in ["a", "b", "c"] {
        store.create(&task(id)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let checkpoint = store.load("b").await.unwrap();
    let mut done = checkpoint.state;
    done.apply(StateDelta::to(status::COMPLETED));
    store.save("b", &done, checkpoint.version).await.unwrap();

    let all = store.list(None).await.unwrap();
    let ids: Vec<&str> = all.iter().map(|s| s.task_id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b", "a"], "newest first");

    let completed = store.list(Some(status::COMPLETED)).await.unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].task_id, "b");

    assert!(store.list(Some("no_such_status")).await.unwrap().is_empty());
}

async fn delete_removes(store: &dyn CheckpointStore) {
    store.create(&task("t1")).await.unwrap();
    store.delete("t1").await.unwrap();
    assert!(matches!(
        store.load("t1").await.unwrap_err(),
        StoreError::NotFound(_)
    ));
    assert!(store.list(None).await.unwrap().is_empty());

    // The id is free again.
    store.create(&task("t1")).await.unwrap();
}

async fn concurrent_writers_serialize(store: Arc<dyn CheckpointStore>) {
    store.create(&task("t1")).await.unwrap();

    // Each writer appends one trace line with a read-modify-write loop.
    let writers = (0..8).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            loop {
                let checkpoint = store.load("t1").await.unwrap();
                let mut state = checkpoint.state;
                state.apply(StateDelta::default().trace(format!("writer {i}")));
                match store.save("t1", &state, checkpoint.version).await {
                    Ok(_) => break,
                    Err(e) if e.is_conflict() => tokio::task::yield_now().await,
                    Err(e) => panic!("save failed: {e}"),
                }
            }
        })
    });
    for joined in futures_util::future::join_all(writers).await {
        joined.unwrap();
    }

    let state = store.load("t1").await.unwrap().state;
    assert_eq!(state.trace.len(), 8, "no lost update");
}

async fn run_contract<F, Fut>(make: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Arc<dyn CheckpointStore>>,
{
    create_and_load(&*make().await).await;
    create_twice_fails(&*make().await).await;
    load_missing(&*make().await).await;
    save_bumps_version(&*make().await).await;
    stale_save_conflicts(&*make().await).await;
    save_missing_is_not_found(&*make().await).await;
    list_filters_and_orders(&*make().await).await;
    delete_removes(&*make().await).await;
    concurrent_writers_serialize(make().await).await;
}

// ===== MemoryCheckpointStore =====

#[tokio::test]
async fn memory_store_contract() {
    run_contract(|| async { Arc::new(MemoryCheckpointStore::new()) as Arc<dyn CheckpointStore> })
        .await;
}

// ===== JsonCheckpointStore =====

#[tokio::test]
async fn json_store_contract() {
    let root = tempfile::tempdir().unwrap();
    let counter = std::sync::atomic::AtomicUsize::new(0);
    run_contract(|| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let dir = root.path().join(format!("store-{n}"));
        async move { Arc::new(JsonCheckpointStore::new(dir)) as Arc<dyn CheckpointStore> }
    })
    .await;
}

#[tokio::test]
async fn json_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let version = {
        let store = JsonCheckpointStore::new(dir.path());
        store.create(&task("t1")).await.unwrap()
    };

    let reopened = JsonCheckpointStore::new(dir.path());
    let checkpoint = reopened.load("t1").await.unwrap();
    assert_eq!(checkpoint.version, version);
    assert_eq!(checkpoint.state.correlation_id, "case-1");
}

#[tokio::test]
async fn json_store_list_missing_dir() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonCheckpointStore::new(dir.path().join("never-created"));
    assert!(store.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn json_store_skips_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonCheckpointStore::new(dir.path());
    store.create(&task("t1")).await.unwrap();
    std::fs::write(dir.path().join("notes.json"), "not a checkpoint").unwrap();
    std::fs::write(dir.path().join("README.txt"), "hello").unwrap();

    let all = store.list(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].task_id, "t1");
}

#[tokio::test]
async fn json_store_releases_locks_for_missing_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonCheckpointStore::new(dir.path());

    for i in 0..50 {
        let err = store.load(&format!("missing-{i}")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)), "{err}");
    }
    let v1 = store.create(&task("t1")).await.unwrap();
    let state = store.load("t1").await.unwrap().state;
    store.save("t1", &state, v1).await.unwrap();

    assert_eq!(store.lock_count().await, 0);
}

#[tokio::test]
async fn json_store_rejects_path_like_ids() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("secret.json"), "{}").unwrap();
    let store = JsonCheckpointStore::new(dir.path().join("tasks"));

    for id in ["../secret", "a/b", "..", "", "t1.json"] {
        let err = store.load(id).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidId(_)), "{id:?}: {err}");
    }

    let err = store.create(&task("../escape")).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidId(_)), "{err}");
    assert!(!dir.path().join("escape.json").exists());
    assert_eq!(store.lock_count().await, 0);
}

// ===== SqliteCheckpointStore =====

#[tokio::test]
async fn sqlite_store_contract() {
    run_contract(|| async {
        Arc::new(SqliteCheckpointStore::connect("sqlite::memory:").await.unwrap())
            as Arc<dyn CheckpointStore>
    })
    .await;
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("tasks.db").display());

    let version = {
        let store = SqliteCheckpointStore::connect(&url).await.unwrap();
        store.create(&task("t1")).await.unwrap()
    };

    let reopened = SqliteCheckpointStore::connect(&url).await.unwrap();
    let checkpoint = reopened.load("t1").await.unwrap();
    assert_eq!(checkpoint.version, version);
    assert_eq!(checkpoint.state.correlation_id, "case-1");
}
