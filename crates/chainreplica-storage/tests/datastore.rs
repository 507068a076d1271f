//! End-to-end replication over the control channel, on both backends.

use std::sync::Arc;
use std::time::Duration;

use chainreplica_core::record::{encode_record, SPECIFIER_LEN};
use chainreplica_core::{
    Block, BlockId, ConsensusChange, ConsensusChangeId, DataStore, Database, DataStoreBuilder, MemoryConsensusSet,
    Namespace, ReplicationMode, Transaction,
};
use chainreplica_storage::{InMemoryDatabase, SqliteDatabase};

fn ns(s: &str) -> Namespace {
    Namespace::load_str(s).unwrap()
}

fn blob(namespace: &str, payload: &[u8]) -> Vec<u8> {
    encode_record(&[7u8; SPECIFIER_LEN], &ns(namespace), payload)
}

fn change(n: u8, reverted: Vec<Block>, applied: Vec<Block>) -> ConsensusChange {
    ConsensusChange {
        id: ConsensusChangeId([n; 32]),
        reverted_blocks: reverted,
        applied_blocks: applied,
    }
}

fn block(n: u8, blobs: Vec<Vec<u8>>) -> Block {
    Block::new(BlockId([n; 32]), 1_000 + n as u64, vec![Transaction::with_data(blobs)])
}

async fn open(
    dir: &tempfile::TempDir,
    cs: &Arc<MemoryConsensusSet>,
    db: Arc<dyn chainreplica_core::Database>,
    mode: ReplicationMode,
) -> DataStore {
    DataStoreBuilder::new()
        .persist_dir(dir.path())
        .chain("test")
        .maturity_delay(2)
        .replication(mode)
        .log_level("debug")
        .consensus(cs.clone())
        .storage(db)
        .build()
        .await
        .unwrap()
}

/// Poll until `f` holds, for at most two seconds.
async fn eventually<F, Fut>(mut f: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if f().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn subscribed(ds: &DataStore, namespace: &str) -> bool {
    match ds.manager(&ns(namespace)).await {
        Some(nsm) => nsm.is_subscribed().await,
        None => false,
    }
}

// ─── In-memory backend ───────────────────────────────────────────────────────

#[tokio::test]
async fn memory_subscribe_replays_and_follows() {
    let dir = tempfile::tempdir().unwrap();
    let cs = Arc::new(MemoryConsensusSet::new());
    let db = Arc::new(InMemoryDatabase::new());

    cs.apply(change(1, vec![], vec![block(1, vec![blob("abcd", b"one"), blob("zzzz", b"skip")])]))
        .await;
    let ds = open(&dir, &cs, db.clone(), ReplicationMode::Immediate).await;

    assert!(db.publish("subscribe:abcd"));
    eventually(|| subscribed(&ds, "abcd")).await;
    assert_eq!(db.records(ns("abcd")), vec![(0, b"one".to_vec())]);
    assert_eq!(db.data_count(ns("zzzz")), 0);

    let b2 = block(2, vec![blob("abcd", b"two")]);
    cs.apply(change(2, vec![], vec![b2.clone()])).await;
    assert_eq!(db.get_data(ns("abcd"), 1).unwrap(), b"two");

    // Reorg: block 2 is replaced by an empty block.
    cs.apply(change(3, vec![b2], vec![block(3, vec![])])).await;
    assert!(db.get_data(ns("abcd"), 1).is_none());

    let state = db.manager_state(ns("abcd")).unwrap();
    assert_eq!(state.block_height, 2);
    assert_eq!(state.data_id, 1);
    assert_eq!(state.recent_change_id, ConsensusChangeId([3; 32]));

    ds.close().await.unwrap();
    assert!(db.is_closed());
    assert_eq!(cs.subscriber_count(), 0);
}

#[tokio::test]
async fn memory_unsubscribe_drops_manager_state() {
    let dir = tempfile::tempdir().unwrap();
    let cs = Arc::new(MemoryConsensusSet::new());
    let db = Arc::new(InMemoryDatabase::new());
    let ds = open(&dir, &cs, db.clone(), ReplicationMode::Immediate).await;

    db.publish("subscribe:abcd");
    eventually(|| subscribed(&ds, "abcd")).await;
    db.publish("unsubscribe:abcd");
    eventually(|| async { ds.namespaces().await.is_empty() }).await;

    assert!(db.manager_state(ns("abcd")).is_none());
    assert_eq!(cs.subscriber_count(), 0);
    ds.close().await.unwrap();
}

#[tokio::test]
async fn memory_start_timestamp_filters_old_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let cs = Arc::new(MemoryConsensusSet::new());
    let db = Arc::new(InMemoryDatabase::new());
    cs.apply(change(1, vec![], vec![block(1, vec![blob("abcd", b"old")])]))
        .await;
    cs.apply(change(2, vec![], vec![block(5, vec![blob("abcd", b"new")])]))
        .await;
    let ds = open(&dir, &cs, db.clone(), ReplicationMode::Immediate).await;

    db.publish("subscribe:abcd:1003");
    eventually(|| subscribed(&ds, "abcd")).await;

    // The skipped record still consumed id 0.
    assert_eq!(db.records(ns("abcd")), vec![(1, b"new".to_vec())]);
    ds.close().await.unwrap();
}

#[tokio::test]
async fn memory_matured_mode_waits_for_maturity() {
    let dir = tempfile::tempdir().unwrap();
    let cs = Arc::new(MemoryConsensusSet::new());
    let db = Arc::new(InMemoryDatabase::new());
    let ds = open(&dir, &cs, db.clone(), ReplicationMode::Matured).await;

    db.publish("subscribe:abcd");
    eventually(|| subscribed(&ds, "abcd")).await;

    cs.apply(change(1, vec![], vec![block(1, vec![blob("abcd", b"one")])]))
        .await;
    let b2 = block(2, vec![blob("abcd", b"orphan")]);
    cs.apply(change(2, vec![], vec![b2.clone()])).await;
    assert_eq!(db.data_count(ns("abcd")), 0);

    // Reorg inside the window never touches storage.
    cs.apply(change(3, vec![b2], vec![block(3, vec![blob("abcd", b"canon")])]))
        .await;
    assert_eq!(db.data_count(ns("abcd")), 0);

    cs.apply(change(4, vec![], vec![block(4, vec![])])).await;
    assert_eq!(db.records(ns("abcd")), vec![(0, b"one".to_vec())]);
    cs.apply(change(5, vec![], vec![block(5, vec![])])).await;
    assert_eq!(
        db.records(ns("abcd")),
        vec![(0, b"one".to_vec()), (1, b"canon".to_vec())]
    );
    ds.close().await.unwrap();
}

#[tokio::test]
async fn memory_restart_skips_corrupt_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let cs = Arc::new(MemoryConsensusSet::new());
    let db = Arc::new(InMemoryDatabase::new());

    let ds = open(&dir, &cs, db.clone(), ReplicationMode::Immediate).await;
    db.publish("subscribe:abcd");
    eventually(|| subscribed(&ds, "abcd")).await;
    cs.apply(change(1, vec![], vec![block(1, vec![blob("abcd", b"one")])]))
        .await;
    ds.close().await.unwrap();

    db.insert_checkpoint(ns("junk"), b"not a checkpoint".to_vec());
    cs.apply(change(2, vec![], vec![block(2, vec![blob("abcd", b"two")])]))
        .await;

    let ds = open(&dir, &cs, db.clone(), ReplicationMode::Immediate).await;
    eventually(|| subscribed(&ds, "abcd")).await;
    assert_eq!(ds.namespaces().await, vec![ns("abcd")]);
    assert_eq!(
        db.records(ns("abcd")),
        vec![(0, b"one".to_vec()), (1, b"two".to_vec())]
    );
    ds.close().await.unwrap();
}

// ─── SQLite backend ──────────────────────────────────────────────────────────

#[tokio::test]
async fn sqlite_control_table_drives_replication() {
    let dir = tempfile::tempdir().unwrap();
    let cs = Arc::new(MemoryConsensusSet::new());
    let db = Arc::new(
        SqliteDatabase::in_memory()
            .await
            .unwrap()
            .with_poll_interval(Duration::from_millis(10)),
    );
    cs.apply(change(1, vec![], vec![block(1, vec![blob("abcd", b"one")])]))
        .await;

    let ds = open(&dir, &cs, db.clone(), ReplicationMode::Immediate).await;
    db.publish_control("subscribe:abcd").await.unwrap();
    db.publish_control("bogus").await.unwrap();
    eventually(|| subscribed(&ds, "abcd")).await;
    assert_eq!(db.get_data(ns("abcd"), 0).await.unwrap().unwrap(), b"one");

    // Duplicate subscribe replaces the manager and replays from genesis.
    let first = ds.manager(&ns("abcd")).await.unwrap();
    db.publish_control("subscribe:abcd:0").await.unwrap();
    eventually(|| async {
        match ds.manager(&ns("abcd")).await {
            Some(nsm) => !Arc::ptr_eq(&nsm, &first) && nsm.is_subscribed().await,
            None => false,
        }
    })
    .await;
    assert_eq!(cs.subscriber_count(), 1);
    assert_eq!(db.data_count(ns("abcd")).await.unwrap(), 1);

    db.publish_control("unsubscribe:abcd").await.unwrap();
    eventually(|| async { ds.namespaces().await.is_empty() }).await;
    assert!(db.load_managers().await.unwrap().is_empty());

    ds.close().await.unwrap();
}

#[tokio::test]
async fn sqlite_replica_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replica.db");
    let path = path.to_str().unwrap().to_string();
    let cs = Arc::new(MemoryConsensusSet::new());

    let db = Arc::new(
        SqliteDatabase::open(&path)
            .await
            .unwrap()
            .with_poll_interval(Duration::from_millis(10)),
    );
    let ds = open(&dir, &cs, db.clone(), ReplicationMode::Matured).await;
    db.publish_control("subscribe:abcd").await.unwrap();
    eventually(|| subscribed(&ds, "abcd")).await;
    cs.apply(change(1, vec![], vec![block(1, vec![blob("abcd", b"one")])]))
        .await;
    cs.apply(change(2, vec![], vec![block(2, vec![blob("abcd", b"two")])]))
        .await;
    ds.close().await.unwrap();

    // Both blocks are still pending; the checkpoint carries them.
    let db = Arc::new(
        SqliteDatabase::open(&path)
            .await
            .unwrap()
            .with_poll_interval(Duration::from_millis(10)),
    );
    assert_eq!(db.data_count(ns("abcd")).await.unwrap(), 0);

    let ds = open(&dir, &cs, db.clone(), ReplicationMode::Matured).await;
    eventually(|| subscribed(&ds, "abcd")).await;
    cs.apply(change(3, vec![], vec![block(3, vec![])])).await;
    assert_eq!(db.get_data(ns("abcd"), 0).await.unwrap().unwrap(), b"one");
    assert!(db.get_data(ns("abcd"), 1).await.unwrap().is_none());

    let nsm = ds.manager(&ns("abcd")).await.unwrap();
    assert_eq!(nsm.state().await.block_height, 3);
    assert_eq!(nsm.pending_blocks().await, 2);
    ds.close().await.unwrap();
}
