use pok_ledger::config::LedgerConfig;
use pok_ledger::core::{PuzzleBank, QuizQuestion};
use pok_ledger::crypto::KeyPair;
use pok_ledger::service::{LedgerHandle, LedgerService, LedgerSnapshot, SyncStatus};
use pok_ledger::storage::ChainStore;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

fn bank() -> Arc<PuzzleBank> {
    let question = QuizQuestion {
        question_id: "ownership-1".into(),
        lesson_id: "ownership".into(),
        question_text: "Which keyword moves a closure's captures?".into(),
        answers: ["ref".into(), "move".into(), "mut".into(), "dyn".into()],
        correct_answer_index: 1,
    };
    Arc::new(PuzzleBank::new(1, vec![question]).unwrap())
}

fn config(data_dir: &Path, network_id: &str) -> LedgerConfig {
    LedgerConfig {
        network_id: network_id.to_string(),
        listen_addr: "127.0.0.1:0".to_string(),
        data_dir: data_dir.to_path_buf(),
        announce_window_ms: 300,
        idle_timeout_secs: 10,
        hello_interval_secs: 1,
        ..LedgerConfig::default()
    }
}

async fn start(config: LedgerConfig) -> (LedgerHandle, String, JoinHandle<()>) {
    let store = ChainStore::open(config.storage_config()).unwrap();
    let mut service = LedgerService::new(config, KeyPair::generate(), store, bank()).unwrap();
    let addr = service.bind().await.unwrap().to_string();
    let handle = service.handle();
    let task = tokio::spawn(async move {
        service.run().await.unwrap();
    });
    (handle, addr, task)
}

/// Poll the node until `ready` holds or five seconds pass
async fn wait_for(handle: &LedgerHandle, ready: impl Fn(&LedgerSnapshot) -> bool) -> LedgerSnapshot {
    for _ in 0..100 {
        let snapshot = handle.snapshot().await.unwrap();
        if ready(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("node never reached the expected state");
}

#[tokio::test]
async fn test_block_propagates_between_nodes() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, _, task_a) = start(config(dir_a.path(), "pok-test")).await;
    let (b, addr_b, task_b) = start(config(dir_b.path(), "pok-test")).await;

    a.connect(addr_b).await.unwrap();
    wait_for(&a, |s| s.peer_count == 1).await;
    wait_for(&b, |s| s.peer_count == 1 && s.sync_status == SyncStatus::Synced).await;

    let offer = a
        .submit_lesson_progress(json!({"lessonId": "ownership", "completed": true}))
        .await
        .unwrap()
        .expect("lesson has a puzzle");
    assert_eq!(offer.question.question_id, "ownership-1");
    wait_for(&b, |s| s.mempool_size == 1).await;

    let hash = a.submit_puzzle_solution(1).await.unwrap();
    let snapshot_a = wait_for(&a, |s| s.height == 1).await;
    let snapshot_b = wait_for(&b, |s| s.height == 1 && s.mempool_size == 0).await;

    assert!(snapshot_a.pending_puzzle.is_none());
    assert_eq!(snapshot_a.leaderboard_data, snapshot_b.leaderboard_data);
    assert_eq!(snapshot_b.leaderboard_data[0].lessons_completed, 1);

    a.shutdown().await;
    b.shutdown().await;
    task_a.await.unwrap();
    task_b.await.unwrap();

    for dir in [dir_a.path(), dir_b.path()] {
        let store = ChainStore::open(config(dir, "pok-test").storage_config()).unwrap();
        assert_eq!(store.height(), Some(1));
        assert_eq!(store.get_latest_block().and_then(|b| b.hash()), Some(hash.as_str()));
        assert!(store.mempool().is_empty());
    }
}

#[tokio::test]
async fn test_wrong_answer_is_not_committed() {
    let dir = tempfile::tempdir().unwrap();
    let (node, _, task) = start(config(dir.path(), "pok-test")).await;

    node.submit_lesson_progress(json!({"lessonId": "ownership"}))
        .await
        .unwrap();
    assert!(node.submit_puzzle_solution(3).await.is_err());

    let snapshot = node.snapshot().await.unwrap();
    assert_eq!(snapshot.height, 0);
    assert_eq!(snapshot.mempool_size, 1);
    assert!(snapshot.pending_puzzle.is_none());

    node.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn test_other_network_never_participates() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, _, task_a) = start(config(dir_a.path(), "pok-test")).await;
    let (b, addr_b, task_b) = start(config(dir_b.path(), "pok-other")).await;

    a.connect(addr_b).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    a.submit_lesson_progress(json!({"lessonId": "ownership"}))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot_a = a.snapshot().await.unwrap();
    let snapshot_b = b.snapshot().await.unwrap();
    assert_eq!(snapshot_a.peer_count, 0);
    assert_eq!(snapshot_b.peer_count, 0);
    assert_eq!(snapshot_a.sync_status, SyncStatus::Offline);
    assert_eq!(snapshot_b.mempool_size, 0);

    a.shutdown().await;
    b.shutdown().await;
    task_a.await.unwrap();
    task_b.await.unwrap();
}
