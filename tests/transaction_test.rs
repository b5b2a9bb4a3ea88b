//! Integration tests for transaction lifecycle and connection factories.

use db_pager::config::PoolOptions;
use db_pager::db::{
    ConnectionFactory, PoolConnectionFactory, Record, Transaction, UrlConnectionFactory,
};
use db_pager::error::DbError;
use db_pager::impl_record;
use db_pager::models::{DatabaseType, IsolationLevel};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

#[derive(Debug, Default, Clone, PartialEq)]
struct Item {
    id: i64,
    label: String,
}

impl_record!(Item { id, label });

fn test_db_url(dir: &TempDir) -> String {
    format!("sqlite:{}?mode=rwc", dir.path().join("tx.db").display())
}

async fn setup_test_db() -> (TempDir, UrlConnectionFactory) {
    let dir = tempfile::tempdir().unwrap();
    let factory = UrlConnectionFactory::new(test_db_url(&dir)).unwrap();

    let tx = factory
        .new_transaction(true, IsolationLevel::Default)
        .await
        .unwrap();
    tx.update("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL)")
        .await
        .unwrap();
    tx.close().await;

    (dir, factory)
}

async fn insert_item(tx: &Transaction, id: i64, label: &str) {
    let query = tx
        .prepare("INSERT INTO items (id, label) VALUES (?, ?)")
        .await
        .unwrap();
    query.bind(id).bind(label);
    assert_eq!(query.update().await.unwrap(), 1);
}

async fn item_ids(tx: &Transaction) -> Vec<i64> {
    let query = tx
        .prepare("SELECT id, label FROM items ORDER BY id")
        .await
        .unwrap();
    let items = query.result_list::<Item>().await.unwrap();
    tx.close_query(&query).await;
    items.iter().map(|item| item.id).collect()
}

#[tokio::test]
async fn test_transaction_metadata() {
    let (_dir, factory) = setup_test_db().await;
    let tx = factory
        .new_transaction(false, IsolationLevel::Serializable)
        .await
        .unwrap();

    assert!(tx.id().starts_with("tx_"));
    assert_eq!(tx.db_type(), DatabaseType::SQLite);
    assert!(!tx.auto_commit());
    assert_eq!(tx.isolation(), IsolationLevel::Serializable);
    assert!(tx.opened_at() <= chrono::Utc::now());
    assert!(!tx.is_closed().await);
    tx.close().await;
}

#[tokio::test]
async fn test_commit_is_durable_and_close_rolls_back_the_rest() {
    let (_dir, factory) = setup_test_db().await;

    let tx = factory
        .new_transaction(false, IsolationLevel::Default)
        .await
        .unwrap();
    insert_item(&tx, 1, "committed").await;
    tx.commit().await.unwrap();

    // Still transactional after commit
    insert_item(&tx, 2, "pending").await;
    assert_eq!(item_ids(&tx).await, vec![1, 2]);
    tx.close().await;

    let check = factory
        .new_transaction(false, IsolationLevel::Default)
        .await
        .unwrap();
    assert_eq!(item_ids(&check).await, vec![1]);
    check.close().await;
}

#[tokio::test]
async fn test_rollback_discards_pending_work() {
    let (_dir, factory) = setup_test_db().await;
    let tx = factory
        .new_transaction(false, IsolationLevel::Default)
        .await
        .unwrap();

    insert_item(&tx, 7, "discarded").await;
    assert_eq!(item_ids(&tx).await, vec![7]);
    tx.rollback().await.unwrap();
    assert!(item_ids(&tx).await.is_empty());

    insert_item(&tx, 8, "kept").await;
    tx.commit().await.unwrap();
    assert_eq!(item_ids(&tx).await, vec![8]);
    tx.close().await;
}

#[tokio::test]
async fn test_auto_commit_rejects_commit_and_rollback() {
    let (_dir, factory) = setup_test_db().await;
    let tx = factory
        .new_transaction(true, IsolationLevel::Default)
        .await
        .unwrap();

    insert_item(&tx, 1, "auto").await;
    assert!(matches!(
        tx.commit().await,
        Err(DbError::Transaction { .. })
    ));
    assert!(matches!(
        tx.rollback().await,
        Err(DbError::Transaction { .. })
    ));
    tx.close().await;

    let check = factory
        .new_transaction(true, IsolationLevel::Default)
        .await
        .unwrap();
    assert_eq!(item_ids(&check).await, vec![1]);
    check.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_releases_once() {
    let (_dir, factory) = setup_test_db().await;
    let stats = factory.stats();

    let tx = factory
        .new_transaction(false, IsolationLevel::Default)
        .await
        .unwrap();
    let query = tx.prepare("SELECT id FROM items").await.unwrap();
    assert_eq!(tx.query_count().await, 1);

    tx.close().await;
    tx.close().await;

    assert!(tx.is_closed().await);
    assert!(query.is_closed().await);
    assert_eq!(tx.query_count().await, 0);
    // Setup transaction plus this one
    assert_eq!(stats.open_count(), 2);
    assert_eq!(stats.release_count(), 2);
    assert_eq!(stats.active(), 0);
}

#[tokio::test]
async fn test_operations_after_close_fail() {
    let (_dir, factory) = setup_test_db().await;
    let tx = factory
        .new_transaction(false, IsolationLevel::Default)
        .await
        .unwrap();
    tx.close().await;

    assert!(matches!(
        tx.prepare("SELECT 1").await,
        Err(DbError::Transaction { .. })
    ));
    assert!(matches!(tx.commit().await, Err(DbError::Transaction { .. })));
    assert!(matches!(
        tx.rollback().await,
        Err(DbError::Transaction { .. })
    ));
    assert!(matches!(
        tx.update("DELETE FROM items").await,
        Err(DbError::Transaction { .. })
    ));
}

#[tokio::test]
async fn test_update_returns_rows_affected() {
    let (_dir, factory) = setup_test_db().await;
    let tx = factory
        .new_transaction(false, IsolationLevel::Default)
        .await
        .unwrap();

    for id in 1..=4 {
        insert_item(&tx, id, "bulk").await;
    }
    let changed = tx
        .update("UPDATE items SET label = 'even' WHERE id % 2 = 0")
        .await
        .unwrap();
    assert_eq!(changed, 2);
    tx.close().await;
}

#[tokio::test]
async fn test_read_uncommitted_begins_on_sqlite() {
    let (_dir, factory) = setup_test_db().await;
    let tx = factory
        .new_transaction(false, IsolationLevel::ReadUncommitted)
        .await
        .unwrap();
    insert_item(&tx, 1, "dirty").await;
    tx.commit().await.unwrap();
    tx.close().await;
}

#[tokio::test]
async fn test_url_suffix_is_appended() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("suffix.db");
    let factory = UrlConnectionFactory::new(format!("sqlite:{}", path.display())).unwrap();

    // The file does not exist yet; only the suffix lets the driver create it
    let tx = factory
        .new_transaction_with_suffix(true, IsolationLevel::Default, Some("?mode=rwc"))
        .await
        .unwrap();
    tx.close().await;
    assert!(path.exists());
}

#[tokio::test]
async fn test_connect_failure_is_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!(
        "sqlite:{}?mode=ro",
        dir.path().join("missing.db").display()
    );
    let factory = UrlConnectionFactory::new(url).unwrap();

    let err = factory
        .new_transaction(false, IsolationLevel::Default)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(err.suggestion().is_some());
    assert_eq!(factory.stats().open_count(), 0);
}

#[tokio::test]
async fn test_pooled_factory_returns_connections() {
    let (dir, _) = setup_test_db().await;
    let factory = PoolConnectionFactory::connect(&test_db_url(&dir), &PoolOptions::default())
        .await
        .unwrap();
    assert_eq!(factory.db_type(), DatabaseType::SQLite);

    // SQLite pools default to one connection, so the second transaction
    // only succeeds if the first one gave its connection back
    for id in 1..=2 {
        let tx = factory
            .new_transaction(false, IsolationLevel::Default)
            .await
            .unwrap();
        insert_item(&tx, id, "pooled").await;
        tx.commit().await.unwrap();
        tx.close().await;
    }

    let tx = factory
        .new_transaction(true, IsolationLevel::Default)
        .await
        .unwrap();
    assert_eq!(item_ids(&tx).await, vec![1, 2]);
    tx.close().await;

    let stats = factory.stats();
    assert_eq!(stats.open_count(), 3);
    assert_eq!(stats.active(), 0);
    factory.close().await;
}

#[tokio::test]
async fn test_close_racing_commit_releases_once() {
    let (_dir, factory) = setup_test_db().await;
    let stats = factory.stats();

    let tx = factory
        .new_transaction(false, IsolationLevel::Default)
        .await
        .unwrap();
    insert_item(&tx, 1, "raced").await;

    let (committed, ()) = timeout(Duration::from_secs(10), async {
        tokio::join!(tx.commit(), tx.close())
    })
    .await
    .expect("commit and close deadlocked");

    // Whichever ran second sees the outcome of the first
    match &committed {
        Ok(()) => {}
        Err(e) => assert!(matches!(e, DbError::Transaction { .. }), "{e:?}"),
    }
    assert!(tx.is_closed().await);
    assert_eq!(stats.open_count(), 2);
    assert_eq!(stats.release_count(), 2);

    let check = factory
        .new_transaction(true, IsolationLevel::Default)
        .await
        .unwrap();
    let expected: Vec<i64> = if committed.is_ok() { vec![1] } else { vec![] };
    assert_eq!(item_ids(&check).await, expected);
    check.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_rollback_and_close_from_tasks() {
    let (_dir, factory) = setup_test_db().await;
    let stats = factory.stats();

    let tx = Arc::new(
        factory
            .new_transaction(false, IsolationLevel::Default)
            .await
            .unwrap(),
    );
    insert_item(&tx, 5, "discarded").await;

    let rolling = {
        let tx = Arc::clone(&tx);
        tokio::spawn(async move { tx.rollback().await })
    };
    let closing = {
        let tx = Arc::clone(&tx);
        tokio::spawn(async move { tx.close().await })
    };
    let second_close = {
        let tx = Arc::clone(&tx);
        tokio::spawn(async move { tx.close().await })
    };

    let (rolled, closed, closed_again) = timeout(Duration::from_secs(10), async {
        tokio::join!(rolling, closing, second_close)
    })
    .await
    .expect("rollback and close deadlocked");
    closed.unwrap();
    closed_again.unwrap();
    if let Err(e) = rolled.unwrap() {
        assert!(matches!(e, DbError::Transaction { .. }), "{e:?}");
    }

    assert!(tx.is_closed().await);
    assert_eq!(stats.release_count(), 2);
    assert_eq!(stats.active(), 0);

    let check = factory
        .new_transaction(true, IsolationLevel::Default)
        .await
        .unwrap();
    assert!(item_ids(&check).await.is_empty());
    check.close().await;
}

#[test]
fn test_record_fields_follow_declaration_order() {
    let names: Vec<_> = Item::fields().iter().map(|f| f.name()).collect();
    assert_eq!(names, vec!["id", "label"]);
}
