//! Transaction coordination tests against in-memory SQLite.

use std::sync::Arc;

use serde_json::json;
use sqlgate::{Connection, ConnectionConfig, DataValue, Error, Query};

fn dv(v: impl Into<DataValue>) -> DataValue {
    v.into()
}

async fn open() -> Arc<Connection> {
    let mut config = ConnectionConfig::new("sqlite::memory:");
    config.pool.max_connections = Some(1);
    let conn = Connection::open("test", config).unwrap();
    conn.execute_sql(
        "CREATE TABLE test_tran (
             id INTEGER PRIMARY KEY,
             type INTEGER NOT NULL DEFAULT 0,
             username TEXT NOT NULL
         )",
    )
    .await
    .unwrap();
    conn
}

async fn seed(conn: &Arc<Connection>) {
    let rows = vec![
        vec![("id", dv(1i64)), ("type", dv(9i64)), ("username", dv("1-9-a"))],
        vec![("id", dv(2i64)), ("type", dv(8i64)), ("username", dv("2-8-a"))],
        vec![("id", dv(3i64)), ("type", dv(7i64)), ("username", dv("3-7-a"))],
    ];
    Query::table_on(conn, "test_tran").insert_all(rows).await.unwrap();
}

async fn username(conn: &Arc<Connection>, id: i64) -> serde_json::Value {
    Query::table_on(conn, "test_tran")
        .where_eq("id", id)
        .value("username")
        .await
        .unwrap()
        .expect("row exists")
}

#[tokio::test]
async fn test_empty_transaction_rollback_restores_state() {
    let conn = open().await;
    seed(&conn).await;

    conn.start_trans().await.unwrap();
    conn.rollback().await.unwrap();

    assert_eq!(conn.trans_depth().await, 0);
    assert_eq!(Query::table_on(&conn, "test_tran").count().await.unwrap(), 3);
    // The connection is fully usable afterwards
    assert_eq!(username(&conn, 2).await, json!("2-8-a"));
}

#[tokio::test]
async fn test_rollback_discards_writes() {
    let conn = open().await;

    conn.start_trans().await.unwrap();
    seed(&conn).await;
    assert_eq!(Query::table_on(&conn, "test_tran").count().await.unwrap(), 3);
    conn.rollback().await.unwrap();

    assert_eq!(Query::table_on(&conn, "test_tran").count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_commit_persists_writes() {
    let conn = open().await;

    conn.start_trans().await.unwrap();
    seed(&conn).await;
    conn.commit().await.unwrap();

    assert_eq!(Query::table_on(&conn, "test_tran").count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_nested_commit_then_outer_rollback_discards_everything() {
    let conn = open().await;
    seed(&conn).await;

    conn.start_trans().await.unwrap();
    conn.start_trans().await.unwrap();
    assert_eq!(conn.trans_depth().await, 2);
    Query::table_on(&conn, "test_tran")
        .where_eq("id", 2i64)
        .update([("username", dv("2-8-b"))])
        .await
        .unwrap();
    conn.commit().await.unwrap();
    assert_eq!(conn.trans_depth().await, 1);
    conn.rollback().await.unwrap();

    // The inner commit only released its savepoint; the outer rollback wins
    assert_eq!(username(&conn, 2).await, json!("2-8-a"));
}

#[tokio::test]
async fn test_inner_rollback_keeps_outer_writes() {
    let conn = open().await;
    seed(&conn).await;

    conn.start_trans().await.unwrap();
    Query::table_on(&conn, "test_tran")
        .where_eq("id", 2i64)
        .update([("username", dv("2-8-b"))])
        .await
        .unwrap();

    conn.start_trans().await.unwrap();
    Query::table_on(&conn, "test_tran")
        .where_eq("id", 3i64)
        .update([("username", dv("3-7-b"))])
        .await
        .unwrap();
    conn.rollback().await.unwrap();

    conn.commit().await.unwrap();

    assert_eq!(username(&conn, 2).await, json!("2-8-b"));
    assert_eq!(username(&conn, 3).await, json!("3-7-a"));
}

#[tokio::test]
async fn test_commit_and_rollback_below_depth_zero_are_errors() {
    let conn = open().await;

    let err = conn.commit().await.expect_err("commit with no transaction");
    assert!(matches!(err, Error::TransactionState { .. }));

    let err = conn.rollback().await.expect_err("rollback with no transaction");
    assert!(matches!(err, Error::TransactionState { .. }));

    // Balanced calls may not dip below zero either
    conn.start_trans().await.unwrap();
    conn.commit().await.unwrap();
    let err = conn.commit().await.expect_err("unbalanced commit");
    assert!(matches!(err, Error::TransactionState { .. }));
}

#[tokio::test]
async fn test_transaction_closure_commits_on_ok() {
    let conn = open().await;
    seed(&conn).await;

    conn.transaction(|| async {
        Query::table_on(&conn, "test_tran")
            .where_eq("id", 2i64)
            .update([("username", dv("2-8-c"))])
            .await?;
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(conn.trans_depth().await, 0);
    assert_eq!(username(&conn, 2).await, json!("2-8-c"));
}

#[tokio::test]
async fn test_transaction_closure_rolls_back_on_err() {
    let conn = open().await;
    seed(&conn).await;

    let result: Result<(), Error> = conn
        .transaction(|| async {
            Query::table_on(&conn, "test_tran")
                .where_eq("id", 2i64)
                .update([("username", dv("2-8-c"))])
                .await?;
            Err(Error::condition("abort"))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(conn.trans_depth().await, 0);
    assert_eq!(username(&conn, 2).await, json!("2-8-a"));
}

#[tokio::test]
async fn test_reads_inside_transaction_see_uncommitted_writes() {
    let conn = open().await;
    seed(&conn).await;

    conn.start_trans().await.unwrap();
    Query::table_on(&conn, "test_tran")
        .where_eq("id", 2i64)
        .update([("username", dv("2-8-b"))])
        .await
        .unwrap();
    // Same pinned session: the uncommitted write is visible
    assert_eq!(username(&conn, 2).await, json!("2-8-b"));
    conn.rollback().await.unwrap();
    assert_eq!(username(&conn, 2).await, json!("2-8-a"));
}

#[tokio::test]
async fn test_plain_verbs_blocked_during_xa() {
    let conn = open().await;

    // SQLite has no two-phase protocol
    let err = conn
        .start_trans_xa("xa_test_1")
        .await
        .expect_err("sqlite has no xa support");
    assert!(matches!(err, Error::Config { .. }));

    // And a bad xid is rejected up front
    let err = conn
        .start_trans_xa("bad'xid")
        .await
        .expect_err("invalid xid");
    assert!(matches!(err, Error::TransactionState { .. }));
}
