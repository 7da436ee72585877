//! Tests against a live PostgreSQL server.
//!
//! Run with `DATABASE_URL` set (a `.env` file works too) and `--ignored`.

use std::time::Duration;

use deadpool::managed::Pool;
use diesel_async::SimpleAsyncConnection;
use diesel_async::pooled_connection::{
    AsyncDieselConnectionManager, ManagerConfig, RecyclingMethod,
};
use serde_json::json;
use taskwire_postgres::PgConnection;
use taskwire_postgres::prelude::*;
use tokio_util::sync::CancellationToken;

fn config() -> PgConfig {
    let _ = dotenvy::dotenv();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
    PgConfig::new(url).with_max_connections(4)
}

async fn open_connector() -> PgConnector {
    let connector = PgConnector::new(config());
    connector.open().await.expect("connector should open");
    connector
}

#[tokio::test]
#[ignore = "requires database"]
async fn structured_values_round_trip() {
    let connector = open_connector().await;
    connector
        .execute_query(
            "CREATE TABLE IF NOT EXISTS taskwire_round_trip (id bigint PRIMARY KEY, args jsonb, queues text[])",
            &QueryArgs::new(),
        )
        .await
        .unwrap();
    connector
        .execute_query("TRUNCATE taskwire_round_trip", &QueryArgs::new())
        .await
        .unwrap();

    let args = json!({"user": {"id": 42, "tags": ["a", "b"]}, "retry": true});
    let insert = QueryArgs::new()
        .with("id", 1)
        .with("args", args.clone())
        .with("queues", json!(["high", "low"]));

    let row = connector
        .execute_query_one(
            "INSERT INTO taskwire_round_trip (id, args, queues) VALUES (:id, :args, :queues) RETURNING args, queues",
            &insert,
        )
        .await
        .unwrap()
        .expect("insert should return a row");

    assert_eq!(row["args"], args);
    assert_eq!(row["queues"], json!(["high", "low"]));

    connector
        .execute_query("DROP TABLE taskwire_round_trip", &QueryArgs::new())
        .await
        .unwrap();
    connector.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn fetch_one_without_rows_is_none() {
    let connector = open_connector().await;

    let row = connector
        .execute_query_one(
            "SELECT 1 AS one WHERE :flag",
            &QueryArgs::new().with("flag", false),
        )
        .await
        .unwrap();
    assert!(row.is_none());

    let rows = connector
        .execute_query_all(
            "SELECT generate_series(1, :n) AS n",
            &QueryArgs::new().with("n", 3),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2]["n"], json!(3));

    connector.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn unique_violation_reports_constraint() {
    let connector = open_connector().await;

    connector
        .execute_query(
            "CREATE TABLE IF NOT EXISTS taskwire_unique_test (lock text CONSTRAINT taskwire_unique_test_lock_key UNIQUE)",
            &QueryArgs::new(),
        )
        .await
        .unwrap();
    connector
        .execute_query("TRUNCATE taskwire_unique_test", &QueryArgs::new())
        .await
        .unwrap();

    let args = QueryArgs::new().with("lock", "only-one");
    let insert = "INSERT INTO taskwire_unique_test (lock) VALUES (:lock)";
    connector.execute_query(insert, &args).await.unwrap();

    let error = connector.execute_query(insert, &args).await.unwrap_err();
    assert_eq!(error.constraint(), Some("taskwire_unique_test_lock_key"));

    connector
        .execute_query("DROP TABLE taskwire_unique_test", &QueryArgs::new())
        .await
        .unwrap();
    connector.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn external_pool_survives_close() {
    let owner = open_connector().await;
    let pool = owner.pool().unwrap();

    let connector = PgConnector::new(PgConfig::default());
    connector.open_with_pool(pool.clone()).await.unwrap();
    connector.close().await.unwrap();

    assert!(!pool.is_closed());
    owner
        .execute_query("SELECT 1", &QueryArgs::new())
        .await
        .unwrap();

    owner.close().await.unwrap();
    assert!(pool.is_closed());
}

#[tokio::test]
#[ignore = "requires database"]
async fn notify_wakes_listener() {
    let connector = open_connector().await;
    let signal = NotificationSignal::new();

    let bridge = NotificationBridge::new(connector.clone(), signal.clone(), ["jobs"]);
    let mut state = bridge.state();
    let cancel = CancellationToken::new();
    let listener = bridge.spawn(cancel.clone());

    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|state| *state == BridgeState::Listening),
    )
    .await
    .expect("bridge should start listening")
    .unwrap();

    signal.clear();
    connector
        .execute_query("SELECT pg_notify('jobs', :payload)", &QueryArgs::new().with("payload", "42"))
        .await
        .unwrap();

    assert!(signal.wait_timeout(Duration::from_secs(10)).await);

    cancel.cancel();
    listener.await.unwrap().unwrap();
    connector.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn recycle_ends_leftover_transaction() {
    let connector = PgConnector::new(config().with_max_connections(2));
    connector.open().await.unwrap();

    {
        let pool = connector.pool().unwrap();
        let mut conn = pool.get().await.unwrap();
        conn.batch_execute("BEGIN; SET LOCAL application_name = 'leftover'")
            .await
            .unwrap();
    }

    for _ in 0..2 {
        let row = connector
            .execute_query_one(
                "SELECT current_setting('application_name') AS name",
                &QueryArgs::new(),
            )
            .await
            .unwrap()
            .expect("query should return a row");
        assert_ne!(row["name"], json!("leftover"));
    }

    connector.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn listener_ends_leftover_transaction() {
    // Keeps connections as they are on return, so the listener gets the one
    // left inside a transaction.
    let mut manager_config = ManagerConfig::default();
    manager_config.recycling_method = RecyclingMethod::Fast;
    let manager = AsyncDieselConnectionManager::<PgConnection>::new_with_config(
        config().database_url(),
        manager_config,
    );
    let pool: ConnectionPool = Pool::builder(manager).max_size(2).build().unwrap();

    {
        let mut conn = pool.get().await.unwrap();
        conn.batch_execute("BEGIN").await.unwrap();
    }

    let connector = PgConnector::new(PgConfig::default());
    connector.open_with_pool(pool).await.unwrap();

    let signal = NotificationSignal::new();
    let bridge = NotificationBridge::new(connector.clone(), signal.clone(), ["jobs"]);
    let mut state = bridge.state();
    let cancel = CancellationToken::new();
    let listener = bridge.spawn(cancel.clone());

    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|state| *state == BridgeState::Listening),
    )
    .await
    .expect("bridge should start listening")
    .unwrap();

    signal.clear();
    connector
        .execute_query("SELECT pg_notify('jobs', '')", &QueryArgs::new())
        .await
        .unwrap();

    assert!(signal.wait_timeout(Duration::from_secs(10)).await);

    cancel.cancel();
    listener.await.unwrap().unwrap();
}
