mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::{Fault, OpenMode, fake_config, fake_connector, init_tracing, quick_retry};
use embedded_sql_driver::prelude::*;

fn engine_id(set: &mut ResultSet) -> Result<i64, DriverError> {
    let row = set.next_row()?.expect("one row");
    Ok(*row.get("engine_id").and_then(RowValues::as_int).expect("int column"))
}

#[tokio::test]
async fn disabled_retry_fails_fast() -> Result<(), Box<dyn std::error::Error>> {
    let (connector, probe) = fake_connector(fake_config().build(), OpenMode::Delay(Duration::ZERO));
    let ctx = CancellationToken::new();
    let mut conn = connector.connect(&ctx).await?;
    probe.fail_ops(&[Fault::Locked]);

    let err = conn
        .exec(&ctx, "INSERT INTO t VALUES (1)", &[])
        .await
        .expect_err("locked");
    assert!(err.is_retryable());
    assert_eq!(probe.attempts(), 1);
    assert_eq!(probe.opens(), 1);
    Ok(())
}

#[tokio::test]
async fn contention_is_retried_after_reopen() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = fake_config().retry_policy(quick_retry()).build();
    let (connector, probe) = fake_connector(config, OpenMode::Delay(Duration::ZERO));
    let ctx = CancellationToken::new();
    let mut conn = connector.connect(&ctx).await?;
    probe.fail_ops(&[Fault::Locked, Fault::ReadOnlyManifest, Fault::Locked]);

    let result = conn.exec(&ctx, "INSERT INTO t VALUES (1)", &[]).await?;
    assert_eq!(result.rows_affected, 1);
    assert_eq!(probe.attempts(), 4);
    assert_eq!(probe.opens(), 4);
    assert_eq!(probe.live_engines(), 1);

    let mut rows = conn.query(&ctx, "SELECT 1", &[]).await?;
    assert_eq!(engine_id(&mut rows)?, 3);
    Ok(())
}

#[tokio::test]
async fn terminal_errors_are_not_retried() -> Result<(), Box<dyn std::error::Error>> {
    let config = fake_config().retry_policy(quick_retry()).build();
    let (connector, probe) = fake_connector(config, OpenMode::Delay(Duration::ZERO));
    let ctx = CancellationToken::new();
    let mut conn = connector.connect(&ctx).await?;
    probe.fail_ops(&[Fault::MissingTable]);

    let err = conn
        .query(&ctx, "SELECT * FROM missing", &[])
        .await
        .expect_err("no such table");
    assert_eq!(err.to_wire().code, 1146);
    assert!(!err.is_retryable());
    assert_eq!(probe.attempts(), 1);
    assert_eq!(probe.opens(), 1);
    Ok(())
}

#[tokio::test]
async fn max_attempts_bounds_the_retries() -> Result<(), Box<dyn std::error::Error>> {
    let config = fake_config()
        .retry_policy(quick_retry().with_max_attempts(Some(3)))
        .build();
    let (connector, probe) = fake_connector(config, OpenMode::Delay(Duration::ZERO));
    let ctx = CancellationToken::new();
    let mut conn = connector.connect(&ctx).await?;
    probe.always_fail_ops(Some(Fault::Locked));

    let err = conn
        .exec(&ctx, "UPDATE t SET a = 1", &[])
        .await
        .expect_err("still locked");
    assert!(err.is_retryable());
    assert!(err.to_string().contains("locked by another process"));
    assert_eq!(probe.attempts(), 3);
    Ok(())
}

#[tokio::test]
async fn timeout_returns_the_last_engine_error() -> Result<(), Box<dyn std::error::Error>> {
    let policy = quick_retry().with_timeout(Some(Duration::from_millis(80)));
    let config = fake_config().retry_policy(policy).build();
    let (connector, probe) = fake_connector(config, OpenMode::Delay(Duration::ZERO));
    let ctx = CancellationToken::new();
    let mut conn = connector.connect(&ctx).await?;
    probe.always_fail_ops(Some(Fault::Locked));

    let started = Instant::now();
    let err = conn
        .exec(&ctx, "UPDATE t SET a = 1", &[])
        .await
        .expect_err("budget spent");
    assert!(err.is_retryable(), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(probe.attempts() >= 2);
    Ok(())
}

#[tokio::test]
async fn cancellation_during_backoff_returns_the_engine_error()
-> Result<(), Box<dyn std::error::Error>> {
    let policy = RetryPolicy::enabled()
        .with_initial_delay(Duration::from_secs(5))
        .with_max_delay(Some(Duration::from_secs(5)))
        .with_timeout(None);
    let config = fake_config().retry_policy(policy).build();
    let (connector, probe) = fake_connector(config, OpenMode::Delay(Duration::ZERO));
    let parent = CancellationToken::new();
    let mut conn = connector.connect(&parent).await?;
    probe.always_fail_ops(Some(Fault::Locked));

    let ctx = deadline_token(&parent, Duration::from_millis(50));
    let started = Instant::now();
    let err = conn
        .exec(&ctx, "UPDATE t SET a = 1", &[])
        .await
        .expect_err("cancelled while backing off");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!matches!(err, DriverError::Cancelled));
    assert!(err.is_retryable());
    assert_eq!(probe.attempts(), 1);
    Ok(())
}

#[tokio::test]
async fn transactions_are_never_retried() -> Result<(), Box<dyn std::error::Error>> {
    let config = fake_config().retry_policy(quick_retry()).build();
    let (connector, probe) = fake_connector(config, OpenMode::Delay(Duration::ZERO));
    let ctx = CancellationToken::new();
    let mut conn = connector.connect(&ctx).await?;

    let mut tx = conn.begin(&ctx, TxOptions::default()).await?;
    probe.fail_ops(&[Fault::Locked]);
    let err = tx
        .exec(&ctx, "INSERT INTO t VALUES (1)", &[])
        .await
        .expect_err("locked inside transaction");
    assert!(err.is_retryable());
    tx.rollback(&ctx).await?;

    // BEGIN, the failed insert and ROLLBACK, all on the first engine.
    assert_eq!(probe.attempts(), 3);
    assert_eq!(probe.opens(), 1);
    assert!(!conn.in_transaction());
    Ok(())
}

#[tokio::test]
async fn other_connections_follow_a_reopened_engine() -> Result<(), Box<dyn std::error::Error>> {
    let config = fake_config().retry_policy(quick_retry()).build();
    let (connector, probe) = fake_connector(config, OpenMode::Delay(Duration::ZERO));
    let ctx = CancellationToken::new();
    let mut first = connector.connect(&ctx).await?;
    let mut second = connector.connect(&ctx).await?;

    probe.fail_ops(&[Fault::Locked]);
    first.exec(&ctx, "INSERT INTO t VALUES (1)", &[]).await?;
    assert_eq!(probe.opens(), 2);
    assert_eq!(probe.live_engines(), 1);

    let mut rows = second.query(&ctx, "SELECT 1", &[]).await?;
    assert_eq!(engine_id(&mut rows)?, 1);
    drop(rows);

    let sessions = probe.session_engines.lock().unwrap().clone();
    assert_eq!(sessions, vec![0, 0, 1, 1]);
    assert_eq!(probe.sessions.load(Ordering::SeqCst), 4);
    Ok(())
}

#[tokio::test]
async fn connection_in_transaction_keeps_its_session() -> Result<(), Box<dyn std::error::Error>> {
    let config = fake_config().retry_policy(quick_retry()).build();
    let (connector, probe) = fake_connector(config, OpenMode::Delay(Duration::ZERO));
    let ctx = CancellationToken::new();
    let mut writer = connector.connect(&ctx).await?;
    let mut holder = connector.connect(&ctx).await?;

    let mut tx = holder.begin(&ctx, TxOptions::default()).await?;
    probe.fail_ops(&[Fault::Locked]);
    writer.exec(&ctx, "INSERT INTO t VALUES (1)", &[]).await?;
    assert_eq!(probe.opens(), 2);

    let mut rows = tx.query(&ctx, "SELECT 1", &[]).await?;
    assert_eq!(engine_id(&mut rows)?, 0);
    drop(rows);
    tx.commit(&ctx).await?;

    let mut rows = holder.query(&ctx, "SELECT 1", &[]).await?;
    assert_eq!(engine_id(&mut rows)?, 1);
    Ok(())
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use crate::common::{create_sqlite_database, sqlite_config};

    fn hold_write_lock(dir: &std::path::Path, hold: Duration) -> std::thread::JoinHandle<()> {
        let conn = create_sqlite_database(dir, "app");
        conn.execute_batch("BEGIN IMMEDIATE; INSERT INTO items (name) VALUES ('held');")
            .expect("take write lock");
        std::thread::spawn(move || {
            std::thread::sleep(hold);
            conn.execute_batch("COMMIT;").expect("release write lock");
        })
    }

    fn prepare_schema(dir: &std::path::Path) {
        let conn = create_sqlite_database(dir, "app");
        conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
            .expect("create schema");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn busy_database_is_retried_until_the_lock_is_released()
    -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        prepare_schema(dir.path());
        let driver = SqlDriver::new();
        let connector = driver.connector(sqlite_config(dir.path()).retry_policy(quick_retry()).build());
        let ctx = CancellationToken::new();
        let mut conn = connector.connect(&ctx).await?;

        let started = Instant::now();
        let holder = hold_write_lock(dir.path(), Duration::from_millis(300));
        let result = conn
            .exec(&ctx, "INSERT INTO items (name) VALUES (?1)", &[RowValues::Text("mine".into())])
            .await?;
        holder.join().expect("lock holder thread");
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(result.rows_affected, 1);

        let mut rows = conn.query(&ctx, "SELECT COUNT(*) AS n FROM items", &[]).await?;
        let all = rows.collect_rows()?;
        assert_eq!(all.iter().next().and_then(|r| r.get("n")), Some(&RowValues::Int(2)));
        drop(rows);

        connector.close().await?;
        assert_eq!(driver.registry().live_leases(dir.path()), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn busy_database_fails_immediately_without_retry()
    -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        prepare_schema(dir.path());
        let connector = SqlDriver::new().connector(sqlite_config(dir.path()).build());
        let ctx = CancellationToken::new();
        let mut conn = connector.connect(&ctx).await?;

        let holder = hold_write_lock(dir.path(), Duration::from_millis(300));
        let started = Instant::now();
        let err = conn
            .exec(&ctx, "INSERT INTO items (name) VALUES ('mine')", &[])
            .await
            .expect_err("database is busy");
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(err.is_retryable());
        assert_eq!(err.to_wire().code, 1205);
        holder.join().expect("lock holder thread");
        Ok(())
    }
}
