use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use chrono::{Duration, TimeZone, Utc};
use line_notify::application::ledger::OrderLedger;
use line_notify::domain::order::Amount;
use line_notify::domain::payment::PaymentMethod;
use line_notify::infrastructure::clock::ManualClock;
use line_notify::infrastructure::json_file::JsonFileOrderStore;
use predicates::prelude::*;
use rust_decimal_macros::dec;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::tempdir;

/// Seeds one paid and one long-expired pending order.
async fn seed(dir: &Path) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    let ledger = OrderLedger::new(
        Box::new(JsonFileOrderStore::open(dir).unwrap()),
        Arc::new(clock.clone()),
        Duration::days(7),
    );
    let amount = Amount::new(dec!(500)).unwrap();
    ledger.create("EC1", "U1", "Amy", amount).await.unwrap();
    ledger.create("LP2", "U2", "Bob", amount).await.unwrap();
    clock.advance(Duration::hours(1));
    ledger
        .transition_to_paid("LP2", PaymentMethod::LinePay)
        .await
        .unwrap();
}

fn command() -> Command {
    let mut cmd = Command::new(cargo_bin!("line-notify"));
    for var in ["DB_PATH", "DATA_DIR", "RUST_LOG", "ADMIN_USER_ID", "INVENTORY_ENDPOINT"] {
        cmd.env_remove(var);
    }
    cmd
}

#[tokio::test]
async fn test_export_orders_as_csv() {
    let dir = tempdir().unwrap();
    seed(dir.path()).await;

    command()
        .arg("export-orders")
        .arg("--data-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "orderId,userId,userName,amount,status,createdAt,expiryTime,paymentMethod,paidAt",
        ))
        .stdout(predicate::str::contains("EC1,U1,Amy,500,expired,"))
        .stdout(predicate::str::contains(
            "LP2,U2,Bob,500,paid,2025-01-01T00:00:00Z,2025-01-08T00:00:00Z,linepay,2025-01-01T01:00:00Z",
        ));

    command()
        .args(["export-orders", "--status", "paid", "--data-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("LP2"))
        .stdout(predicate::str::contains("EC1").not());
}

#[tokio::test]
async fn test_sweep_prints_removed_count() {
    let dir = tempdir().unwrap();
    seed(dir.path()).await;

    command()
        .args(["sweep", "--data-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout("1\n");

    command()
        .args(["export-orders", "--data-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("EC1").not());
}

#[test]
fn test_serve_refuses_to_start_without_admin() {
    let dir = tempdir().unwrap();
    command()
        .args(["serve", "--data-dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("ADMIN_USER_ID must be set"));
}

#[cfg(unix)]
#[test]
fn test_serve_stops_cleanly_on_sigterm() {
    use std::net::{TcpListener, TcpStream};
    use std::time::{Duration as StdDuration, Instant};

    let dir = tempdir().unwrap();
    let addr = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let mut child = command()
        .args(["serve", "--data-dir"])
        .arg(dir.path())
        .args(["--admin-user-id", "Uadmin"])
        .args(["--inventory-endpoint", "http://127.0.0.1:9/items"])
        .arg("--bind-addr")
        .arg(addr.to_string())
        .spawn()
        .unwrap();

    let started = Instant::now();
    while TcpStream::connect(addr).is_err() {
        assert!(started.elapsed() < StdDuration::from_secs(20), "server never listened");
        std::thread::sleep(StdDuration::from_millis(50));
    }

    let killed = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let stopping = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if stopping.elapsed() > StdDuration::from_secs(10) {
            child.kill().unwrap();
            panic!("serve ignored SIGTERM");
        }
        std::thread::sleep(StdDuration::from_millis(50));
    };
    assert!(status.success());
}

#[test]
fn test_unknown_status_is_rejected() {
    command()
        .args(["export-orders", "--status", "refunded"])
        .assert()
        .failure();
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_db_path_without_rocksdb_falls_back_to_json() {
    let dir = tempdir().unwrap();
    command()
        .args(["export-orders", "--data-dir"])
        .arg(dir.path())
        .env("DB_PATH", dir.path().join("db"))
        .assert()
        .success()
        .stderr(predicate::str::contains("DB_PATH ignored"));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_backend_is_used_when_db_path_is_set() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");
    command()
        .args(["sweep", "--db-path"])
        .arg(&db_path)
        .assert()
        .success()
        .stdout("0\n");
    assert!(db_path.exists());
}
