use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

fn run(store: &Path, args: &[&str]) -> (String, String, bool) {
    run_with_env(store, args, &[])
}

fn run_with_env(store: &Path, args: &[&str], env: &[(&str, &str)]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_bet-sync"))
        .arg(store)
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("BET_SYNC_CONFIG")
        .envs(env.iter().copied())
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn fixture_store() -> &'static Path {
    Path::new("tests/fixtures/store")
}

#[test]
fn lists_transactions_most_recent_first() {
    let (stdout, stderr, success) = run(fixture_store(), &["transactions"]);

    assert!(success);
    assert!(stderr.contains("skipping undecodable record"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "id,userId,type,status,amount,currency,fee,createdAt");
    assert_eq!(
        lines[1],
        "tx-2,u-1,bet,completed,-12.50,EUR,0.00,2024-03-02T18:30:00.000Z"
    );
    // naive instants are read as UTC
    assert_eq!(
        lines[2],
        "tx-1,u-1,deposit,completed,50.00,EUR,0.00,2024-03-01T10:00:00.000Z"
    );
    assert_eq!(lines.len(), 3);
}

#[test]
fn lists_payments_and_users() {
    let (stdout, _, success) = run(fixture_store(), &["payments"]);
    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "id,userId,type,status,amount,submittedAt,reviewedBy");
    assert_eq!(
        lines[1],
        "pay-1,u-1,withdraw,pending,20.00,2024-03-03T09:15:00.000Z,"
    );

    let (stdout, _, success) = run(fixture_store(), &["users"]);
    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[1], "u-1,ann@example.com,active,17.50,true");
}

#[test]
fn stats_counts_decodable_records() {
    let (stdout, _, success) = run(fixture_store(), &["stats"]);
    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        [
            "transactions,2",
            "pendingPayments,1",
            "users,1",
            "lastUpdated,2024-03-03T09:15:00.000Z",
        ]
    );
}

#[test]
fn import_stores_and_syncs_valid_rows() {
    let dir = TempDir::new().unwrap();

    let (stdout, stderr, success) = run(dir.path(), &["import", "tests/fixtures/import.csv"]);
    assert!(success);
    assert_eq!(
        stdout.trim(),
        "imported 2, duplicates 1, rejected 1, synced 2"
    );
    assert!(stderr.contains("line 5"));
    assert!(dir.path().join("bet_sync_data.json").exists());

    let (stdout, _, success) = run(dir.path(), &["transactions"]);
    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[1],
        "imp-2,u-2,bet,completed,-25.50,GBP,0.00,2024-04-01T12:05:00.000Z"
    );

    // a second import only finds duplicates
    let (stdout, _, success) = run(dir.path(), &["import", "tests/fixtures/import.csv"]);
    assert!(success);
    assert_eq!(
        stdout.trim(),
        "imported 0, duplicates 3, rejected 1, synced 0"
    );
}

#[test]
fn config_file_changes_the_store_key() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.json");
    std::fs::write(&config, r#"{ "store": { "key": "wallet" } }"#).unwrap();
    let config = config.to_str().unwrap();

    let (_, _, success) = run_with_env(
        dir.path(),
        &["import", "tests/fixtures/import.csv"],
        &[("BET_SYNC_CONFIG", config)],
    );
    assert!(success);
    assert!(dir.path().join("wallet.json").exists());
    assert!(!dir.path().join("bet_sync_data.json").exists());
}

#[test]
fn bad_invocations_fail() {
    let dir = TempDir::new().unwrap();

    let (_, stderr, success) = run(dir.path(), &["balances"]);
    assert!(!success);
    assert!(stderr.contains("unknown command"));

    let (_, stderr, success) = run_with_env(
        dir.path(),
        &["stats"],
        &[("BET_SYNC_CONFIG", "/definitely/not/here.json")],
    );
    assert!(!success);
    assert!(stderr.contains("failed to read config"));
}
