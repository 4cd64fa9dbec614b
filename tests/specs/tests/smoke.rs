// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests that spawn the real `warden` binary, several processes
//! at a time, against one shared state directory.

use std::time::{Duration, SystemTime};

use warden::session::lock::ProcessLock;
use warden::session::store::SessionStore;
use warden::session::{epoch_secs, SessionRecord};
use warden_specs::{AuthStub, Workspace};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_processes_sign_in_once() -> anyhow::Result<()> {
    let stub = AuthStub::start(Duration::from_millis(400)).await?;
    let ws = Workspace::new(&stub)?;

    let mut children = Vec::new();
    for _ in 0..4 {
        children.push(ws.command(&["token", "--principal", "a"]).spawn()?);
    }
    let mut tokens = Vec::new();
    for child in children {
        let output = child.wait_with_output().await?;
        anyhow::ensure!(
            output.status.success(),
            "token failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        let session: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        tokens.push(session["token"].as_str().unwrap_or_default().to_owned());
    }

    assert_eq!(stub.sign_ins(), 1);
    assert!(tokens.iter().all(|t| t == "at-1"), "{tokens:?}");
    Ok(())
}

#[tokio::test]
async fn cached_session_survives_across_runs() -> anyhow::Result<()> {
    let stub = AuthStub::start(Duration::ZERO).await?;
    let ws = Workspace::new(&stub)?;

    let first = ws.run_json(&["token", "--principal", "a"]).await?;
    let second = ws.run_json(&["token", "--principal", "a"]).await?;

    assert_eq!(first, second);
    assert_eq!(first["subject_id"], "id-a@test");
    assert_eq!(stub.sign_ins(), 1);
    Ok(())
}

#[tokio::test]
async fn expiring_session_is_refreshed() -> anyhow::Result<()> {
    let stub = AuthStub::start(Duration::ZERO).await?;
    let ws = Workspace::new(&stub)?;
    SessionStore::new(ws.state_dir()).save(
        "a@test",
        &SessionRecord {
            subject_id: "id-a@test".into(),
            access_token: "at-old".into(),
            refresh_token: "rt-old".into(),
            access_expiry: epoch_secs() + 10,
        },
    );

    let session = ws.run_json(&["token", "--principal", "a"]).await?;

    assert_eq!(session["token"], "at-refreshed-1-rt-old");
    assert_eq!(stub.refreshes(), 1);
    assert_eq!(stub.sign_ins(), 0);
    Ok(())
}

#[tokio::test]
async fn stale_lock_is_reclaimed() -> anyhow::Result<()> {
    let stub = AuthStub::start(Duration::ZERO).await?;
    let ws = Workspace::new(&stub)?;
    let lock = ProcessLock::new(ws.state_dir(), Duration::from_secs(30), Duration::from_millis(25));
    let marker = lock.path_for("a@test");
    let file = std::fs::File::create(&marker)?;
    file.set_modified(SystemTime::now() - Duration::from_secs(31))?;
    drop(file);

    let started = std::time::Instant::now();
    ws.run_json(&["token", "--principal", "a"]).await?;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(stub.sign_ins(), 1);
    assert!(!marker.exists());
    Ok(())
}

#[tokio::test]
async fn status_and_clean() -> anyhow::Result<()> {
    let stub = AuthStub::start(Duration::ZERO).await?;
    let ws = Workspace::new(&stub)?;
    ws.run_json(&["token", "--principal", "a"]).await?;
    ws.run_json(&["token", "--principal", "b"]).await?;

    let status = ws.run_json(&["status"]).await?;
    let sessions = status["sessions"].as_array().cloned().unwrap_or_default();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["key"], "a@test");
    assert_eq!(sessions[0]["state"], "valid_cached");

    let cleaned = ws.run_json(&["clean"]).await?;
    assert_eq!(cleaned["removed"], 2);
    assert!(SessionStore::new(ws.state_dir()).list().is_empty());
    Ok(())
}

#[tokio::test]
async fn warm_then_query_uses_cache() -> anyhow::Result<()> {
    let stub = AuthStub::start(Duration::ZERO).await?;
    let ws = Workspace::new(&stub)?;

    let report = ws.run_json(&["warm", "--stagger-ms", "0"]).await?;
    let entries = report["principals"].as_array().cloned().unwrap_or_default();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries.iter().filter(|e| e["ok"] == true).count(), 2);
    let sign_ins_after_warm = stub.sign_ins();

    let data = ws.run_json(&["query", "--principal", "a", "{ me }"]).await?;
    assert!(data["authorization"].as_str().unwrap_or_default().starts_with("Bearer at-"));
    assert_eq!(stub.sign_ins(), sign_ins_after_warm);
    assert_eq!(stub.queries(), 1);
    Ok(())
}

#[tokio::test]
async fn graphql_errors_fail_the_command() -> anyhow::Result<()> {
    let stub = AuthStub::start(Duration::ZERO).await?;
    let ws = Workspace::new(&stub)?;

    let output = ws.run(&["query", "--anonymous", "{ me }"]).await?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("permission denied"));

    let raw = ws.run_json(&["query", "--anonymous", "--raw", "{ me }"]).await?;
    assert_eq!(raw["errors"][0]["message"], "permission denied");
    Ok(())
}

#[tokio::test]
async fn rejected_credentials_exit_nonzero() -> anyhow::Result<()> {
    let stub = AuthStub::start(Duration::ZERO).await?;
    let ws = Workspace::new(&stub)?;

    let output = ws.run(&["token", "--principal", "bad"]).await?;

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stub.sign_ins(), 1);
    assert!(String::from_utf8_lossy(&output.stderr).contains("Incorrect email or password"));
    assert!(output.stdout.is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_configuration_exits_with_two() -> anyhow::Result<()> {
    let stub = AuthStub::start(Duration::ZERO).await?;
    let ws = Workspace::new(&stub)?;

    let output = ws
        .command(&["token", "--principal", "a"])
        .env_remove("WARDEN_AUTH_URL")
        .env_remove("NHOST_AUTH_URL")
        .output()
        .await?;
    assert_eq!(output.status.code(), Some(2));

    let output = ws.run(&["token", "--principal", "nobody"]).await?;
    assert_eq!(output.status.code(), Some(2));
    Ok(())
}
