// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary tests.
//!
//! Spawns the real `warden` binary as several OS processes sharing one state
//! directory, all talking to an in-process stub of the auth and GraphQL
//! services.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Password the stub accepts; anything else gets a 400.
pub const PASSWORD: &str = "pw";

/// Resolve the path to the compiled `warden` binary.
pub fn warden_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("warden")
}

#[derive(Default)]
struct Counters {
    sign_ins: AtomicU32,
    refreshes: AtomicU32,
    queries: AtomicU32,
}

#[derive(Clone)]
struct StubState {
    counters: Arc<Counters>,
    sign_in_delay: Duration,
}

/// In-process auth + GraphQL stub.
pub struct AuthStub {
    addr: SocketAddr,
    counters: Arc<Counters>,
}

impl AuthStub {
    /// Start the stub. Each sign-in is held for `sign_in_delay` to widen the
    /// window in which concurrent processes would race.
    pub async fn start(sign_in_delay: Duration) -> anyhow::Result<Self> {
        let counters = Arc::new(Counters::default());
        let state = StubState { counters: Arc::clone(&counters), sign_in_delay };
        let app = Router::new()
            .route("/signin/email-password", post(sign_in))
            .route("/token", post(refresh))
            .route("/v1/graphql", post(graphql))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, counters })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn sign_ins(&self) -> u32 {
        self.counters.sign_ins.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> u32 {
        self.counters.refreshes.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> u32 {
        self.counters.queries.load(Ordering::SeqCst)
    }
}

async fn sign_in(State(state): State<StubState>, Json(body): Json<Value>) -> Response {
    let n = state.counters.sign_ins.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(state.sign_in_delay).await;
    if body["password"] != PASSWORD {
        let error = json!({"status": 401, "message": "Incorrect email or password"});
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    }
    let email = body["email"].as_str().unwrap_or_default();
    Json(json!({
        "session": {
            "accessToken": format!("at-{n}"),
            "refreshToken": format!("rt-{n}"),
            "accessTokenExpiresIn": 900,
            "user": {"id": format!("id-{email}")}
        }
    }))
    .into_response()
}

async fn refresh(State(state): State<StubState>, Json(body): Json<Value>) -> Response {
    let n = state.counters.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
    let refresh_token = body["refreshToken"].as_str().unwrap_or_default();
    Json(json!({
        "accessToken": format!("at-refreshed-{n}-{refresh_token}"),
        "accessTokenExpiresIn": 900
    }))
    .into_response()
}

async fn graphql(State(state): State<StubState>, headers: HeaderMap) -> Response {
    state.counters.queries.fetch_add(1, Ordering::SeqCst);
    let authorization = headers.get("authorization").and_then(|v| v.to_str().ok());
    match authorization {
        Some(value) => Json(json!({"data": {"authorization": value}})).into_response(),
        None => Json(json!({"errors": [{"message": "permission denied"}]})).into_response(),
    }
}

/// Isolated state directory plus principals file for one test.
pub struct Workspace {
    dir: tempfile::TempDir,
    auth_url: String,
}

impl Workspace {
    /// Principals `a` (`a@test`) and `b` (`b@test`) with the right password,
    /// `bad` (`bad@test`) with a wrong one.
    pub fn new(stub: &AuthStub) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let principals = json!({
            "principals": [
                {"name": "a", "identity": "a@test", "secret": PASSWORD},
                {"name": "b", "identity": "b@test", "secret": PASSWORD},
                {"name": "bad", "identity": "bad@test", "secret": "wrong"}
            ]
        });
        std::fs::write(dir.path().join("principals.json"), principals.to_string())?;
        std::fs::create_dir_all(dir.path().join("state"))?;
        Ok(Self { dir, auth_url: stub.base_url() })
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    /// A `warden` invocation wired to this workspace.
    pub fn command(&self, args: &[&str]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(warden_binary());
        cmd.args(args)
            .env("WARDEN_AUTH_URL", &self.auth_url)
            .env("WARDEN_GRAPHQL_URL", format!("{}/v1/graphql", self.auth_url))
            .env("WARDEN_PRINCIPALS", self.dir.path().join("principals.json"))
            .env("WARDEN_STATE_DIR", self.state_dir())
            .env("WARDEN_LOCK_SLICE_MS", "25")
            .env("WARDEN_LOG_LEVEL", "warn")
            .env_remove("WARDEN_LOCK_DIR")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run `warden` to completion.
    pub async fn run(&self, args: &[&str]) -> anyhow::Result<Output> {
        let binary = warden_binary();
        anyhow::ensure!(binary.exists(), "warden binary not found at {}", binary.display());
        Ok(self.command(args).output().await?)
    }

    /// Run `warden` and parse its stdout as JSON, failing on a non-zero exit.
    pub async fn run_json(&self, args: &[&str]) -> anyhow::Result<Value> {
        let output = self.run(args).await?;
        anyhow::ensure!(
            output.status.success(),
            "warden {args:?} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}
