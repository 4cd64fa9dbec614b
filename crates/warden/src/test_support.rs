// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted mock HTTP server and helpers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::retry::RetryPolicy;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls. Idempotent.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Assert that a `Result` is `Err` and its message contains `substr`.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// Millisecond-scale policy so retry tests stay fast.
pub fn fast_policy(operation: &'static str, max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        operation,
        max_retries,
        base: Duration::from_millis(1),
        cap: Duration::from_millis(4),
        jitter: Duration::from_millis(1),
        max_app_retries: 1,
    }
}

/// One scripted HTTP response.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    body: String,
    headers: Vec<(&'static str, String)>,
    delay: Duration,
}

impl Reply {
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self::text(status, value.to_string())
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into(), headers: vec![], delay: Duration::ZERO }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Hold the response for `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request seen by the mock server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub body: serde_json::Value,
    pub authorization: Option<String>,
    pub admin_secret: Option<String>,
}

struct Route {
    replies: Vec<Reply>,
    calls: AtomicU32,
    requests: Mutex<Vec<Recorded>>,
}

/// Mock server answering each path with its scripted replies in order.
/// Once the script runs out the last reply repeats; unknown paths get 404.
pub struct MockServer {
    addr: SocketAddr,
    routes: Arc<HashMap<String, Route>>,
}

impl MockServer {
    pub async fn start(script: Vec<(&str, Vec<Reply>)>) -> Self {
        ensure_crypto();
        let routes: HashMap<String, Route> = script
            .into_iter()
            .map(|(path, replies)| {
                let route =
                    Route { replies, calls: AtomicU32::new(0), requests: Mutex::new(vec![]) };
                (path.to_owned(), route)
            })
            .collect();
        let routes = Arc::new(routes);

        let handler_routes = Arc::clone(&routes);
        let app = Router::new().fallback(move |uri: Uri, headers: HeaderMap, body: String| {
            let routes = Arc::clone(&handler_routes);
            async move { respond(&routes, uri.path(), &headers, body).await }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { addr, routes }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }

    pub fn calls(&self, path: &str) -> u32 {
        self.routes.get(path).map(|r| r.calls.load(Ordering::SeqCst)).unwrap_or(0)
    }

    pub fn requests(&self, path: &str) -> Vec<Recorded> {
        self.routes.get(path).map(|r| r.requests.lock().clone()).unwrap_or_default()
    }
}

async fn respond(
    routes: &HashMap<String, Route>,
    path: &str,
    headers: &HeaderMap,
    body: String,
) -> Response {
    let Some(route) = routes.get(path) else {
        return (StatusCode::NOT_FOUND, "no route").into_response();
    };

    let idx = route.calls.fetch_add(1, Ordering::SeqCst) as usize;
    let reply = route
        .replies
        .get(idx)
        .or_else(|| route.replies.last())
        .cloned()
        .unwrap_or_else(|| Reply::text(500, "{}"));

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned);
    route.requests.lock().push(Recorded {
        body: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
        authorization: header("authorization"),
        admin_secret: header("x-hasura-admin-secret"),
    });

    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let mut out = HeaderMap::new();
    out.insert("content-type", HeaderValue::from_static("application/json"));
    for (name, value) in &reply.headers {
        if let Ok(value) = HeaderValue::from_str(value) {
            out.insert(HeaderName::from_static(name), value);
        }
    }
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, out, reply.body).into_response()
}
