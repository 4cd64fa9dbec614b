// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry/backoff engine shared by sign-in, refresh and GraphQL calls.
//!
//! One attempt returns an [`Outcome`]. Transient failures wait for the
//! larger of the server's `Retry-After` hint and `base * 2^attempt`
//! (capped), plus uniform jitter, then try again up to the policy ceiling.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::debug;

use crate::error::{Error, Failure};

/// Retry parameters for one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Operation name used in errors and logs.
    pub operation: &'static str,
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of the uniform jitter added to every wait.
    pub jitter: Duration,
    /// Retries allowed for success-shaped responses with a transient error.
    pub max_app_retries: u32,
}

impl RetryPolicy {
    /// Sign-in happens once per session lifetime, so it gets the most patience.
    pub const SIGN_IN: Self = Self {
        operation: "signin",
        max_retries: 6,
        base: Duration::from_millis(800),
        cap: Duration::from_secs(15),
        jitter: Duration::from_millis(250),
        max_app_retries: 0,
    };

    /// Refresh falls back to sign-in on failure, so keep it short.
    pub const REFRESH: Self = Self {
        operation: "refresh",
        max_retries: 1,
        base: Duration::from_millis(500),
        cap: Duration::from_secs(2),
        jitter: Duration::from_millis(200),
        max_app_retries: 0,
    };

    pub const GRAPHQL: Self = Self {
        operation: "graphql",
        max_retries: 4,
        base: Duration::from_millis(500),
        cap: Duration::from_secs(5),
        jitter: Duration::from_millis(200),
        max_app_retries: 2,
    };

    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `base * 2^attempt`, capped. `attempt` is zero-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Wait before the attempt following `attempt`: the larger of the hint
    /// and the backoff, plus jitter.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let wait = self.backoff(attempt).max(retry_after.unwrap_or_default());
        wait + self.sample_jitter()
    }

    fn sample_jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }
}

/// Classified result of one attempt.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// Retry after backoff. `retry_after` is the server's pacing hint.
    Transient { failure: Failure, retry_after: Option<Duration> },
    /// Success-shaped response carrying a transient application error;
    /// bounded separately by [`RetryPolicy::max_app_retries`].
    RetryApplication(Failure),
    Fatal(Failure),
}

impl<T> Outcome<T> {
    pub fn transient(failure: Failure) -> Self {
        Self::Transient { failure, retry_after: None }
    }

    /// Chain a further classification onto a successful attempt.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Self::Success(value) => f(value),
            Self::Transient { failure, retry_after } => Outcome::Transient { failure, retry_after },
            Self::RetryApplication(failure) => Outcome::RetryApplication(failure),
            Self::Fatal(failure) => Outcome::Fatal(failure),
        }
    }
}

/// Run `attempt` under `policy` until success, a fatal failure, or the
/// attempt ceiling. `attempt` receives the zero-based attempt number.
pub async fn execute<T, F, Fut>(policy: &RetryPolicy, endpoint: &str, mut attempt: F) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Outcome<T>>,
{
    let attempts = policy.attempts();
    let mut app_retries = 0;
    let mut last = None;

    for n in 0..attempts {
        let (failure, hint) = match attempt(n).await {
            Outcome::Success(value) => return Ok(value),
            Outcome::Fatal(failure) => {
                return Err(Error::Fatal {
                    operation: policy.operation,
                    endpoint: endpoint.to_owned(),
                    failure,
                });
            }
            Outcome::RetryApplication(failure) => {
                if app_retries >= policy.max_app_retries {
                    return Err(Error::Fatal {
                        operation: policy.operation,
                        endpoint: endpoint.to_owned(),
                        failure,
                    });
                }
                app_retries += 1;
                (failure, None)
            }
            Outcome::Transient { failure, retry_after } => (failure, retry_after),
        };

        if n + 1 < attempts {
            let delay = policy.delay(n, hint);
            debug!(
                operation = policy.operation,
                endpoint,
                attempt = n + 1,
                delay_ms = delay.as_millis() as u64,
                err = %failure,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
        last = Some(failure);
    }

    Err(Error::Exhausted {
        operation: policy.operation,
        endpoint: endpoint.to_owned(),
        attempts,
        last: last.unwrap_or_else(|| Failure::Transport("no attempt made".to_owned())),
    })
}

/// 429 and every 5xx are worth retrying.
pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Parse a `Retry-After` value given in seconds. Absent, non-numeric or
/// non-positive values yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers.get(RETRY_AFTER)?.to_str().ok().and_then(parse_retry_after)
}

/// Every transport-level error (timeout, reset, abort) is transient.
pub fn transport_failure(e: &reqwest::Error) -> Failure {
    if e.is_timeout() {
        Failure::Transport(format!("timeout: {e}"))
    } else if e.is_connect() {
        Failure::Transport(format!("connect: {e}"))
    } else {
        Failure::Transport(e.to_string())
    }
}

/// Send one request and classify transport and status. 2xx yields the body.
pub async fn send(request: reqwest::RequestBuilder) -> Outcome<String> {
    let resp = match request.send().await {
        Ok(resp) => resp,
        Err(e) => return Outcome::transient(transport_failure(&e)),
    };
    let status = resp.status().as_u16();
    let hint = retry_after(resp.headers());
    let body = match resp.text().await {
        Ok(body) => body,
        Err(e) => return Outcome::transient(transport_failure(&e)),
    };

    if (200..300).contains(&status) {
        return Outcome::Success(body);
    }
    let failure = Failure::status(status, &body);
    if is_transient_status(status) {
        Outcome::Transient { failure, retry_after: hint }
    } else {
        Outcome::Fatal(failure)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
