// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sign-in and refresh calls against the auth service.
//!
//! Both endpoints accept JSON and answer with a session object. Field names
//! vary between deployments, so every field is looked up under a list of
//! known aliases.

use std::time::Duration;

use serde_json::Value;

use crate::credential::Principal;
use crate::error::{Error, Failure};
use crate::retry::{self, Outcome, RetryPolicy};
use crate::session::SessionRecord;

/// Lifetime assumed when the response omits one.
pub const DEFAULT_EXPIRES_IN: u64 = 900;

/// Shortest lifetime honored; smaller values are raised to this.
pub const MIN_EXPIRES_IN: u64 = 60;

const ACCESS_TOKEN: &[&str] =
    &["/session/accessToken", "/session/access_token", "/accessToken", "/access_token"];
const REFRESH_TOKEN: &[&str] =
    &["/session/refreshToken", "/session/refresh_token", "/refreshToken", "/refresh_token"];
const SUBJECT_ID: &[&str] = &["/session/user/id", "/user/id"];
const EXPIRES_IN: &[&str] =
    &["/session/accessTokenExpiresIn", "/accessTokenExpiresIn", "/expires_in"];

/// Auth service URLs derived from a base.
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    base: String,
}

impl AuthEndpoints {
    pub fn new(base: &str) -> Self {
        Self { base: base.trim_end_matches('/').to_owned() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn sign_in_url(&self) -> String {
        format!("{}/signin/email-password", self.base)
    }

    pub fn refresh_url(&self) -> String {
        format!("{}/token", self.base)
    }
}

/// Result of a successful refresh. Servers may rotate the refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refreshed {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub access_expiry: u64,
}

impl Refreshed {
    /// Apply to an existing record. The subject never changes on refresh.
    pub fn apply(self, record: SessionRecord) -> SessionRecord {
        SessionRecord {
            subject_id: record.subject_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token.unwrap_or(record.refresh_token),
            access_expiry: self.access_expiry,
        }
    }
}

/// Exchange a principal's identity and secret for a full session.
pub async fn sign_in(
    http: &reqwest::Client,
    endpoints: &AuthEndpoints,
    principal: &Principal,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<SessionRecord, Error> {
    let url = endpoints.sign_in_url();
    let body = serde_json::json!({
        "email": principal.identity,
        "password": principal.secret(),
    });
    retry::execute(policy, &url, |_| {
        let request = http.post(&url).json(&body).timeout(timeout);
        async move {
            retry::send(request)
                .await
                .and_then(|text| parse_json(&text))
                .and_then(|json| parse_sign_in(&json, crate::session::epoch_secs()))
        }
    })
    .await
}

/// Exchange a refresh token for a new access token.
pub async fn refresh(
    http: &reqwest::Client,
    endpoints: &AuthEndpoints,
    refresh_token: &str,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<Refreshed, Error> {
    let url = endpoints.refresh_url();
    let body = serde_json::json!({ "refreshToken": refresh_token });
    retry::execute(policy, &url, |_| {
        let request = http.post(&url).json(&body).timeout(timeout);
        async move {
            retry::send(request)
                .await
                .and_then(|text| parse_json(&text))
                .and_then(|json| parse_refresh(&json, crate::session::epoch_secs()))
        }
    })
    .await
}

/// Non-JSON 2xx bodies are retried.
fn parse_json(text: &str) -> Outcome<Value> {
    match serde_json::from_str(text) {
        Ok(json) => Outcome::Success(json),
        Err(e) => Outcome::transient(Failure::Decode(format!("invalid JSON: {e}"))),
    }
}

pub(crate) fn parse_sign_in(json: &Value, now: u64) -> Outcome<SessionRecord> {
    let access_token = first_str(json, ACCESS_TOKEN);
    let refresh_token = first_str(json, REFRESH_TOKEN);
    let subject_id = first_str(json, SUBJECT_ID);
    match (access_token, refresh_token, subject_id) {
        (Some(access_token), Some(refresh_token), Some(subject_id)) => {
            Outcome::Success(SessionRecord {
                subject_id,
                access_token,
                refresh_token,
                access_expiry: now + expires_in(json),
            })
        }
        _ => Outcome::Fatal(Failure::Decode(
            "sign-in response missing accessToken, refreshToken or user id".to_owned(),
        )),
    }
}

pub(crate) fn parse_refresh(json: &Value, now: u64) -> Outcome<Refreshed> {
    match first_str(json, ACCESS_TOKEN) {
        Some(access_token) => Outcome::Success(Refreshed {
            access_token,
            refresh_token: first_str(json, REFRESH_TOKEN),
            access_expiry: now + expires_in(json),
        }),
        None => Outcome::Fatal(Failure::Decode("refresh response missing accessToken".to_owned())),
    }
}

fn first_str(json: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| json.pointer(p))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Advertised lifetime in seconds, defaulted and floored.
fn expires_in(json: &Value) -> u64 {
    let advertised = EXPIRES_IN.iter().filter_map(|p| json.pointer(p)).find_map(|v| {
        v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    });
    advertised.unwrap_or(DEFAULT_EXPIRES_IN).max(MIN_EXPIRES_IN)
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
