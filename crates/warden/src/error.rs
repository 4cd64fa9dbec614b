// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum number of body characters kept in a [`Failure::Status`].
pub const BODY_SNIPPET_LEN: usize = 800;

/// Stable error codes surfaced by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Rejected,
    Exhausted,
    Graphql,
    Config,
    Timeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "REJECTED",
            Self::Exhausted => "RETRIES_EXHAUSTED",
            Self::Graphql => "GRAPHQL_ERROR",
            Self::Config => "BAD_CONFIG",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Process exit code for the binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed failure of a network attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Non-2xx HTTP status with a truncated body.
    Status { status: u16, body: String },
    /// Connection reset, timeout, aborted request.
    Transport(String),
    /// 2xx response whose body could not be decoded.
    Decode(String),
    /// 2xx response carrying an application error payload.
    Application(String),
}

impl Failure {
    pub fn status(status: u16, body: &str) -> Self {
        Self::Status { status, body: snippet(body, BODY_SNIPPET_LEN) }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status, body } => write!(f, "HTTP {status}: {body}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Application(msg) => f.write_str(msg),
        }
    }
}

/// Errors returned by session acquisition and request execution.
///
/// Cache and lock faults never appear here; they degrade to a cheaper path.
#[derive(Debug, Clone)]
pub enum Error {
    /// Non-retriable failure, surfaced on the first occurrence.
    Fatal { operation: &'static str, endpoint: String, failure: Failure },
    /// The retry ceiling was reached.
    Exhausted { operation: &'static str, endpoint: String, attempts: u32, last: Failure },
    /// GraphQL error list without a transient signature (messages joined).
    Graphql(String),
    /// Missing URL, unknown principal, unreadable principals file.
    Config(String),
    /// A caller-imposed deadline elapsed.
    Timeout { label: String, after: Duration },
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Fatal { .. } => ErrorCode::Rejected,
            Self::Exhausted { .. } => ErrorCode::Exhausted,
            Self::Graphql(_) => ErrorCode::Graphql,
            Self::Config(_) => ErrorCode::Config,
            Self::Timeout { .. } => ErrorCode::Timeout,
        }
    }

    /// The failure that ended the operation, when one was observed.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Fatal { failure, .. } => Some(failure),
            Self::Exhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal { operation, endpoint, failure } => {
                write!(f, "{operation} to {endpoint} failed: {failure}")
            }
            Self::Exhausted { operation, endpoint, attempts, last } => {
                write!(
                    f,
                    "{operation} to {endpoint} failed after {attempts} attempts. Last error: {last}"
                )
            }
            Self::Graphql(messages) => f.write_str(messages),
            Self::Config(msg) => write!(f, "configuration: {msg}"),
            Self::Timeout { label, after } => {
                write!(f, "{label} timed out after {}ms", after.as_millis())
            }
        }
    }
}

impl std::error::Error for Error {}

/// Truncate `text` to at most `max` characters.
pub fn snippet(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_owned(),
        None => text.to_owned(),
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
