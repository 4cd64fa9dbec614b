// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod command;
pub mod config;
pub mod credential;
pub mod error;
pub mod graphql;
pub mod memo;
pub mod retry;
pub mod session;

#[cfg(test)]
mod test_support;
