// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use warden::command::{self, Cli};
use warden::config::WardenConfig;
use warden::error::{Error, ErrorCode};

#[tokio::main]
async fn main() {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    if let Err(e) = cli.config.validate() {
        eprintln!("error: {e}");
        std::process::exit(ErrorCode::Config.exit_code());
    }

    init_tracing(&cli.config);

    if let Err(e) = command::run(cli).await {
        let (code, exit) = exit_code_of(&e);
        error!(code, "fatal: {e:#}");
        std::process::exit(exit);
    }
}

fn init_tracing(config: &WardenConfig) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

/// Stable code and process exit code for a failed command.
fn exit_code_of(e: &anyhow::Error) -> (&'static str, i32) {
    match e.downcast_ref::<Error>() {
        Some(err) => (err.code().as_str(), err.code().exit_code()),
        None => ("INTERNAL", 1),
    }
}
