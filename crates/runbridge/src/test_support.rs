// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: state builder, server spawner, and helpers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::transport::AppState;

/// Builder for [`AppState`] starting from [`Config::test`] (`sh` interpreter,
/// short kill grace, no timeouts).
pub struct AppStateBuilder {
    config: Config,
    shutdown: CancellationToken,
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self { config: Config::test(), shutdown: CancellationToken::new() }
    }

    pub fn auth_token(mut self, t: impl Into<String>) -> Self {
        self.config.auth_token = Some(t.into());
        self
    }

    pub fn max_sessions(mut self, n: usize) -> Self {
        self.config.max_sessions = n;
        self
    }

    pub fn max_source_bytes(mut self, n: usize) -> Self {
        self.config.max_source_bytes = n;
        self
    }

    /// Interpreter argv; the script path is appended at spawn time.
    pub fn command(mut self, argv: &[&str]) -> Self {
        self.config.command = argv.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn run_timeout_secs(mut self, secs: u64) -> Self {
        self.config.run_timeout = secs;
        self
    }

    pub fn oneshot_timeout(mut self, d: Duration) -> Self {
        self.config.oneshot_timeout_ms = Some(d.as_millis() as u64);
        self
    }

    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn build(self) -> Arc<AppState> {
        Arc::new(AppState::from_config(&self.config, self.shutdown))
    }
}

/// Spawn an HTTP/WebSocket server on a random port for integration testing.
///
/// Returns the bound address and a join handle for the server task.
pub async fn spawn_http_server(
    state: Arc<AppState>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

/// Extension trait to convert any `Display` error into `anyhow::Error`.
/// Replaces `.map_err(|e| anyhow::anyhow!("{e}"))` with `.anyhow()`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Assert that a `Result` is `Err` and its message contains a substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let msg = match $expr {
            Ok(_) => String::new(),
            Err(e) => e.to_string(),
        };
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
