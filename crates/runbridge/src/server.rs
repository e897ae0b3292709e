// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::transport::{build_router, AppState};

/// Serve until `shutdown` fires, then close every session and wait (bounded
/// by the close timeout) for their processes to be reaped.
pub async fn run(config: &Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(config, shutdown.clone()));
    let router = build_router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("bind {addr}"))?;
    info!(interpreter = %state.interpreter(), "HTTP listening on {}", listener.local_addr()?);

    if let Some(ref path) = config.socket {
        spawn_unix_server(path, router.clone(), shutdown.clone())?;
    }

    let sd = shutdown.clone();
    let http = tokio::spawn(async move {
        let result = axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
        if let Err(e) = result {
            error!("HTTP server error: {e}");
        }
    });

    shutdown.cancelled().await;
    info!(sessions = state.sessions.len().await, "shutting down");

    let close_timeout = config.close_timeout();
    if !state.sessions.wait_empty(close_timeout).await {
        warn!(remaining = state.sessions.len().await, "sessions still closing at shutdown");
    }
    if tokio::time::timeout(close_timeout, http).await.is_err() {
        warn!("HTTP server did not stop in time");
    }
    if let Some(ref path) = config.socket {
        let _ = std::fs::remove_file(path);
    }
    Ok(())
}

/// Serve `router` on a Unix socket until `shutdown` fires. Any file already
/// at `path` is replaced.
fn spawn_unix_server(path: &str, router: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path).with_context(|| format!("bind {path}"))?;
    info!("Unix socket listening on {path}");

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(serve_unix_connection(stream, router.clone()));
                }
                Err(e) => debug!(err = %e, "unix socket accept failed"),
            }
        }
    });
    Ok(())
}

/// HTTP/1 or HTTP/2 on one accepted stream, with WebSocket upgrades.
async fn serve_unix_connection(stream: UnixStream, router: Router) {
    let io = TokioIo::new(stream);
    let service = TowerToHyperService::new(router);
    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(io, service)
        .await
    {
        debug!(err = %e, "unix connection ended with error");
    }
}
