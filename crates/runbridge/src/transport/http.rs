// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP API: health, session listing and force-close, one-shot execution.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ErrorCode;
use crate::oneshot::{self, RunRequest};
use crate::registry::SessionInfo;
use crate::transport::state::AppState;

// ---------------------------------------------------------------------------
// GET /api/v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub interpreter: String,
    pub uptime_secs: u64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.shutdown.is_cancelled() { "shutting_down" } else { "running" };
    Json(HealthResponse {
        status: status.to_owned(),
        sessions: state.sessions.len().await,
        interpreter: state.interpreter(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

// ---------------------------------------------------------------------------
// GET /api/v1/sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    Json(SessionsResponse { sessions: state.sessions.list().await })
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/sessions/{id}
// ---------------------------------------------------------------------------

/// Force-close a session. Its process is killed and reaped by the session
/// itself; this returns as soon as the close has been requested.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let Some(entry) = state.sessions.get(&id).await else {
        return ErrorCode::SessionNotFound.to_http_response(format!("no session {id}")).into_response();
    };
    info!(session = %id, "force-closing session");
    entry.cancel.cancel();
    StatusCode::NO_CONTENT.into_response()
}

// ---------------------------------------------------------------------------
// POST /api/v1/run
// ---------------------------------------------------------------------------

pub async fn run_once(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return ErrorCode::BadRequest.to_http_response(e.body_text()).into_response(),
    };
    if req.code.len() > state.oneshot.max_source_bytes {
        let msg = format!("source exceeds {} bytes", state.oneshot.max_source_bytes);
        return ErrorCode::BadRequest.to_http_response(msg).into_response();
    }
    match oneshot::run_once(&state.oneshot, req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => e.code().to_http_response(e.to_string()).into_response(),
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
