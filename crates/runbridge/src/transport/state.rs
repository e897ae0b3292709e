// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::oneshot::OneshotSettings;
use crate::registry::SessionRegistry;
use crate::session::SessionSettings;

/// Shared application state passed to all handlers via axum `State` extractor.
pub struct AppState {
    pub sessions: SessionRegistry,
    pub session_settings: Arc<SessionSettings>,
    pub oneshot: OneshotSettings,
    pub limits: Limits,
    /// One permit per allowed session, taken before the upgrade and held
    /// until the session has reaped its process.
    pub session_slots: Arc<Semaphore>,
    /// Bearer token; `None` disables auth.
    pub auth_token: Option<String>,
    /// Cancelled on server shutdown. Parent of every session's close token.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

/// Connection-level limits.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_sessions: usize,
    /// How long the gateway waits for a closed session to reap its process.
    pub close_timeout: Duration,
}

impl AppState {
    pub fn from_config(config: &Config, shutdown: CancellationToken) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            session_settings: Arc::new(SessionSettings::from_config(config)),
            oneshot: OneshotSettings::from_config(config),
            limits: Limits {
                max_sessions: config.max_sessions,
                close_timeout: config.close_timeout(),
            },
            session_slots: Arc::new(Semaphore::new(config.max_sessions)),
            auth_token: config.auth_token.clone(),
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// Interpreter command line shown by the health endpoint.
    pub fn interpreter(&self) -> String {
        self.session_settings.spec.command_line()
    }
}
