// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live sessions keyed by connection id.
//!
//! Each session owns its state exclusively; the registry only holds a
//! shared [`SessionEntry`] with atomic snapshots for the HTTP API and a
//! cancellation token used to force-close the session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::SessionState;

pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Shared view of one session.
#[derive(Debug)]
pub struct SessionEntry {
    pub id: String,
    pub created_at_ms: u64,
    state: AtomicU8,
    pid: AtomicU32,
    runs: AtomicU64,
    last_activity_ms: AtomicU64,
    /// Cancelled to force the session closed (API delete or shutdown).
    pub cancel: CancellationToken,
}

impl SessionEntry {
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// PID of the live process, if any.
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn set_pid(&self, pid: Option<u32>) {
        self.pid.store(pid.unwrap_or(0), Ordering::Release);
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn touch(&self) {
        self.last_activity_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            state: self.state().as_str(),
            pid: self.pid(),
            runs: self.runs(),
            created_at_ms: self.created_at_ms,
            last_activity_ms: self.last_activity_ms.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot for the sessions API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub state: &'static str,
    pub pid: Option<u32>,
    pub runs: u64,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<SessionEntry>>>>,
    changed: Arc<Notify>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new entry. Its cancel token is a child of
    /// `shutdown`, so server shutdown closes every session.
    pub async fn register(&self, shutdown: &CancellationToken) -> Arc<SessionEntry> {
        let now = epoch_ms();
        let entry = Arc::new(SessionEntry {
            id: uuid::Uuid::new_v4().to_string(),
            created_at_ms: now,
            state: AtomicU8::new(SessionState::Idle as u8),
            pid: AtomicU32::new(0),
            runs: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(now),
            cancel: shutdown.child_token(),
        });
        self.sessions.write().await.insert(entry.id.clone(), Arc::clone(&entry));
        debug!(session = %entry.id, "session registered");
        entry
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<SessionEntry>> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            self.changed.notify_waiters();
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of all sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut list: Vec<SessionInfo> =
            self.sessions.read().await.values().map(|entry| entry.info()).collect();
        list.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// Wait until every session has removed itself. Returns `false` on timeout.
    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_empty().await {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
