// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection session controller.
//!
//! A [`Session`] owns at most one interpreter process. Commands from the
//! gateway and events from the process arrive on channels and are applied
//! one at a time by [`Session::run`], so all state changes go through a
//! single loop.

mod run;
mod transition;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::Config;
use crate::process::{ProcessEvent, ProcessHandle, ProcessSpec, StartOptions};
use crate::registry::{SessionEntry, SessionRegistry};
use crate::transport::frame::{ProtocolError, ServerFrame};

/// Buffered process events before readers wait on the session.
const EVENT_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Terminating = 3,
    Closed = 4,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Closed => "closed",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Terminating,
            _ => Self::Closed,
        }
    }
}

/// A validated client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run { code: String },
    Input { data: String },
    Stop,
}

/// Everything the gateway can tell a session.
#[derive(Debug)]
pub enum SessionInput {
    Command(Command),
    Protocol(ProtocolError),
    /// The channel failed; treated like a close.
    ChannelError(String),
}

/// Per-session limits derived from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub spec: ProcessSpec,
    pub start: StartOptions,
    pub run_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub max_source_bytes: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            spec: config.process_spec(),
            start: StartOptions {
                kill_grace: config.kill_grace(),
                drain_timeout: config.drain_timeout(),
                input_queue: config.input_queue,
            },
            run_timeout: config.run_timeout(),
            idle_timeout: config.idle_timeout(),
            max_source_bytes: config.max_source_bytes,
        }
    }
}

/// Session controller state. Created by the gateway and consumed by
/// [`Session::run`].
pub struct Session {
    entry: Arc<SessionEntry>,
    registry: SessionRegistry,
    settings: Arc<SessionSettings>,
    state: SessionState,
    process: Option<ProcessHandle>,
    /// Source of a `run` that arrived while the previous process was dying.
    pending_run: Option<String>,
    next_run_id: u64,
    channel_open: bool,
    run_deadline: Option<Instant>,
    last_activity: Instant,
    frames: mpsc::Sender<ServerFrame>,
    events_tx: mpsc::Sender<ProcessEvent>,
    events_rx: mpsc::Receiver<ProcessEvent>,
}

impl Session {
    pub fn new(
        entry: Arc<SessionEntry>,
        registry: SessionRegistry,
        settings: Arc<SessionSettings>,
        frames: mpsc::Sender<ServerFrame>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        Self {
            entry,
            registry,
            settings,
            state: SessionState::Idle,
            process: None,
            pending_run: None,
            next_run_id: 1,
            channel_open: true,
            run_deadline: None,
            last_activity: Instant::now(),
            frames,
            events_tx,
            events_rx,
        }
    }

    pub fn id(&self) -> &str {
        &self.entry.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(session = %self.entry.id, from = self.state.as_str(), to = state.as_str(), "state");
        }
        self.state = state;
        self.entry.set_state(state);
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
