// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State transitions for [`Session`].
//!
//! Invariants:
//! - at most one process per session; a new one is spawned only after the
//!   previous one's exit event has been observed,
//! - every started run yields exactly one `exit` frame while the channel
//!   is open,
//! - nothing is emitted once the channel is closed.

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Command, Session, SessionState};
use crate::error::ErrorCode;
use crate::process::{ExitStatus, Process, ProcessEvent, ProcessEventKind, StreamKind};
use crate::transport::frame::ServerFrame;

impl Session {
    pub(super) async fn on_command(&mut self, command: Command) {
        match command {
            Command::Run { code } => self.on_run(code).await,
            Command::Input { data } => self.on_stdin(data).await,
            Command::Stop => self.on_stop(),
        }
    }

    async fn on_run(&mut self, code: String) {
        if code.len() > self.settings.max_source_bytes {
            let msg = format!(
                "source is {} bytes, limit is {}",
                code.len(),
                self.settings.max_source_bytes
            );
            self.emit_error(ErrorCode::BadRequest, msg).await;
            return;
        }
        match self.state {
            SessionState::Idle => self.start_run(code).await,
            SessionState::Running => {
                debug!(session = %self.entry.id, "run supersedes live process");
                self.pending_run = Some(code);
                self.kill_current();
            }
            SessionState::Terminating => {
                // Latest wins.
                self.pending_run = Some(code);
            }
            SessionState::Starting | SessionState::Closed => {}
        }
    }

    async fn start_run(&mut self, code: String) {
        self.set_state(SessionState::Starting);
        let process = match Process::spawn(&self.settings.spec, code).await {
            Ok(process) => process,
            Err(e) => {
                warn!(session = %self.entry.id, err = %e, "spawn failed");
                self.set_state(SessionState::Idle);
                self.emit_error(e.code(), e.to_string()).await;
                return;
            }
        };

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let pid = process.pid();
        let handle = process.start(run_id, self.events_tx.clone(), self.settings.start);
        info!(session = %self.entry.id, run = run_id, pid, "process started");

        let now = Instant::now();
        self.process = Some(handle);
        self.run_deadline = self.settings.run_timeout.map(|t| now + t);
        self.last_activity = now;
        self.entry.set_pid(Some(pid));
        self.entry.record_run();
        self.entry.touch();
        self.set_state(SessionState::Running);
    }

    async fn on_stdin(&mut self, data: String) {
        let running = self.process.as_ref().filter(|_| self.state == SessionState::Running);
        let Some(process) = running else {
            self.emit_error(ErrorCode::NotRunning, "no process is running").await;
            return;
        };
        match process.write(Bytes::from(data)) {
            Ok(()) => self.touch(),
            Err(e) => self.emit_error(e.code(), e.to_string()).await,
        }
    }

    fn on_stop(&mut self) {
        match self.state {
            SessionState::Running => {
                info!(session = %self.entry.id, "stop requested");
                self.kill_current();
            }
            SessionState::Terminating => self.pending_run = None,
            SessionState::Idle | SessionState::Starting | SessionState::Closed => {}
        }
    }

    /// Channel closed, failed, or the session was force-closed.
    pub(super) fn on_channel_closed(&mut self, reason: &str) {
        if !self.channel_open {
            return;
        }
        info!(session = %self.entry.id, reason, "channel closed");
        self.channel_open = false;
        self.pending_run = None;
        if self.process.is_some() {
            self.kill_current();
        } else {
            self.set_state(SessionState::Closed);
        }
    }

    pub(super) async fn on_process_event(&mut self, event: ProcessEvent) {
        if self.process.as_ref().map(|p| p.run_id()) != Some(event.run_id) {
            debug!(session = %self.entry.id, run = event.run_id, "dropping stale process event");
            return;
        }
        match event.kind {
            ProcessEventKind::Output { stream, data } => {
                self.touch();
                let frame = match stream {
                    StreamKind::Stdout => ServerFrame::Stdout { data },
                    StreamKind::Stderr => ServerFrame::Stderr { data },
                };
                self.emit(frame).await;
            }
            ProcessEventKind::WriteFailed { message } => {
                self.emit_error(ErrorCode::WriteFailed, message).await;
            }
            ProcessEventKind::Exited(status) => self.on_exit(event.run_id, status).await,
        }
    }

    async fn on_exit(&mut self, run_id: u64, status: ExitStatus) {
        info!(
            session = %self.entry.id,
            run = run_id,
            code = ?status.code,
            signal = ?status.signal,
            "process exited"
        );
        self.process = None;
        self.run_deadline = None;
        self.entry.set_pid(None);

        if !self.channel_open {
            self.set_state(SessionState::Closed);
            return;
        }
        self.set_state(SessionState::Idle);
        self.emit(ServerFrame::exit(status)).await;

        if self.channel_open {
            if let Some(code) = self.pending_run.take() {
                self.start_run(code).await;
            }
        }
    }

    pub(super) async fn on_deadline(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        let now = Instant::now();
        let message = if self.run_deadline.is_some_and(|d| d <= now) {
            let limit = self.settings.run_timeout.unwrap_or_default();
            format!("run exceeded {}s time limit", limit.as_secs())
        } else if self.settings.idle_timeout.is_some_and(|t| self.last_activity + t <= now) {
            let limit = self.settings.idle_timeout.unwrap_or_default();
            format!("no input or output for {}s", limit.as_secs())
        } else {
            return;
        };
        warn!(session = %self.entry.id, "{message}");
        self.kill_current();
        self.emit_error(ErrorCode::Timeout, message).await;
    }

    /// Issue the kill for the live process and wait for its exit event.
    fn kill_current(&mut self) {
        if let Some(process) = self.process.as_ref() {
            if process.kill() {
                debug!(session = %self.entry.id, run = process.run_id(), pid = process.pid(), "kill issued");
            }
        }
        self.run_deadline = None;
        self.set_state(SessionState::Terminating);
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.entry.touch();
    }

    pub(super) async fn emit_error(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.emit(ServerFrame::error(code, message)).await;
    }

    /// Send a frame to the gateway. A dropped receiver means the channel is
    /// gone, which starts the close path.
    async fn emit(&mut self, frame: ServerFrame) {
        if !self.channel_open {
            return;
        }
        if self.frames.send(frame).await.is_err() {
            self.on_channel_closed("gateway dropped");
        }
    }
}
