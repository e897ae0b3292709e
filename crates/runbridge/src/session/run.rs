// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Session, SessionInput, SessionState};

impl Session {
    /// Drive the session until it is closed and its process (if any) has
    /// been reaped, then remove it from the registry.
    ///
    /// Process events, client input, forced close, and timeouts are serviced
    /// concurrently, so a chatty process cannot delay a `stop`.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<SessionInput>) {
        let cancel = self.entry.cancel.clone();
        info!(session = %self.entry.id, "session opened");

        while self.state != SessionState::Closed {
            let deadline = self.next_deadline();
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    self.on_process_event(event).await;
                }
                input = inbound.recv(), if self.channel_open => match input {
                    Some(input) => self.on_input(input).await,
                    None => self.on_channel_closed("channel closed"),
                },
                _ = cancel.cancelled(), if self.channel_open => {
                    self.on_channel_closed("closed by server");
                }
                _ = sleep_until(deadline) => self.on_deadline().await,
            }
        }

        // Nothing may be queued for a closed channel.
        drop(inbound);
        self.registry.remove(&self.entry.id).await;
        info!(session = %self.entry.id, runs = self.entry.runs(), "session closed");
    }

    /// Earliest run or idle deadline for a live, un-killed process.
    fn next_deadline(&self) -> Option<Instant> {
        if self.state != SessionState::Running || self.process.as_ref().is_some_and(|p| p.is_killed()) {
            return None;
        }
        let idle = self.settings.idle_timeout.map(|t| self.last_activity + t);
        match (self.run_deadline, idle) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn on_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Command(command) => self.on_command(command).await,
            SessionInput::Protocol(err) => {
                debug!(session = %self.entry.id, err = %err, "protocol error");
                self.emit_error(err.code(), err.to_string()).await;
            }
            SessionInput::ChannelError(reason) => self.on_channel_closed(&reason),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
