// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stateless one-shot execution: run source to completion with fixed stdin
//! and return everything it printed.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::process::{
    ExitStatus, Process, ProcessError, ProcessEventKind, ProcessSpec, StartOptions, StreamKind,
};

#[derive(Debug, Clone)]
pub struct OneshotSettings {
    pub spec: ProcessSpec,
    pub start: StartOptions,
    pub timeout: Duration,
    pub max_source_bytes: usize,
    /// Per-stream cap on collected output.
    pub max_output_bytes: usize,
}

impl OneshotSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            spec: config.process_spec(),
            start: StartOptions {
                kill_grace: config.kill_grace(),
                drain_timeout: config.drain_timeout(),
                input_queue: config.input_queue,
            },
            timeout: config.oneshot_timeout(),
            max_source_bytes: config.max_source_bytes,
            max_output_bytes: config.max_source_bytes,
        }
    }
}

/// Request for `POST /api/v1/run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub code: String,
    /// Written to stdin before it is closed.
    #[serde(default)]
    pub input: String,
}

/// Response for `POST /api/v1/run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    /// Everything written to stdout.
    pub output: String,
    /// Everything written to stderr.
    pub error: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub truncated: bool,
}

/// Run `req.code` to completion. Only spawn failures are errors; a crash or
/// timeout is reported in the response.
pub async fn run_once(
    settings: &OneshotSettings,
    req: RunRequest,
) -> Result<RunResponse, ProcessError> {
    let process = Process::spawn(&settings.spec, req.code).await?;
    let pid = process.pid();
    let (events_tx, mut events_rx) = mpsc::channel(64);
    let handle = process.start(0, events_tx, settings.start);
    debug!(pid, "one-shot process started");

    // The script may exit without reading stdin; that is not a failure.
    if let Err(e) = handle.write(Bytes::from(req.input)).and_then(|()| handle.close_stdin()) {
        debug!(pid, err = %e, "one-shot stdin not delivered");
    }

    let mut resp = RunResponse::default();
    let deadline = Instant::now() + settings.timeout;
    let status = loop {
        let event = tokio::select! {
            event = events_rx.recv() => event,
            _ = tokio::time::sleep_until(deadline), if !resp.timed_out => {
                info!(pid, "one-shot run timed out");
                resp.timed_out = true;
                handle.kill();
                continue;
            }
        };
        let Some(event) = event else {
            break ExitStatus::default();
        };
        match event.kind {
            ProcessEventKind::Output { stream, data } => {
                let buf = match stream {
                    StreamKind::Stdout => &mut resp.output,
                    StreamKind::Stderr => &mut resp.error,
                };
                resp.truncated |= push_capped(buf, &data, settings.max_output_bytes);
            }
            ProcessEventKind::WriteFailed { message } => debug!(pid, "{message}"),
            ProcessEventKind::Exited(status) => break status,
        }
    };

    resp.exit_code = status.code;
    resp.signal = status.signal;
    Ok(resp)
}

/// Append as much of `data` as fits in `cap` bytes without splitting a
/// character. Returns `true` if anything was dropped.
fn push_capped(buf: &mut String, data: &str, cap: usize) -> bool {
    let room = cap.saturating_sub(buf.len());
    if data.len() <= room {
        buf.push_str(data);
        return false;
    }
    let mut end = room;
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    buf.push_str(&data[..end]);
    true
}

#[cfg(test)]
#[path = "oneshot_tests.rs"]
mod tests;
