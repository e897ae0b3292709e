// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod spawn;

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use serde::Serialize;

use crate::error::ErrorCode;

pub use spawn::{Process, ProcessHandle, StartOptions};

/// Final status of an interpreter process. Exactly one of `code` and
/// `signal` is set for a normally reaped child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self { code: status.code(), signal: status.signal() }
    }
}

/// Which output pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Event produced by a running process, tagged with the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub run_id: u64,
    pub kind: ProcessEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEventKind {
    Output { stream: StreamKind, data: String },
    WriteFailed { message: String },
    /// Sent once, after both output streams are drained.
    Exited(ExitStatus),
}

impl ProcessEvent {
    pub fn output(run_id: u64, stream: StreamKind, data: String) -> Self {
        Self { run_id, kind: ProcessEventKind::Output { stream, data } }
    }

    pub fn exited(run_id: u64, status: ExitStatus) -> Self {
        Self { run_id, kind: ProcessEventKind::Exited(status) }
    }
}

/// Input delivered to the stdin writer task.
#[derive(Debug)]
pub enum ProcessInput {
    Write(Bytes),
    /// Close stdin so the process sees end-of-input.
    Close,
}

/// Template for spawning interpreter processes. The submitted source is
/// written to a temporary file whose path is appended to `args`.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub workdir: Option<PathBuf>,
    pub script_suffix: String,
}

impl ProcessSpec {
    /// The full interpreter command line, without the script path.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug)]
pub enum ProcessError {
    /// Writing the temporary script file failed.
    Script(std::io::Error),
    /// The interpreter could not be started.
    Spawn { program: String, source: std::io::Error },
    /// Stdin is closed (the process exited or input was closed).
    StdinClosed,
    /// Too many writes are pending on stdin.
    InputBackpressure,
}

impl ProcessError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Script(_) => ErrorCode::Internal,
            Self::Spawn { .. } => ErrorCode::SpawnFailed,
            Self::StdinClosed => ErrorCode::WriteFailed,
            Self::InputBackpressure => ErrorCode::InputBackpressure,
        }
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(e) => write!(f, "failed to write script file: {e}"),
            Self::Spawn { program, source } => write!(f, "failed to start {program}: {source}"),
            Self::StdinClosed => f.write_str("process input is closed"),
            Self::InputBackpressure => f.write_str("too much pending input; try again later"),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Script(e) | Self::Spawn { source: e, .. } => Some(e),
            _ => None,
        }
    }
}
