// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire frames for the execution protocol.
//!
//! One JSON object per WebSocket text message, internally tagged by `type`.
//! Inbound frames are validated here and converted to typed [`Command`]s;
//! nothing past this module sees raw JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::process::ExitStatus;
use crate::session::Command;

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Stdout {
        data: String,
    },
    Stderr {
        data: String,
    },
    /// Exactly one per started run. `code` is null when the process was
    /// killed by a signal.
    Exit {
        code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<i32>,
    },
    Error {
        data: String,
        code: String,
    },
}

impl ServerFrame {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error { data: message.into(), code: code.as_str().to_owned() }
    }

    pub fn exit(status: ExitStatus) -> Self {
        Self::Exit { code: status.code, signal: status.signal }
    }
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Run { code: String },
    Input { data: String },
    Stop {},
}

impl From<ClientFrame> for Command {
    fn from(frame: ClientFrame) -> Self {
        match frame {
            ClientFrame::Run { code } => Command::Run { code },
            ClientFrame::Input { data } => Command::Input { data },
            ClientFrame::Stop {} => Command::Stop,
        }
    }
}

/// An inbound frame that could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not valid JSON.
    Malformed(String),
    /// Valid JSON that does not match any frame shape.
    Schema(String),
    /// Binary messages are not part of the protocol.
    Binary,
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::BadRequest
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "invalid JSON: {e}"),
            Self::Schema(e) => write!(f, "invalid message: {e}"),
            Self::Binary => f.write_str("binary messages are not supported"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Decode one inbound text message.
pub fn decode(raw: &str) -> Result<Command, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let frame: ClientFrame =
        serde_json::from_value(value).map_err(|e| ProtocolError::Schema(e.to_string()))?;
    Ok(frame.into())
}

pub fn encode(frame: &ServerFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
