// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::process::ProcessSpec;

/// Interpreter used when no command is given after `--`.
pub const DEFAULT_INTERPRETER: &[&str] = &["python3", "-u"];

/// Interactive execution bridge: runs submitted source in an interpreter
/// and streams its I/O over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "runbridge", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "RUNBRIDGE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP/WebSocket port to listen on.
    #[arg(long, env = "RUNBRIDGE_PORT", default_value_t = 3001)]
    pub port: u16,

    /// Unix socket path, served in addition to TCP.
    #[arg(long, env = "RUNBRIDGE_SOCKET")]
    pub socket: Option<String>,

    /// Bearer token for API authentication. If unset, auth is disabled.
    #[arg(long, env = "RUNBRIDGE_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// File suffix for the temporary script handed to the interpreter.
    #[arg(long, env = "RUNBRIDGE_SCRIPT_SUFFIX", default_value = ".py")]
    pub script_suffix: String,

    /// Working directory for interpreter processes.
    #[arg(long, env = "RUNBRIDGE_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Wall-clock limit per run in seconds (0 = unlimited).
    #[arg(long, env = "RUNBRIDGE_RUN_TIMEOUT", default_value_t = 300)]
    pub run_timeout: u64,

    /// Kill a running process after this many seconds without input or output (0 = never).
    #[arg(long, env = "RUNBRIDGE_IDLE_TIMEOUT", default_value_t = 120)]
    pub idle_timeout: u64,

    /// Maximum number of concurrent sessions.
    #[arg(long, env = "RUNBRIDGE_MAX_SESSIONS", default_value_t = 64)]
    pub max_sessions: usize,

    /// Maximum accepted source size in bytes.
    #[arg(long, env = "RUNBRIDGE_MAX_SOURCE_BYTES", default_value_t = 1 << 20)]
    pub max_source_bytes: usize,

    /// Pending stdin writes allowed per process before input is rejected.
    #[arg(long, env = "RUNBRIDGE_INPUT_QUEUE", default_value_t = 64)]
    pub input_queue: usize,

    /// Log format (json or text).
    #[arg(long, env = "RUNBRIDGE_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "RUNBRIDGE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Interpreter command (after --). The script path is appended.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    // -- Duration overrides (skip from CLI; set in Config::test()) --------
    #[clap(skip)]
    pub kill_grace_ms: Option<u64>,
    #[clap(skip)]
    pub drain_timeout_ms: Option<u64>,
    #[clap(skip)]
    pub close_timeout_ms: Option<u64>,
    #[clap(skip)]
    pub oneshot_timeout_ms: Option<u64>,
}

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interpreter().first().is_none_or(|p| p.trim().is_empty()) {
            anyhow::bail!("interpreter command must not be empty");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        if self.max_sessions == 0 {
            anyhow::bail!("--max-sessions must be at least 1");
        }
        if self.input_queue == 0 {
            anyhow::bail!("--input-queue must be at least 1");
        }
        Ok(())
    }

    /// The interpreter argv, falling back to [`DEFAULT_INTERPRETER`].
    pub fn interpreter(&self) -> Vec<String> {
        if self.command.is_empty() {
            DEFAULT_INTERPRETER.iter().map(|s| (*s).to_owned()).collect()
        } else {
            self.command.clone()
        }
    }

    /// Build the process template every run is spawned from.
    pub fn process_spec(&self) -> ProcessSpec {
        let mut argv = self.interpreter();
        let program = if argv.is_empty() { String::new() } else { argv.remove(0) };
        ProcessSpec {
            program,
            args: argv,
            env: vec![("PYTHONUNBUFFERED".to_owned(), "1".to_owned())],
            workdir: self.workdir.clone(),
            script_suffix: self.script_suffix.clone(),
        }
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout > 0).then(|| Duration::from_secs(self.run_timeout))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }

    // -- Tuning knobs (field override → env var → compiled default) --------

    duration_field!(kill_grace, kill_grace_ms, "RUNBRIDGE_KILL_GRACE_MS", 2_000);
    duration_field!(drain_timeout, drain_timeout_ms, "RUNBRIDGE_DRAIN_TIMEOUT_MS", 1_000);
    duration_field!(close_timeout, close_timeout_ms, "RUNBRIDGE_CLOSE_TIMEOUT_MS", 5_000);
    duration_field!(oneshot_timeout, oneshot_timeout_ms, "RUNBRIDGE_ONESHOT_TIMEOUT_MS", 10_000);

    /// Build a minimal `Config` for tests (port 0, `sh` interpreter).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            socket: None,
            auth_token: None,
            script_suffix: ".sh".into(),
            workdir: None,
            run_timeout: 0,
            idle_timeout: 0,
            max_sessions: 16,
            max_source_bytes: 64 * 1024,
            input_queue: 16,
            log_format: "text".into(),
            log_level: "debug".into(),
            command: vec!["sh".into()],
            kill_grace_ms: Some(200),
            drain_timeout_ms: Some(500),
            close_timeout_ms: Some(3_000),
            oneshot_timeout_ms: Some(5_000),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
