// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `runbridge` binary as a subprocess with `sh` as the
//! interpreter and exercises it over HTTP, WebSocket, and Unix socket.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Resolve the path to the compiled `runbridge` binary.
pub fn runbridge_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    let target = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| workspace.join("target"));
    target.join("debug").join("runbridge")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Make a raw HTTP/1.1 GET request over a Unix socket, returning the response body.
pub async fn unix_http_get(socket_path: &Path, path: &str) -> anyhow::Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::UnixStream::connect(socket_path).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8(buf)?;

    let body = response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("").to_string();
    Ok(body)
}

/// A running `runbridge` process that is killed on drop.
pub struct BridgeProcess {
    child: Child,
    port: u16,
    socket_path: Option<PathBuf>,
    _socket_dir: Option<tempfile::TempDir>,
}

/// Builder for the flags a [`BridgeProcess`] is started with.
#[derive(Default)]
pub struct BridgeBuilder {
    socket: bool,
    auth_token: Option<String>,
    run_timeout: Option<u64>,
}

impl BridgeBuilder {
    /// Also serve on a Unix socket (`--socket`).
    pub fn socket(mut self) -> Self {
        self.socket = true;
        self
    }

    /// Require a bearer token (`--auth-token`).
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    /// Per-run wall-clock limit in seconds (`--run-timeout`).
    pub fn run_timeout(mut self, secs: u64) -> Self {
        self.run_timeout = Some(secs);
        self
    }

    /// Spawn runbridge with `sh` as the interpreter.
    pub fn spawn(self) -> anyhow::Result<BridgeProcess> {
        let binary = runbridge_binary();
        anyhow::ensure!(binary.exists(), "runbridge binary not found at {}", binary.display());

        let port = free_port()?;
        let (socket_path, socket_dir) = if self.socket {
            let dir = tempfile::tempdir()?;
            let path = dir.path().join("runbridge.sock");
            (Some(path), Some(dir))
        } else {
            (None, None)
        };

        let mut args: Vec<String> = vec!["--port".into(), port.to_string()];
        if let Some(ref p) = socket_path {
            args.extend(["--socket".into(), p.to_string_lossy().into_owned()]);
        }
        if let Some(ref token) = self.auth_token {
            args.extend(["--auth-token".into(), token.clone()]);
        }
        if let Some(secs) = self.run_timeout {
            args.extend(["--run-timeout".into(), secs.to_string()]);
        }
        args.extend([
            "--host".into(),
            "127.0.0.1".into(),
            "--script-suffix".into(),
            ".sh".into(),
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
            "--".into(),
            "sh".into(),
        ]);

        let child = Command::new(&binary)
            .args(&args)
            .env("RUNBRIDGE_KILL_GRACE_MS", "200")
            .env("RUNBRIDGE_CLOSE_TIMEOUT_MS", "3000")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(BridgeProcess { child, port, socket_path, _socket_dir: socket_dir })
    }
}

impl BridgeProcess {
    /// Create a builder for custom flags.
    pub fn build() -> BridgeBuilder {
        BridgeBuilder::default()
    }

    /// Spawn runbridge with default flags.
    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// The Unix socket path (if enabled).
    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Base URL for HTTP requests.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// WebSocket URL.
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Poll health until responsive.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("runbridge did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Send `signal` to the runbridge process.
    pub fn signal(&self, signal: Signal) -> anyhow::Result<()> {
        kill(Pid::from_raw(self.child.id() as i32), signal)?;
        Ok(())
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("runbridge did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for BridgeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
