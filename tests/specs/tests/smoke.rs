// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `runbridge` binary and exercise
//! HTTP, WebSocket, Unix socket, and signal-driven shutdown.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nix::sys::signal::Signal;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use runbridge::oneshot::RunResponse;
use runbridge::transport::http::HealthResponse;
use runbridge_specs::BridgeProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn send(ws: &mut Ws, value: Value) -> anyhow::Result<()> {
    ws.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

async fn recv(ws: &mut Ws) -> anyhow::Result<Value> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
        match msg {
            Message::Text(t) => return Ok(serde_json::from_str(&t)?),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => anyhow::bail!("expected text ws message, got: {other:?}"),
        }
    }
}

/// Collect stdout until the exit frame, returning both.
async fn stdout_until_exit(ws: &mut Ws) -> anyhow::Result<(String, Value)> {
    let mut stdout = String::new();
    loop {
        let frame = recv(ws).await?;
        match frame["type"].as_str() {
            Some("stdout") => stdout.push_str(frame["data"].as_str().unwrap_or_default()),
            Some("exit") => return Ok((stdout, frame)),
            _ => {}
        }
    }
}

/// True while `pid` exists and is not a zombie.
fn pid_alive(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat.rsplit_once(") ").is_some_and(|(_, rest)| !rest.starts_with('Z')),
        Err(_) => false,
    }
}

// -- HTTP (TCP) ---------------------------------------------------------------

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let bridge = BridgeProcess::start()?;
    bridge.wait_healthy(TIMEOUT).await?;

    let resp: HealthResponse =
        reqwest::get(format!("{}/api/v1/health", bridge.base_url())).await?.json().await?;

    assert_eq!(resp.status, "running");
    assert_eq!(resp.sessions, 0);
    assert_eq!(resp.interpreter, "sh");

    Ok(())
}

#[tokio::test]
async fn http_run_once() -> anyhow::Result<()> {
    let bridge = BridgeProcess::start()?;
    bridge.wait_healthy(TIMEOUT).await?;

    let resp: RunResponse = reqwest::Client::new()
        .post(format!("{}/api/v1/run", bridge.base_url()))
        .json(&json!({ "code": "read x; echo \"got $x\"; exit 4", "input": "abc\n" }))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(resp.output, "got abc\n");
    assert_eq!(resp.exit_code, Some(4));

    Ok(())
}

#[tokio::test]
async fn http_auth_required() -> anyhow::Result<()> {
    let bridge = BridgeProcess::build().auth_token("tok").spawn()?;
    bridge.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/sessions", bridge.base_url());
    let resp = client.get(&url).send().await?;
    assert_eq!(resp.status().as_u16(), 401);

    let resp = client.get(&url).bearer_auth("tok").send().await?;
    assert_eq!(resp.status().as_u16(), 200);

    Ok(())
}

// -- WebSocket ----------------------------------------------------------------

#[tokio::test]
async fn ws_run_streams_output() -> anyhow::Result<()> {
    let bridge = BridgeProcess::start()?;
    bridge.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(bridge.ws_url()).await?;
    send(&mut ws, json!({ "type": "run", "code": "echo smoke-marker" })).await?;

    let (stdout, exit) = stdout_until_exit(&mut ws).await?;
    assert_eq!(stdout, "smoke-marker\n");
    assert_eq!(exit["code"], 0);

    Ok(())
}

#[tokio::test]
async fn ws_input_roundtrip() -> anyhow::Result<()> {
    let bridge = BridgeProcess::start()?;
    bridge.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(bridge.ws_url()).await?;
    send(&mut ws, json!({ "type": "run", "code": "echo ready; read n; echo \"hello $n\"" })).await?;

    let first = recv(&mut ws).await?;
    assert_eq!(first["data"], "ready\n");
    send(&mut ws, json!({ "type": "input", "data": "smoke\n" })).await?;

    let (stdout, exit) = stdout_until_exit(&mut ws).await?;
    assert_eq!(stdout, "hello smoke\n");
    assert_eq!(exit["code"], 0);

    Ok(())
}

#[tokio::test]
async fn ws_run_timeout_kills_process() -> anyhow::Result<()> {
    let bridge = BridgeProcess::build().run_timeout(1).spawn()?;
    bridge.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(bridge.ws_url()).await?;
    send(&mut ws, json!({ "type": "run", "code": "sleep 60" })).await?;

    let error = recv(&mut ws).await?;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "TIMEOUT");
    let exit = recv(&mut ws).await?;
    assert_eq!(exit["type"], "exit");
    assert!(exit["signal"].is_number());

    Ok(())
}

// -- Unix socket --------------------------------------------------------------

#[tokio::test]
async fn socket_health() -> anyhow::Result<()> {
    let bridge = BridgeProcess::build().socket().spawn()?;
    bridge.wait_healthy(TIMEOUT).await?;

    let socket_path = bridge.socket_path().ok_or_else(|| anyhow::anyhow!("no socket path"))?;
    let body = runbridge_specs::unix_http_get(socket_path, "/api/v1/health").await?;
    let resp: HealthResponse = serde_json::from_str(&body)?;

    assert_eq!(resp.status, "running");
    assert_eq!(resp.interpreter, "sh");

    Ok(())
}

// -- Shutdown -----------------------------------------------------------------

#[tokio::test]
async fn sigterm_reaps_running_processes() -> anyhow::Result<()> {
    let mut bridge = BridgeProcess::start()?;
    bridge.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(bridge.ws_url()).await?;
    send(&mut ws, json!({ "type": "run", "code": "echo $$; sleep 60" })).await?;
    let first = recv(&mut ws).await?;
    let pid: i32 = first["data"].as_str().unwrap_or_default().trim().parse()?;
    assert!(pid_alive(pid));

    bridge.signal(Signal::SIGTERM)?;
    let status = bridge.wait_exit(TIMEOUT).await?;
    assert!(status.success(), "unclean exit: {status:?}");
    assert!(!pid_alive(pid), "interpreter {pid} outlived the server");

    Ok(())
}
