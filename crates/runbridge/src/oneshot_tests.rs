// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::{push_capped, run_once, OneshotSettings, RunRequest};
use crate::config::Config;

fn settings() -> OneshotSettings {
    OneshotSettings::from_config(&Config::test())
}

fn req(code: &str, input: &str) -> RunRequest {
    RunRequest { code: code.to_owned(), input: input.to_owned() }
}

#[tokio::test]
async fn collects_stdout_and_stderr() -> anyhow::Result<()> {
    let resp = run_once(&settings(), req("echo out\necho err >&2\nexit 2", "")).await?;
    assert_eq!(resp.output, "out\n");
    assert_eq!(resp.error, "err\n");
    assert_eq!(resp.exit_code, Some(2));
    assert!(!resp.timed_out);
    Ok(())
}

#[tokio::test]
async fn input_is_delivered_then_closed() -> anyhow::Result<()> {
    let resp = run_once(&settings(), req("read a\nread b\necho \"$b $a\"\ncat", "one\ntwo\n")).await?;
    assert_eq!(resp.output, "two one\n");
    assert_eq!(resp.exit_code, Some(0));
    Ok(())
}

#[tokio::test]
async fn ignored_input_is_not_an_error() -> anyhow::Result<()> {
    let resp = run_once(&settings(), req("exit 0", "unused\n")).await?;
    assert_eq!(resp.exit_code, Some(0));
    Ok(())
}

#[tokio::test]
async fn timeout_kills_process() -> anyhow::Result<()> {
    let mut settings = settings();
    settings.timeout = Duration::from_millis(200);
    let resp = run_once(&settings, req("echo begun\nsleep 30", "")).await?;
    assert!(resp.timed_out);
    assert_eq!(resp.output, "begun\n");
    assert_eq!(resp.exit_code, None);
    assert!(resp.signal.is_some());
    Ok(())
}

#[tokio::test]
async fn output_is_capped() -> anyhow::Result<()> {
    let mut settings = settings();
    settings.max_output_bytes = 10;
    let resp = run_once(&settings, req("i=0\nwhile [ $i -lt 50 ]; do echo line$i; i=$((i+1)); done", "")).await?;
    assert!(resp.truncated);
    assert_eq!(resp.output, "line0\nline");
    assert_eq!(resp.exit_code, Some(0));
    Ok(())
}

#[tokio::test]
async fn spawn_failure_is_an_error() {
    let mut settings = settings();
    settings.spec.program = "/nonexistent/interpreter".into();
    let err = run_once(&settings, req("print(1)", "")).await.err();
    assert_eq!(err.map(|e| e.code().as_str()), Some("SPAWN_FAILED"));
}

#[yare::parameterized(
    fits          = { "", "abc", 5, "abc", false },
    exact         = { "ab", "cde", 5, "abcde", false },
    cut_ascii     = { "ab", "cdefg", 4, "abcd", true },
    full          = { "abcd", "e", 4, "abcd", true },
    cut_multibyte = { "", "a\u{20ac}b", 3, "a", true },
)]
fn capped_append(start: &str, data: &str, cap: usize, expected: &str, dropped: bool) {
    let mut buf = start.to_owned();
    assert_eq!(push_capped(&mut buf, data, cap), dropped);
    assert_eq!(buf, expected);
}
