// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turns a process's stdout and stderr pipes into tagged output events.
//!
//! Each pipe has its own reader task, so chunks from one stream keep their
//! order while the two streams are forwarded independently.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::process::{ProcessEvent, StreamKind};
use crate::utf8::Utf8Accumulator;

const READ_CHUNK: usize = 8192;

/// Reader tasks for one process.
pub struct Readers {
    stdout: JoinHandle<()>,
    stderr: JoinHandle<()>,
    exited: CancellationToken,
}

/// Start one reader per pipe. Once [`Readers::drain`] is called, a pipe
/// that stays silent for `stall_timeout` is abandoned.
pub fn spawn_readers<O, E>(
    run_id: u64,
    stdout: O,
    stderr: E,
    events: mpsc::Sender<ProcessEvent>,
    stall_timeout: Duration,
) -> Readers
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let exited = CancellationToken::new();
    Readers {
        stdout: tokio::spawn(pump_stream(
            run_id,
            StreamKind::Stdout,
            stdout,
            events.clone(),
            exited.clone(),
            stall_timeout,
        )),
        stderr: tokio::spawn(pump_stream(
            run_id,
            StreamKind::Stderr,
            stderr,
            events,
            exited.clone(),
            stall_timeout,
        )),
        exited,
    }
}

impl Readers {
    /// Mark the process as exited and wait for both streams to finish.
    ///
    /// Only waiting on a silent pipe is time-boxed. Chunks already read are
    /// always delivered, however slowly the receiver consumes them.
    pub async fn drain(self) {
        self.exited.cancel();
        let _ = self.stdout.await;
        let _ = self.stderr.await;
    }
}

/// Forward chunks from `reader` until EOF, until the receiver is gone, or
/// until the pipe has been silent for `stall_timeout` after `exited` fires.
pub async fn pump_stream<R>(
    run_id: u64,
    stream: StreamKind,
    mut reader: R,
    events: mpsc::Sender<ProcessEvent>,
    exited: CancellationToken,
    stall_timeout: Duration,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut utf8 = Utf8Accumulator::new();
    loop {
        let read = tokio::select! {
            biased;
            read = reader.read(&mut buf) => read,
            _ = stalled(&exited, stall_timeout) => {
                warn!(run = run_id, stream = stream.as_str(), "pipe held open after exit; closing stream");
                break;
            }
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(run = run_id, stream = stream.as_str(), err = %e, "read failed");
                break;
            }
        };
        let text = utf8.push(&buf[..n]).into_owned();
        if text.is_empty() {
            continue;
        }
        if events.send(ProcessEvent::output(run_id, stream, text)).await.is_err() {
            return;
        }
    }
    if let Some(rest) = utf8.finish() {
        let _ = events.send(ProcessEvent::output(run_id, stream, rest)).await;
    }
}

/// Resolves once the process has exited and a further `timeout` has passed.
async fn stalled(exited: &CancellationToken, timeout: Duration) {
    exited.cancelled().await;
    tokio::time::sleep(timeout).await;
}

#[cfg(test)]
#[path = "mux_tests.rs"]
mod tests;
