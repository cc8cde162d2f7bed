//! Per-request output listener.

use std::time::Duration;

use bytes::Bytes;
use remote_interp_core::protocol::{self, CompletionScanner};
use remote_interp_core::{Completion, ExecutionError};
use tokio::sync::OwnedMutexGuard;

use crate::connection::Connection;

/// Consume the shared connection on behalf of one request until its
/// completion sentinel, a transport failure, or the idle bound.
///
/// Runs detached from the submitting caller, so failures are surfaced
/// through the handle instead of being raised here. Holding the owned
/// connection guard for the task's whole life is what enforces the
/// one-request-at-a-time discipline; dropping it on exit releases the
/// channel to the next queued request.
pub(crate) async fn run(
    mut conn: OwnedMutexGuard<Connection>,
    completion: Completion,
    idle_timeout: Option<Duration>,
) {
    let id = completion.id().clone();
    match listen(&mut conn, &completion, idle_timeout).await {
        Ok(output) => {
            tracing::debug!(request = %id, bytes = output.len(), "completion marker observed");
            completion.finish(output);
        }
        Err(err) => {
            tracing::warn!(request = %id, %err, "request failed, poisoning channel");
            conn.poison();
            completion.fail(err);
        }
    }
}

async fn listen(
    conn: &mut Connection,
    completion: &Completion,
    idle_timeout: Option<Duration>,
) -> Result<String, ExecutionError> {
    let scanner = CompletionScanner::new(completion.id());
    let mut buf: Vec<u8> = Vec::new();
    let mut surfaced = 0usize;

    loop {
        let chunk = read_bounded(conn, idle_timeout).await?;
        if chunk.is_empty() {
            return Err(ExecutionError::Transport(
                "connection closed before completion marker".into(),
            ));
        }
        buf.extend_from_slice(&chunk);

        if let Some(pos) = scanner.find(&buf) {
            let line = protocol::line_bounds(&buf, pos);
            if line.start > surfaced {
                completion.push_chunk(String::from_utf8_lossy(&buf[surfaced..line.start]));
            }
            buf.drain(line);
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }

        // Withhold a tail that could still turn out to be a split
        // sentinel; everything before it is application output and is
        // surfaced to incremental readers right away.
        let safe = buf.len().saturating_sub(scanner.holdback());
        if safe > surfaced {
            completion.push_chunk(String::from_utf8_lossy(&buf[surfaced..safe]));
            surfaced = safe;
        }
    }
}

async fn read_bounded(
    conn: &mut Connection,
    idle_timeout: Option<Duration>,
) -> Result<Bytes, ExecutionError> {
    let read = conn.read_chunk();
    let result = match idle_timeout {
        Some(bound) => tokio::time::timeout(bound, read)
            .await
            .map_err(|_| ExecutionError::CompletionTimeout)?,
        None => read.await,
    };
    result.map_err(|err| ExecutionError::Transport(err.to_string()))
}
