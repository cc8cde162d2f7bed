//! Caller-visible handle for an in-flight or completed request.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::output_store::OutputStore;
use crate::request::{RequestId, RequestStatus};

/// Failure surfaced through a handle after submission succeeded.
///
/// Kept cloneable so the blocking accessor stays idempotent: every
/// call after completion returns the same value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The connection failed or closed before the completion marker.
    #[error("transport failure during execution: {0}")]
    Transport(String),
    /// No output arrived within the configured completion bound.
    #[error("completion marker not observed within the configured bound")]
    CompletionTimeout,
    /// A bounded output wait elapsed; the request is still in flight.
    #[error("timed out waiting for output")]
    WaitTimeout,
}

struct Shared {
    id: RequestId,
    store: Arc<OutputStore>,
    // Held here so the completion side can always publish status.
    status_rx: watch::Receiver<RequestStatus>,
    result: OnceLock<Result<String, ExecutionError>>,
}

/// The value returned to the caller immediately upon submission.
///
/// Exposes a non-blocking status read, a blocking (suspending) output
/// accessor, and an incremental chunk stream. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionHandle {
    shared: Arc<Shared>,
}

impl ExecutionHandle {
    /// Create a handle together with its completion side.
    ///
    /// The listener (or a simulated session) drives the `Completion`;
    /// the handle is handed to the caller. Dropping the completion
    /// side without reporting marks the handle failed, so a dying
    /// listener task is always observable.
    #[must_use]
    pub fn channel(id: RequestId) -> (Self, Completion) {
        let (status_tx, status_rx) = watch::channel(RequestStatus::Pending);
        let shared = Arc::new(Shared {
            id,
            store: Arc::new(OutputStore::new()),
            status_rx,
            result: OnceLock::new(),
        });
        let handle = Self {
            shared: Arc::clone(&shared),
        };
        let completion = Completion {
            shared,
            status_tx,
            reported: false,
        };
        (handle, completion)
    }

    /// The request this handle is bound to.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.shared.id
    }

    /// Current lifecycle state, without side effects.
    #[must_use]
    pub fn status(&self) -> RequestStatus {
        *self.shared.status_rx.borrow()
    }

    /// Whether the request has not yet reached a terminal state.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.status().is_terminal()
    }

    /// Suspend until the request completes, then return the
    /// accumulated, marker-stripped output.
    ///
    /// Idempotent: repeated calls after completion return the same
    /// value.
    ///
    /// # Errors
    /// Returns the failure the listener reported, if any.
    pub async fn output(&self) -> Result<String, ExecutionError> {
        let mut rx = self.shared.status_rx.clone();
        // An Err here means the completion side is gone, in which case
        // its drop guard already recorded a result.
        let _ = rx.wait_for(|status| status.is_terminal()).await;
        self.shared
            .result
            .get()
            .cloned()
            .unwrap_or_else(|| Err(ExecutionError::Transport("result never reported".into())))
    }

    /// Bounded variant of [`output`](Self::output).
    ///
    /// On timeout the request stays in flight: its listener keeps
    /// consuming the connection so the stream position stays
    /// consistent, and a later `output().await` still resolves.
    ///
    /// # Errors
    /// Returns `WaitTimeout` when the bound elapses, otherwise as
    /// [`output`](Self::output).
    pub async fn output_timeout(&self, bound: Duration) -> Result<String, ExecutionError> {
        tokio::time::timeout(bound, self.output())
            .await
            .map_err(|_| ExecutionError::WaitTimeout)?
    }

    /// Incremental output chunks as they arrive, ending at completion.
    #[must_use]
    pub fn chunk_stream(&self) -> futures::stream::BoxStream<'static, String> {
        self.shared.store.chunk_stream()
    }
}

/// Listener-side endpoint of an [`ExecutionHandle`] pair.
pub struct Completion {
    shared: Arc<Shared>,
    status_tx: watch::Sender<RequestStatus>,
    reported: bool,
}

impl Completion {
    /// The request this completion drives.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.shared.id
    }

    /// Mark the request as written to the channel.
    pub fn mark_running(&self) {
        let _ = self.status_tx.send(RequestStatus::Running);
    }

    /// Surface a chunk of console output to incremental readers.
    pub fn push_chunk<S: Into<String>>(&self, chunk: S) {
        self.shared.store.push_chunk(chunk);
    }

    /// Report successful completion with the final output text.
    pub fn finish(mut self, output: String) {
        self.report(Ok(output), RequestStatus::Completed);
    }

    /// Report a failure.
    pub fn fail(mut self, err: ExecutionError) {
        self.report(Err(err), RequestStatus::Failed);
    }

    fn report(&mut self, result: Result<String, ExecutionError>, status: RequestStatus) {
        self.reported = true;
        let _ = self.shared.result.set(result);
        self.shared.store.push_finished();
        let _ = self.status_tx.send(status);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.reported {
            self.report(
                Err(ExecutionError::Transport(
                    "listener terminated without reporting completion".into(),
                )),
                RequestStatus::Failed,
            );
        }
    }
}
