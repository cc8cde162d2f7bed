//! The dispatching interpreter session.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use remote_interp_core::protocol::Envelope;
use remote_interp_core::{
    ChannelError, ExecutionHandle, ExecutionOutcome, RequestId, ResultSink, ScriptInterpreter,
    SetupProvider,
};
use tokio::sync::Mutex;

use crate::config::ChannelConfig;
use crate::connection::Connection;
use crate::listener;

/// One session with a remote interpreter.
///
/// Owns the persistent connection behind an async mutex. A request
/// holds the connection exclusively from envelope write until its
/// listener observes the completion sentinel, so submissions on one
/// session execute strictly in order and two requests' output can
/// never interleave on the shared stream.
pub struct InterpreterSession {
    config: ChannelConfig,
    conn: Arc<Mutex<Connection>>,
}

impl InterpreterSession {
    /// Open a session using the given configuration.
    ///
    /// # Errors
    /// Propagates connect-time failures, including the interpreter's
    /// application-level refusal.
    pub async fn connect(config: ChannelConfig) -> Result<Self, ChannelError> {
        let conn = Connection::open(&config).await?;
        tracing::info!(host = %config.host, port = config.port, "interpreter session established");
        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a session and register a named interpreter before
    /// returning.
    ///
    /// # Errors
    /// As [`connect`](Self::connect), plus any failure of the
    /// registration statement itself.
    pub async fn connect_named(config: ChannelConfig, name: &str) -> Result<Self, ChannelError> {
        let session = Self::connect(config).await?;
        // Names ride the line-framed wire, so embedded newlines are dropped.
        let name = name.replace('\n', "");
        session
            .execute(&format!("initializeInterpreter {name}"))
            .await?;
        Ok(session)
    }

    /// Submit code for execution and return immediately with a handle
    /// (fire-and-continue).
    ///
    /// Suspends only while a previous request still owns the
    /// connection, never for the execution itself. Write failures are
    /// reported synchronously here; everything later travels through
    /// the handle.
    ///
    /// # Errors
    /// `Poisoned` when an earlier request broke the channel,
    /// `Transport` when the envelope write fails.
    pub async fn submit(&self, code: &str) -> Result<ExecutionHandle, ChannelError> {
        let mut conn = Arc::clone(&self.conn).lock_owned().await;
        if conn.is_poisoned() {
            return Err(ChannelError::Poisoned);
        }

        let id = RequestId::generate();
        let envelope = Envelope::new(&id, code).encode();
        conn.write_all(envelope.as_bytes()).await?;

        let (handle, completion) = ExecutionHandle::channel(id.clone());
        completion.mark_running();
        tracing::debug!(request = %id, bytes = envelope.len(), "request submitted");

        // The listener keeps the owned guard until it observes the
        // completion sentinel; dropping it releases the channel to the
        // next queued request.
        tokio::spawn(listener::run(
            conn,
            completion,
            self.config.completion_timeout,
        ));
        Ok(handle)
    }

    /// Run a script job: provider-supplied setup statements first,
    /// then the script, recording the outcome with the sink.
    ///
    /// # Errors
    /// The first channel failure encountered; the sink sees the
    /// outcome either way.
    pub async fn run_script_job(
        &self,
        provider: &dyn SetupProvider,
        sink: &dyn ResultSink,
        path: &Path,
    ) -> Result<String, ChannelError> {
        let result = self
            .execute_script(path, &provider.setup_statements())
            .await;
        let outcome = ExecutionOutcome {
            script: path.display().to_string(),
            output: result.as_deref().unwrap_or_default().to_string(),
            success: result.is_ok(),
        };
        sink.record(&outcome);
        result
    }

    /// Close the underlying connection.
    ///
    /// Waits for any in-flight request to release the channel first.
    /// Safe to call repeatedly.
    pub async fn close(&self) {
        self.conn.lock().await.close().await;
    }
}

#[async_trait]
impl ScriptInterpreter for InterpreterSession {
    async fn submit(&self, code: &str) -> Result<ExecutionHandle, ChannelError> {
        Self::submit(self, code).await
    }
}
