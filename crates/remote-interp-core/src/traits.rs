//! Interpreter seam and job-collaborator traits.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handle::{ExecutionError, ExecutionHandle};

/// Channel-level error, reported synchronously to the submitting
/// caller. Failures that happen after submission travel through the
/// [`ExecutionHandle`] instead.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The remote declined the session at open time.
    #[error("connection refused by interpreter at {host}:{port}")]
    Refused { host: String, port: u16 },
    /// The stream connection could not be established.
    #[error("could not connect to interpreter at {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// A read or write primitive failed after the session was
    /// established.
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),
    /// A previous request's transport failure made the channel
    /// unusable; queued requests fail fast instead of hanging.
    #[error("channel unusable after an earlier transport failure")]
    Poisoned,
    /// A script file could not be read.
    #[error("failed to read script {path}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A synchronous wrapper observed an execution failure.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// A session capable of executing code on a remote interpreter.
///
/// `submit` is the one required operation; the synchronous and
/// script-file conveniences are layered on it. Implemented by the live
/// channel session and by the offline simulator, so callers and tests
/// share one contract.
#[async_trait]
pub trait ScriptInterpreter: Send + Sync {
    /// Submit code for execution and return immediately with a handle
    /// (fire-and-continue).
    async fn submit(&self, code: &str) -> Result<ExecutionHandle, ChannelError>;

    /// Submit code and wait for its output (submit-and-wait).
    async fn execute(&self, code: &str) -> Result<String, ChannelError> {
        let handle = self.submit(code).await?;
        Ok(handle.output().await?)
    }

    /// Submit the contents of a script file, returning a handle.
    async fn submit_script(&self, path: &Path) -> Result<ExecutionHandle, ChannelError> {
        let content = read_script(path).await?;
        self.submit(&content).await
    }

    /// Execute each setup statement in order, then the script file,
    /// waiting for the script's output.
    async fn execute_script(&self, path: &Path, setup: &[String]) -> Result<String, ChannelError> {
        for statement in setup {
            tracing::debug!(%statement, "executing setup statement");
            self.execute(statement).await?;
        }
        tracing::info!(script = %path.display(), "executing script");
        let content = read_script(path).await?;
        self.execute(&content).await
    }
}

async fn read_script(path: &Path) -> Result<String, ChannelError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ChannelError::Script {
            path: path.to_path_buf(),
            source,
        })
}

/// Final result of a script job, handed to a [`ResultSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// The script that was executed.
    pub script: String,
    /// Accumulated, marker-stripped console output (empty on failure).
    pub output: String,
    /// Whether execution completed without a channel failure.
    pub success: bool,
}

/// Supplies per-job setup statements, submitted before the main
/// script.
pub trait SetupProvider: Send + Sync {
    /// Statements to execute, in order.
    fn setup_statements(&self) -> Vec<String>;
}

/// Setup provider backed by a fixed statement list.
#[derive(Debug, Default, Clone)]
pub struct StaticSetup(pub Vec<String>);

impl SetupProvider for StaticSetup {
    fn setup_statements(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// Receives the outcome of a script job for downstream recording.
pub trait ResultSink: Send + Sync {
    /// Record one job outcome.
    fn record(&self, outcome: &ExecutionOutcome);
}

#[cfg(test)]
mod tests {
    use crate::request::RequestId;

    use super::*;

    struct EchoInterpreter;

    #[async_trait]
    impl ScriptInterpreter for EchoInterpreter {
        async fn submit(&self, code: &str) -> Result<ExecutionHandle, ChannelError> {
            let (handle, completion) = ExecutionHandle::channel(RequestId::generate());
            completion.mark_running();
            completion.finish(format!("{code}\n"));
            Ok(handle)
        }
    }

    #[tokio::test]
    async fn test_execute_waits_for_output() {
        let interp = EchoInterpreter;
        assert_eq!(interp.execute("print('hi')").await.unwrap(), "print('hi')\n");
    }

    #[tokio::test]
    async fn test_execute_script_missing_file() {
        let interp = EchoInterpreter;
        let err = interp
            .execute_script(Path::new("/nonexistent/script.py"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Script { .. }));
    }

    #[test]
    fn test_static_setup_preserves_order() {
        let setup = StaticSetup(vec!["a = 1".into(), "b = 2".into()]);
        assert_eq!(setup.setup_statements(), vec!["a = 1", "b = 2"]);
    }
}
