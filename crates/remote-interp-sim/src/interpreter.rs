//! In-process interpreter double.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use remote_interp_core::{ChannelError, ExecutionHandle, RequestId, ScriptInterpreter};

type ReplyFn = dyn Fn(&str) -> String + Send + Sync;

/// Interpreter double honoring the live session's observable contract
/// without a remote process.
///
/// Replies are produced by a configurable function of the submitted
/// code, and script execution is keyed off the script path without
/// touching the filesystem. Every submission is logged so tests can
/// assert ordering.
pub struct SimInterpreter {
    reply: Arc<ReplyFn>,
    submissions: Mutex<Vec<String>>,
}

impl SimInterpreter {
    /// Double that replies with empty output to everything.
    #[must_use]
    pub fn new() -> Self {
        Self::with_reply(|_| String::new())
    }

    /// Double whose replies are computed from the submitted code.
    #[must_use]
    pub fn with_reply<F>(reply: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            reply: Arc::new(reply),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Submitted payloads, in submission order.
    #[must_use]
    pub fn submissions(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }
}

impl Default for SimInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptInterpreter for SimInterpreter {
    async fn submit(&self, code: &str) -> Result<ExecutionHandle, ChannelError> {
        self.submissions.lock().unwrap().push(code.to_string());
        let reply = (self.reply)(code);

        let (handle, completion) = ExecutionHandle::channel(RequestId::generate());
        completion.mark_running();
        tokio::spawn(async move {
            if !reply.is_empty() {
                completion.push_chunk(reply.clone());
            }
            completion.finish(reply);
        });
        Ok(handle)
    }

    async fn submit_script(&self, path: &Path) -> Result<ExecutionHandle, ChannelError> {
        // The double keys replies off the script path; no file I/O.
        self.submit(&path.display().to_string()).await
    }

    async fn execute_script(&self, path: &Path, setup: &[String]) -> Result<String, ChannelError> {
        for statement in setup {
            self.execute(statement).await?;
        }
        let handle = self.submit_script(path).await?;
        Ok(handle.output().await?)
    }
}
