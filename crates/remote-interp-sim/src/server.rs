//! Scripted wire-protocol server for offline integration tests.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use remote_interp_core::protocol::{DONE_PREFIX, END_PREFIX, REFUSAL_TOKEN, START_PREFIX};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, tcp::OwnedWriteHalf};
use tokio::task::JoinHandle;

type ReplyFn = dyn Fn(&str) -> String + Send + Sync;

/// Behavior knobs for a [`SimServer`].
#[derive(Clone)]
pub struct SimServerBuilder {
    refuse: bool,
    reply: Arc<ReplyFn>,
    reply_delay: Option<Duration>,
    suppress_completion: bool,
    disconnect_mid_execution: bool,
}

impl SimServerBuilder {
    fn new() -> Self {
        Self {
            refuse: false,
            reply: Arc::new(|_| String::new()),
            reply_delay: None,
            suppress_completion: false,
            disconnect_mid_execution: false,
        }
    }

    /// Send the refusal token instead of a greeting.
    #[must_use]
    pub fn refuse(mut self) -> Self {
        self.refuse = true;
        self
    }

    /// Compute the console output for each executed payload.
    #[must_use]
    pub fn reply<F>(mut self, reply: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.reply = Arc::new(reply);
        self
    }

    /// Simulate execution time before any output is emitted.
    #[must_use]
    pub fn reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = Some(delay);
        self
    }

    /// Emit output but never the completion marker, as a remote that
    /// died mid-execution would.
    #[must_use]
    pub fn suppress_completion(mut self) -> Self {
        self.suppress_completion = true;
        self
    }

    /// Emit output, then drop the connection without completing.
    #[must_use]
    pub fn disconnect_mid_execution(mut self) -> Self {
        self.disconnect_mid_execution = true;
        self
    }

    /// Bind an ephemeral local port and start serving.
    ///
    /// # Errors
    /// Propagates the bind failure.
    pub async fn spawn(self) -> io::Result<SimServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let executed = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&executed);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        tracing::debug!(%peer, "simulated interpreter accepted a client");
                        tokio::spawn(serve_connection(socket, self.clone(), Arc::clone(&log)));
                    }
                    Err(err) => {
                        tracing::warn!(%err, "accept failed");
                        break;
                    }
                }
            }
        });

        Ok(SimServer {
            addr,
            executed,
            accept_task,
        })
    }
}

/// A local TCP server speaking the interpreter wire protocol.
///
/// Greets (or refuses) each client, parses start/end envelopes, and
/// answers with configurable console output followed by the request's
/// completion marker. Executed payloads are logged in the order the
/// server began running them, which is what ordering tests assert on.
pub struct SimServer {
    addr: SocketAddr,
    executed: Arc<Mutex<Vec<String>>>,
    accept_task: JoinHandle<()>,
}

impl SimServer {
    /// Builder with default behavior: greet, empty replies, complete
    /// every request.
    #[must_use]
    pub fn builder() -> SimServerBuilder {
        SimServerBuilder::new()
    }

    /// Spawn with default behavior.
    ///
    /// # Errors
    /// Propagates the bind failure.
    pub async fn spawn() -> io::Result<Self> {
        Self::builder().spawn().await
    }

    /// Address the server listens on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Payloads in the order the interpreter began executing them.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl Drop for SimServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(
    socket: TcpStream,
    behavior: SimServerBuilder,
    executed: Arc<Mutex<Vec<String>>>,
) {
    let (read_half, mut writer) = socket.into_split();

    if behavior.refuse {
        let _ = writer.write_all(format!("{REFUSAL_TOKEN}\n").as_bytes()).await;
        return;
    }
    if writer.write_all(b"ConnectionEstablished\n").await.is_err() {
        return;
    }

    let mut lines = BufReader::new(read_half).lines();
    let mut current: Option<(String, Vec<String>)> = None;

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(id) = line.strip_prefix(START_PREFIX) {
            current = Some((id.to_string(), Vec::new()));
        } else if let Some(end_id) = line.strip_prefix(END_PREFIX) {
            let Some((id, payload_lines)) = current.take() else {
                continue;
            };
            if end_id != id {
                tracing::warn!(%id, %end_id, "mismatched envelope markers");
                continue;
            }
            let payload = payload_lines.join("\n");
            executed.lock().unwrap().push(payload.clone());

            let done = execute(&behavior, &mut writer, &id, &payload).await;
            if !done {
                return;
            }
        } else if let Some((_, payload_lines)) = current.as_mut() {
            payload_lines.push(line);
        }
    }
}

/// Run one framed payload. Returns false when the connection should
/// drop.
async fn execute(
    behavior: &SimServerBuilder,
    writer: &mut OwnedWriteHalf,
    id: &str,
    payload: &str,
) -> bool {
    if let Some(delay) = behavior.reply_delay {
        tokio::time::sleep(delay).await;
    }

    let reply = (behavior.reply)(payload);
    if !reply.is_empty() && writer.write_all(reply.as_bytes()).await.is_err() {
        return false;
    }

    if behavior.disconnect_mid_execution {
        return false;
    }
    if behavior.suppress_completion {
        return true;
    }

    writer
        .write_all(format!("{DONE_PREFIX}{id}\n").as_bytes())
        .await
        .is_ok()
}
