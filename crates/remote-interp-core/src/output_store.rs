//! Broadcast + history store for a request's console output.

use std::{
    collections::VecDeque,
    sync::RwLock,
};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// History size limit per request (16 MB of console text).
const HISTORY_BYTES: usize = 16 * 1024 * 1024;

/// One record on a request's output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMsg {
    /// A chunk of console output, surfaced as it arrived.
    Chunk(String),
    /// The request reached a terminal state; no further chunks follow.
    Finished,
}

impl OutputMsg {
    fn approx_bytes(&self) -> usize {
        match self {
            Self::Chunk(s) => s.len(),
            Self::Finished => 0,
        }
    }
}

#[derive(Clone)]
struct StoredMsg {
    msg: OutputMsg,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredMsg>,
    total_bytes: usize,
}

/// Output store with broadcast and history support.
///
/// The listener pushes chunks as they arrive; consumers that subscribe
/// late receive history first and then switch to live updates, so a
/// log follower never misses the start of a script's output.
pub struct OutputStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<OutputMsg>,
}

impl Default for OutputStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputStore {
    /// Create a new output store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(16),
                total_bytes: 0,
            }),
            sender,
        }
    }

    /// Push a record to both live listeners and history.
    pub fn push(&self, msg: OutputMsg) {
        let _ = self.sender.send(msg.clone()); // live listeners
        let bytes = msg.approx_bytes();

        let mut inner = self.inner.write().unwrap();
        while inner.total_bytes.saturating_add(bytes) > HISTORY_BYTES {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredMsg { msg, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Push a chunk of console output.
    pub fn push_chunk<S: Into<String>>(&self, s: S) {
        self.push(OutputMsg::Chunk(s.into()));
    }

    /// Push the terminal record.
    pub fn push_finished(&self) {
        self.push(OutputMsg::Finished);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<OutputMsg> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<OutputMsg> {
        self.inner
            .read()
            .unwrap()
            .history
            .iter()
            .map(|s| s.msg.clone())
            .collect()
    }

    /// Stream that yields history first, then live updates.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, OutputMsg> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Stream of output chunks, ending when the request finishes.
    #[must_use]
    pub fn chunk_stream(&self) -> futures::stream::BoxStream<'static, String> {
        self.history_plus_stream()
            .take_while(|msg| future::ready(!matches!(msg, OutputMsg::Finished)))
            .filter_map(|msg| async move {
                match msg {
                    OutputMsg::Chunk(s) => Some(s),
                    OutputMsg::Finished => None,
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_preserves_order() {
        let store = OutputStore::new();
        store.push_chunk("a");
        store.push_chunk("b");
        store.push_finished();

        assert_eq!(
            store.get_history(),
            vec![
                OutputMsg::Chunk("a".into()),
                OutputMsg::Chunk("b".into()),
                OutputMsg::Finished,
            ]
        );
    }

    #[tokio::test]
    async fn test_chunk_stream_ends_at_finished() {
        let store = OutputStore::new();
        store.push_chunk("hi\n");
        store.push_chunk("there\n");
        store.push_finished();

        let chunks: Vec<String> = store.chunk_stream().collect().await;
        assert_eq!(chunks, vec!["hi\n".to_string(), "there\n".to_string()]);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_history_then_live() {
        let store = OutputStore::new();
        store.push_chunk("early\n");

        let mut stream = store.chunk_stream();
        assert_eq!(stream.next().await.as_deref(), Some("early\n"));

        store.push_chunk("late\n");
        store.push_finished();
        assert_eq!(stream.next().await.as_deref(), Some("late\n"));
        assert_eq!(stream.next().await, None);
    }
}
