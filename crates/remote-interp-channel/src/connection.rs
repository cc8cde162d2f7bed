//! The persistent stream connection to the interpreter.

use std::io;

use bytes::{Bytes, BytesMut};
use remote_interp_core::ChannelError;
use remote_interp_core::protocol;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ChannelConfig;

/// One duplex byte stream to a remote interpreter.
///
/// Exposes only the primitives the layers above need: `write_all`,
/// `read_chunk`, and an idempotent `close`. No retries happen here;
/// every failure is reported upward, and a failed read or write
/// poisons the connection so queued requests fail fast instead of
/// waiting on a stream that will never progress.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    read_buffer_size: usize,
    poisoned: bool,
}

impl Connection {
    /// Establish the stream connection and verify the interpreter's
    /// greeting.
    ///
    /// The remote speaks first: its greeting chunk either welcomes the
    /// session or carries the `ConnectionRefused` token (e.g. when the
    /// interpreter is already bound to another client).
    ///
    /// # Errors
    /// `Refused` on an application-level refusal, `Connect` when the
    /// stream cannot be established or no greeting arrives within the
    /// handshake bound.
    pub async fn open(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let connect_err = |source: io::Error| ChannelError::Connect {
            host: config.host.clone(),
            port: config.port,
            source,
        };

        let mut stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(connect_err)?;

        let mut greeting = BytesMut::with_capacity(1024);
        let read = tokio::time::timeout(config.handshake_timeout, stream.read_buf(&mut greeting))
            .await
            .map_err(|_| {
                connect_err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no handshake from interpreter",
                ))
            })?
            .map_err(connect_err)?;
        if read == 0 {
            return Err(connect_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "interpreter closed the connection during handshake",
            )));
        }

        if protocol::signals_refusal(&greeting) {
            return Err(ChannelError::Refused {
                host: config.host.clone(),
                port: config.port,
            });
        }

        tracing::debug!(
            host = %config.host,
            port = config.port,
            greeting = %String::from_utf8_lossy(&greeting).trim(),
            "interpreter greeting accepted"
        );

        Ok(Self {
            stream: Some(stream),
            read_buffer_size: config.read_buffer_size,
            poisoned: false,
        })
    }

    /// Write the full buffer to the stream.
    ///
    /// # Errors
    /// `Poisoned` after an earlier failure, `Transport` when the write
    /// fails (which also poisons the connection).
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        if self.poisoned {
            return Err(ChannelError::Poisoned);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(closed());
        };
        let result: io::Result<()> = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        }
        .await;
        result.inspect_err(|_| self.poisoned = true)?;
        Ok(())
    }

    /// Read the next available chunk, up to the configured buffer
    /// size. An empty chunk signals end of stream.
    ///
    /// # Errors
    /// `Poisoned` after an earlier failure, `Transport` when the read
    /// fails (which also poisons the connection).
    pub async fn read_chunk(&mut self) -> Result<Bytes, ChannelError> {
        if self.poisoned {
            return Err(ChannelError::Poisoned);
        }
        let size = self.read_buffer_size;
        let Some(stream) = self.stream.as_mut() else {
            return Err(closed());
        };
        let mut chunk = BytesMut::with_capacity(size);
        match stream.read_buf(&mut chunk).await {
            Ok(_) => Ok(chunk.freeze()),
            Err(source) => {
                self.poisoned = true;
                Err(source.into())
            }
        }
    }

    /// Mark the connection unusable for further requests.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Whether a transport failure has made the connection unusable.
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Whether the underlying stream is still held.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Release the underlying stream. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                tracing::debug!(%err, "shutdown on close");
            }
        }
    }
}

fn closed() -> ChannelError {
    ChannelError::Transport(io::Error::new(
        io::ErrorKind::NotConnected,
        "connection closed",
    ))
}
