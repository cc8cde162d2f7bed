//! Channel configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port the interpreter service listens on by default.
pub const DEFAULT_PORT: u16 = 4444;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Connection parameters for one interpreter session.
///
/// Passed explicitly to each session constructor; nothing here is
/// process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Interpreter host name or address.
    pub host: String,
    /// Interpreter port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bound on waiting for the interpreter's greeting at open time.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,
    /// Bound on the time between output chunks before an in-flight
    /// request is failed with a completion timeout. `None` waits
    /// indefinitely, as the wire protocol itself would.
    #[serde(default)]
    pub completion_timeout: Option<Duration>,
    /// Size of each read from the connection.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_handshake_timeout() -> Duration {
    DEFAULT_HANDSHAKE_TIMEOUT
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

impl ChannelConfig {
    /// Configuration for `host` with default port and timeouts.
    #[must_use]
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            completion_timeout: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Override the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the handshake bound.
    #[must_use]
    pub fn with_handshake_timeout(mut self, bound: Duration) -> Self {
        self.handshake_timeout = bound;
        self
    }

    /// Bound the wait for output between chunks.
    #[must_use]
    pub fn with_completion_timeout(mut self, bound: Duration) -> Self {
        self.completion_timeout = Some(bound);
        self
    }

    /// Override the read chunk size.
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::new("ccs-host");
        assert_eq!(config.host, "ccs-host");
        assert_eq!(config.port, 4444);
        assert_eq!(config.completion_timeout, None);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ChannelConfig::new("localhost")
            .with_port(4445)
            .with_completion_timeout(Duration::from_secs(30));
        assert_eq!(config.port, 4445);
        assert_eq!(config.completion_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: ChannelConfig = serde_json::from_str(r#"{"host": "lab-interp"}"#).unwrap();
        assert_eq!(config.host, "lab-interp");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.read_buffer_size, 8 * 1024);
    }
}
