//! Request identity and lifecycle state.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one submitted unit of code.
///
/// Combines a millisecond timestamp with a random nonce so ids stay
/// unique even under rapid issuance from several sessions. The textual
/// form is `<millis>-<nonce>`, which never contains the newline
/// delimiter used by the wire framing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId {
    stamp: u64,
    nonce: u32,
}

impl RequestId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let nonce = Uuid::new_v4().as_fields().0;
        Self { stamp, nonce }
    }

    /// Build an identifier from explicit parts.
    ///
    /// Intended for tests and simulated sessions that need stable ids.
    #[must_use]
    pub const fn from_parts(stamp: u64, nonce: u32) -> Self {
        Self { stamp, nonce }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.stamp, self.nonce)
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created but not yet written to the channel.
    Pending,
    /// Written to the channel; its listener owns the connection.
    Running,
    /// Completion sentinel observed; output is final.
    Completed,
    /// Transport or protocol failure; error available on the handle.
    Failed,
}

impl RequestStatus {
    /// Whether the request has reached a final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let id = RequestId::from_parts(1000, 42);
        assert_eq!(id.to_string(), "1000-42");
    }

    #[test]
    fn test_generated_ids_differ() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_has_no_framing_delimiters() {
        let id = RequestId::generate().to_string();
        assert!(!id.contains('\n'));
        assert!(!id.contains(':'));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Running.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&RequestStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");

        let parsed: RequestStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(parsed, RequestStatus::Completed);
    }
}
