//! Error types for registration operations.
//!
//! Every store backend maps its native failures onto [`RegistryError`] so
//! callers can tell a lost session from a missing node or a timeout without
//! depending on the backend's own error type.

use thiserror::Error;

/// Top-level error type for the server-registry crate.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Connection or transport-level failure talking to the store.
    #[error("transport error: {0}")]
    Transport(String),

    /// Waited too long, e.g. for the session to be established.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The store session has expired; ephemeral nodes owned by it are gone.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// The addressed node does not exist.
    #[error("no node at '{path}'")]
    NoNode { path: String },

    /// A node already exists at the requested path.
    #[error("node already exists at '{path}'")]
    NodeExists { path: String },

    /// The path is not a legal absolute node path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Configuration error (bad file, bad value).
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other error reported by the coordination store.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RegistryError {
    /// Returns true if the failure is transient and the call may succeed if
    /// repeated (transport or timeout).
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::Transport(_) | RegistryError::Timeout(_))
    }

    /// Returns true if this error reports a missing node.
    pub fn is_no_node(&self) -> bool {
        matches!(self, RegistryError::NoNode { .. })
    }

    /// Returns true if this error reports an already existing node.
    pub fn is_node_exists(&self) -> bool {
        matches!(self, RegistryError::NodeExists { .. })
    }
}

/// Shorthand result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transport = RegistryError::Transport("connection loss".into());
        assert!(transport.is_retryable());
        assert!(!transport.is_no_node());

        let timeout = RegistryError::Timeout("no session".into());
        assert!(timeout.is_retryable());

        let expired = RegistryError::SessionExpired("gone".into());
        assert!(!expired.is_retryable());

        let missing = RegistryError::NoNode {
            path: "/servers".into(),
        };
        assert!(missing.is_no_node());
        assert!(!missing.is_node_exists());
        assert!(!missing.is_retryable());

        let exists = RegistryError::NodeExists {
            path: "/servers".into(),
        };
        assert!(exists.is_node_exists());
        assert!(!exists.is_retryable());

        assert!(!RegistryError::InvalidPath("servers".into()).is_retryable());
        assert!(!RegistryError::Config("bad".into()).is_retryable());
        assert!(!RegistryError::Protocol("marshalling".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = RegistryError::NoNode {
            path: "/servers/server_0000000001".into(),
        };
        assert_eq!(format!("{err}"), "no node at '/servers/server_0000000001'");
    }
}
