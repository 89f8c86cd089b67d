//! Error types for the remote clients
//!
//! Every failure a client can hit while connecting to or listing a partner:
//! control-plane fetches, configuration, transport, authentication and
//! listing errors.

use crate::catalog::{Credential, FetchError};
use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Broad classification of a [`ClientError`], for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ControlPlane,
    Configuration,
    Transport,
    Authentication,
    Listing,
    Usage,
}

/// Errors returned by remote clients
#[derive(Error, Debug)]
pub enum ClientError {
    /// No client exists for this protocol name
    #[error("unknown protocol '{0}'")]
    UnknownProtocol(String),

    /// A control-plane fetch failed
    #[error("could not get {what}: {source}")]
    Catalog {
        /// What was being fetched ("partner foo credentials", ...)
        what: String,
        #[source]
        source: FetchError,
    },

    /// A credential fetch failed partway; `fetched` must not be used
    #[error("could not get {what}: {source}")]
    PartialCredentials {
        what: String,
        fetched: Vec<Credential>,
        #[source]
        source: FetchError,
    },

    /// Protocol-specific configuration is malformed
    #[error("invalid {protocol} configuration: {message}")]
    Config { protocol: String, message: String },

    /// TLS configuration could not be built
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Dial or handshake failure
    #[error("failed to connect to the {protocol} partner at {address}: {message}")]
    Connection {
        protocol: String,
        address: String,
        message: String,
    },

    /// The partner rejected our credentials
    #[error("{protocol} authentication failed: {message}")]
    Authentication { protocol: String, message: String },

    /// R66 peer presented another login than expected
    #[error("server authentication failed: wrong login '{received}' (expected '{expected}')")]
    WrongLogin { expected: String, received: String },

    /// R66 peer presented a password that does not match the stored hash
    #[error("server authentication failed: wrong password")]
    WrongPassword,

    /// SFTP partner has no usable host key, or the server sent none
    #[error("no valid hostkey found")]
    NoHostKey,

    /// SFTP server key is not one of the configured host keys
    #[error("ssh: host key mismatch: the SSH key does not match known keys")]
    HostKeyMismatch,

    /// R66 session options negotiated by the peer differ from ours
    #[error("client-server configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// The listing pattern is not a valid glob
    #[error("invalid file pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Reading the remote directory failed
    #[error("failed to list files in '{path}': {message}")]
    ListFailed { path: String, message: String },

    /// The peer reported a protocol-level error
    #[error("remote error: {0}")]
    Remote(String),

    /// Operation requires a successful connect first
    #[error("{protocol} client is not connected")]
    NotConnected { protocol: String },
}

impl ClientError {
    pub(crate) fn connection(
        protocol: &str,
        address: &str,
        err: impl std::fmt::Display,
    ) -> Self {
        ClientError::Connection {
            protocol: protocol.to_string(),
            address: address.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn auth(protocol: &str, err: impl std::fmt::Display) -> Self {
        ClientError::Authentication {
            protocol: protocol.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn config(protocol: &str, err: impl std::fmt::Display) -> Self {
        ClientError::Config {
            protocol: protocol.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn not_connected(protocol: &str) -> Self {
        ClientError::NotConnected {
            protocol: protocol.to_string(),
        }
    }

    /// Check if this error is an authentication or identity failure
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ClientError::Authentication { .. }
                | ClientError::WrongLogin { .. }
                | ClientError::WrongPassword
                | ClientError::NoHostKey
                | ClientError::HostKeyMismatch
        )
    }

    /// Check if this error came from a control-plane timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::Catalog { source, .. } | ClientError::PartialCredentials { source, .. } => {
                source.is_timeout()
            }
            _ => false,
        }
    }

    /// Check if retrying the same operation later cannot succeed
    ///
    /// Configuration and identity errors need an administrator; transport,
    /// listing and control-plane errors may clear up on their own.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Authentication | ErrorCategory::Usage
        ) || matches!(self, ClientError::InvalidPattern { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::Catalog { .. } | ClientError::PartialCredentials { .. } => {
                ErrorCategory::ControlPlane
            }
            ClientError::UnknownProtocol(_)
            | ClientError::Config { .. }
            | ClientError::Tls(_)
            | ClientError::ConfigMismatch(_) => ErrorCategory::Configuration,
            ClientError::Connection { .. } | ClientError::Remote(_) => ErrorCategory::Transport,
            ClientError::Authentication { .. }
            | ClientError::WrongLogin { .. }
            | ClientError::WrongPassword
            | ClientError::NoHostKey
            | ClientError::HostKeyMismatch => ErrorCategory::Authentication,
            ClientError::InvalidPattern { .. } | ClientError::ListFailed { .. } => {
                ErrorCategory::Listing
            }
            ClientError::NotConnected { .. } => ErrorCategory::Usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors() {
        assert!(ClientError::WrongPassword.is_auth_error());
        assert!(ClientError::HostKeyMismatch.is_auth_error());
        assert!(!ClientError::UnknownProtocol("gopher".into()).is_auth_error());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ClientError::WrongLogin {
            expected: "a".into(),
            received: "b".into()
        }
        .is_fatal());
        assert!(ClientError::InvalidPattern {
            pattern: "[".into(),
            message: "unclosed".into()
        }
        .is_fatal());
        assert!(!ClientError::ListFailed {
            path: "/in".into(),
            message: "reset".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::WrongLogin {
            expected: "gw".to_string(),
            received: "mallory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "server authentication failed: wrong login 'mallory' (expected 'gw')"
        );
        assert_eq!(err.category(), ErrorCategory::Authentication);
    }

    #[test]
    fn test_timeout_is_distinct() {
        let err = ClientError::Catalog {
            what: "partner p".to_string(),
            source: FetchError::Timeout {
                resource: "/api/partners/p".to_string(),
            },
        };
        assert!(err.is_timeout());
        assert!(!err.is_auth_error());
        assert!(!err.is_fatal());
        assert_eq!(err.category(), ErrorCategory::ControlPlane);
    }
}
