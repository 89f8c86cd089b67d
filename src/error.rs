/*!
 * Top-level error type and process exit codes
 */

use crate::catalog::FetchError;
use crate::client::{ClientError, ErrorCategory};
use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
/// A failure that may clear up on a later run (network, timeouts)
pub const EXIT_PARTIAL: i32 = 1;
/// A failure that needs a configuration change
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum GatewayError {
    /// Invalid settings or command line
    Config(String),

    /// A control-plane lookup made before any client was involved
    Catalog { what: String, source: FetchError },

    /// A remote client operation failed
    Client(ClientError),

    /// I/O error (settings file, output)
    Io(io::Error),
}

impl GatewayError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            GatewayError::Config(_) => EXIT_FATAL,
            GatewayError::Catalog { source, .. } if source.is_not_found() => EXIT_FATAL,
            GatewayError::Catalog { .. } => EXIT_PARTIAL,
            GatewayError::Client(err) if err.is_fatal() => EXIT_FATAL,
            GatewayError::Client(_) => EXIT_PARTIAL,
            GatewayError::Io(_) => EXIT_PARTIAL,
        }
    }

    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        self.exit_code() == EXIT_FATAL
    }

    /// Error category, where one applies
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            GatewayError::Client(err) => Some(err.category()),
            GatewayError::Catalog { .. } => Some(ErrorCategory::ControlPlane),
            GatewayError::Config(_) => Some(ErrorCategory::Configuration),
            GatewayError::Io(_) => None,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Config(msg) => write!(f, "Configuration error: {}", msg),
            GatewayError::Catalog { what, source } => {
                write!(f, "Could not get {}: {}", what, source)
            }
            GatewayError::Client(err) => write!(f, "{}", err),
            GatewayError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Catalog { source, .. } => Some(source),
            GatewayError::Client(err) => Some(err),
            GatewayError::Io(err) => Some(err),
            GatewayError::Config(_) => None,
        }
    }
}

impl From<ClientError> for GatewayError {
    fn from(err: ClientError) -> Self {
        GatewayError::Client(err)
    }
}

impl From<io::Error> for GatewayError {
    fn from(err: io::Error) -> Self {
        GatewayError::Io(err)
    }
}
