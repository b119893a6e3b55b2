//! Error types for the session crate.
//!
//! - `CredentialError`: failures of the local credential store
//! - `SessionError`: failures of session operations and authenticated requests

use std::fmt;

/// Errors from credential store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Reading or writing the backing storage failed.
    StorageFailed { reason: String },
    /// The stored data could not be decoded.
    InvalidFormat { reason: String },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageFailed { reason } => {
                write!(f, "credential storage failed: {reason}")
            }
            Self::InvalidFormat { reason } => {
                write!(f, "invalid credential format: {reason}")
            }
        }
    }
}

impl std::error::Error for CredentialError {}

/// Errors from session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The HTTP client could not be constructed.
    ClientSetup { reason: String },
    /// The request could not be built (bad URL, unserializable body).
    InvalidRequest { reason: String },
    /// The stored token cannot be sent as a header value.
    InvalidToken,
    /// The server could not be reached or the request timed out.
    Transport { reason: String },
    /// The response body did not have the expected shape.
    MalformedResponse { reason: String },
    /// The credential store failed.
    Credential(CredentialError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientSetup { reason } => write!(f, "failed to create HTTP client: {reason}"),
            Self::InvalidRequest { reason } => write!(f, "invalid request: {reason}"),
            Self::InvalidToken => write!(f, "stored token is not a valid header value"),
            Self::Transport { reason } => write!(f, "request failed: {reason}"),
            Self::MalformedResponse { reason } => write!(f, "malformed response: {reason}"),
            Self::Credential(e) => write!(f, "credential store error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<CredentialError> for SessionError {
    fn from(e: CredentialError) -> Self {
        Self::Credential(e)
    }
}
