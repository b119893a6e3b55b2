//! Error types for the conversation crate.

use lily_core::IdentityId;
use lily_session::SessionError;
use std::fmt;

/// Errors from conversation discovery and snapshot fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvoError {
    /// The authenticated request itself failed.
    Request(SessionError),
    /// The server has no conversation for this identity yet.
    NoConversation { identity: IdentityId },
    /// The server answered with a non-success status.
    Status { status: u16 },
    /// The response body did not have the expected shape.
    MalformedResponse { reason: String },
}

impl fmt::Display for ConvoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(e) => write!(f, "{e}"),
            Self::NoConversation { identity } => {
                write!(f, "no conversation found for {identity}")
            }
            Self::Status { status } => write!(f, "server returned status {status}"),
            Self::MalformedResponse { reason } => {
                write!(f, "malformed conversation response: {reason}")
            }
        }
    }
}

impl std::error::Error for ConvoError {}

impl From<SessionError> for ConvoError {
    fn from(e: SessionError) -> Self {
        Self::Request(e)
    }
}
