//! Observable session state and operation outcomes.

use serde::Serialize;
use std::fmt;

/// Login state published by the session manager.
///
/// `is_logged_in` is true only while the stored token is believed valid by
/// the server: it is set after a successful probe or sign-in and revoked as
/// soon as any authenticated request comes back 401.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    /// Whether the server currently accepts our token.
    pub is_logged_in: bool,
    /// True from process start until session restoration settles.
    pub is_loading: bool,
    /// Whether a token was stored the last time we touched the store.
    pub has_token: bool,
    /// Human-readable description of the last failed operation.
    pub last_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            is_logged_in: false,
            is_loading: true,
            has_token: false,
            last_error: None,
        }
    }
}

impl SessionState {
    /// Returns the coarse phase used to gate what the client shows.
    ///
    /// Nothing is routed while restoring; afterwards the login flag alone
    /// decides.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        if self.is_loading {
            SessionPhase::Restoring
        } else if self.is_logged_in {
            SessionPhase::SignedIn
        } else {
            SessionPhase::SignedOut
        }
    }
}

/// Coarse session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Startup restoration is still in flight.
    Restoring,
    /// No valid session; the user must sign in.
    SignedOut,
    /// The server accepts our token.
    SignedIn,
}

/// What `restore_session` found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The stored token was accepted by the server.
    Restored,
    /// No token was stored.
    NoToken,
    /// The server answered the probe with a non-success status.
    Rejected { status: u16 },
    /// The probe could not be completed.
    Failed { reason: String },
}

impl RestoreOutcome {
    /// Returns true if the session was restored.
    #[must_use]
    pub fn is_restored(&self) -> bool {
        matches!(self, Self::Restored)
    }
}

impl fmt::Display for RestoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restored => write!(f, "session restored"),
            Self::NoToken => write!(f, "no stored session"),
            Self::Rejected { status } => write!(f, "stored session rejected ({status})"),
            Self::Failed { reason } => write!(f, "session restore failed: {reason}"),
        }
    }
}

/// What `sign_in` achieved.
///
/// Sign-in never returns an error to its caller; this value is how a caller
/// tells a failed login apart from a slow one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    /// A token was issued, stored, and the session is live.
    SignedIn,
    /// The server refused the login.
    Rejected { status: u16 },
    /// The server answered 2xx but without a usable `session_token`.
    MissingToken,
    /// Transport, decoding or storage failure.
    Failed { reason: String },
}

impl SignInOutcome {
    /// Returns true if the user is now signed in.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        matches!(self, Self::SignedIn)
    }
}

impl fmt::Display for SignInOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignedIn => write!(f, "signed in"),
            Self::Rejected { status } => write!(f, "sign in rejected ({status})"),
            Self::MissingToken => write!(f, "sign in response carried no session token"),
            Self::Failed { reason } => write!(f, "sign in failed: {reason}"),
        }
    }
}
