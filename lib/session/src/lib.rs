//! Session management for the lily client.
//!
//! This crate provides:
//! - The credential store interface (`CredentialStore`) and two stores
//! - Session state (`SessionState`) published to observers
//! - The session manager (`SessionManager`): restore, sign-in, sign-out and
//!   the authenticated-request primitive every other component calls through
//!
//! # Example
//!
//! ```no_run
//! use lily_session::{MemoryCredentialStore, SessionConfig, SessionManager};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), rootcause::Report<lily_session::SessionError>> {
//! let config = SessionConfig::new("https://api.example.com".to_string());
//! let session = SessionManager::new(config, Arc::new(MemoryCredentialStore::new()))?;
//!
//! session.restore_session().await;
//! if !session.is_logged_in() {
//!     session.sign_in("carol@example.com").await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credential;
pub mod error;
pub mod manager;
pub mod state;
pub mod token;

// Re-export main types at crate root
pub use config::SessionConfig;
pub use credential::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{CredentialError, SessionError};
pub use manager::{RequestOptions, SessionManager};
pub use state::{RestoreOutcome, SessionPhase, SessionState, SignInOutcome};
pub use token::SessionToken;
