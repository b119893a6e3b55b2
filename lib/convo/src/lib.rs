//! Conversation discovery and synchronization for the lily client.
//!
//! This crate provides:
//!
//! - **Locator** (`ConversationLocator`): finds the active conversation for a
//!   fixed identity while the session is logged in
//! - **Synchronizer** (`ConversationSync`): polls the bound conversation's
//!   documents and alerts into a snapshot
//! - **Model**: the snapshot types and the document/alert selection helpers
//!   the presentation layer reads
//!
//! Both pollers talk to the server only through
//! [`SessionManager::fetch_with_auth`](lily_session::SessionManager::fetch_with_auth),
//! so a rejected token anywhere logs the whole client out.

pub mod config;
pub mod error;
pub mod locator;
pub mod model;
pub mod sync;

pub use config::SyncConfig;
pub use error::ConvoError;
pub use locator::{ConversationLocator, LocatorState};
pub use model::{Alert, ConversationSnapshot, Document, DocumentSelection};
pub use sync::{ConversationSync, SyncState};
