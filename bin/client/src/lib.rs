//! Headless lily client.
//!
//! Restores or establishes a session, follows the active conversation of the
//! configured identity and logs its documents and alerts as they change.

pub mod app;
pub mod config;

pub use app::{Client, run};
pub use config::ClientConfig;
