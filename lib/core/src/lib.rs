//! Core types and utilities for the lily client.
//!
//! This crate provides the error alias, the strongly-typed identifiers for
//! server-owned records, and the scoped task and polling primitives the
//! session and conversation crates build on.

pub mod error;
pub mod id;
pub mod poll;
pub mod task;

pub use error::Result;
pub use id::{AlertId, ConversationId, DocumentId, IdentityId};
pub use poll::Poller;
pub use task::ScopedTask;
