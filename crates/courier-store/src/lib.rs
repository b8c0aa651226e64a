//! # courier-store
//!
//! Chat and message storage for the Courier client.
//!
//! The messaging core talks to storage only through the [`ChatStore`] trait.
//! [`MemoryStore`] is the in-process implementation; on top of the trait it
//! carries the privacy commands (archive, password-hidden chats, closed chats,
//! disappearing messages) and message search.

pub mod chats;
pub mod memory;
pub mod messages;
pub mod models;
pub mod store;

mod error;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use models::*;
pub use store::ChatStore;
