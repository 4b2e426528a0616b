//! The account directory and its gRPC face.
//!
//! - [`directory`] - in-memory token to quota lookup.
//! - [`handler`] - `quotacache.Accounts` service implementation.
//! - [`lookup`] - how the cache service reaches the directory (remotely).

pub mod directory;
pub mod handler;
pub mod lookup;
