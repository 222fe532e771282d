//! Authentication module for credential storage.
//!
//! This module provides:
//! - `Credential`: the current bearer token plus optional refresh token
//! - `TokenStore`: the storage seam the API client reads and updates
//! - `MemoryTokenStore`, `FileTokenStore`, `KeyringTokenStore`: store
//!   implementations for tests, session files, and the OS keychain
//!
//! The store owns the credential; the client never mutates storage directly.

pub mod credential;
pub mod store;

pub use credential::Credential;
pub use store::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};
