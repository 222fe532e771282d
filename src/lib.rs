//! Client library for the choir association portal backend.
//!
//! Wraps the portal's JSON REST API with a bearer-token layer that recovers
//! from credential expiry transparently: a 401 triggers a single refresh call
//! and one retry of the original request. If the refresh itself fails, the
//! stored session is cleared and the host application is notified so it can
//! send the user back to the login page.
//!
//! The credential lives in an injectable [`TokenStore`]; implementations are
//! provided for in-memory use, a JSON session file, and the OS keychain.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError};
pub use auth::{Credential, FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};
pub use config::Config;
