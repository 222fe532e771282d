//! REST API client module for the choir association portal.
//!
//! This module provides the `ApiClient` for communicating with the portal
//! backend. Requests carry a JWT bearer token read from the configured
//! `TokenStore`; an expired token is renewed once per request through the
//! `/api/auth/refresh` endpoint before the original call is resubmitted.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
