//! API client for the choir association portal backend.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! JSON requests against the portal's REST API, including the one-shot
//! refresh-and-retry handling for expired access tokens.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::{Credential, TokenStore};
use crate::config::Config;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Refresh endpoint, relative to the configured base URL.
/// The refresh token itself travels as an HTTP-only cookie attached by the
/// transport's cookie store, so the call carries no body.
const REFRESH_PATH: &str = "/api/auth/refresh";

/// Logout endpoint, relative to the configured base URL.
const LOGOUT_PATH: &str = "/api/auth/logout";

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
}

/// Callback invoked when a session cannot be refreshed. The host application
/// uses this to route the user back to the login page.
type AuthFailureHandler = Arc<dyn Fn() + Send + Sync>;

/// A pending outbound call plus its single-use retry marker.
///
/// The marker is what bounds the recovery protocol: a 401 on a fresh
/// envelope triggers one refresh and one resubmission, a 401 on a retried
/// envelope is final. Retrying consumes the envelope and produces a marked
/// one rather than mutating shared state.
#[derive(Debug, Clone)]
struct RequestEnvelope {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    retried: bool,
}

impl RequestEnvelope {
    fn new(method: Method, path: &str, body: Option<serde_json::Value>) -> Self {
        Self {
            method,
            path: path.to_string(),
            body,
            retried: false,
        }
    }

    fn into_retry(self) -> Self {
        Self {
            retried: true,
            ..self
        }
    }
}

/// API client for the portal backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
    on_auth_failure: AuthFailureHandler,
}

impl ApiClient {
    /// Create a new API client against the configured base URL.
    /// The base URL is fixed for the lifetime of the client.
    pub fn new(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            store,
            on_auth_failure: Arc::new(|| {}),
        })
    }

    /// Install the callback fired when the session cannot be refreshed.
    pub fn with_auth_failure_handler(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_auth_failure = Arc::new(handler);
        self
    }

    /// Install a credential obtained outside this client, e.g. from the
    /// social-login redirect flow handled by the host application.
    pub fn adopt_credential(&self, credential: Credential) {
        self.store.set(credential);
    }

    /// End the session: best-effort notify the backend, then drop the
    /// stored credential. The local state is cleared even if the server
    /// call fails.
    pub async fn logout(&self) {
        let url = format!("{}{}", self.base_url, LOGOUT_PATH);
        let mut request = self.client.post(&url);
        if let Some(credential) = self.store.get() {
            request = request.bearer_auth(&credential.access_token);
        }
        if let Err(err) = request.send().await {
            debug!(error = %err, "logout request failed, clearing session anyway");
        }
        self.store.clear();
    }

    // ===== Generic JSON surface =====

    /// GET `path` and decode the JSON response body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(Method::GET, path, None).await?;
        Self::decode(Self::check_response(response).await?).await
    }

    /// POST `body` to `path` and decode the JSON response body.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        let response = self.request(Method::POST, path, Some(body)).await?;
        Self::decode(Self::check_response(response).await?).await
    }

    /// PUT `body` to `path` and decode the JSON response body.
    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        let response = self.request(Method::PUT, path, Some(body)).await?;
        Self::decode(Self::check_response(response).await?).await
    }

    /// DELETE `path`, discarding any response body.
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let response = self.request(Method::DELETE, path, None).await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Issue a request and return the raw response.
    ///
    /// Non-401 responses come back as-is, whatever their status; the typed
    /// helpers above turn non-2xx into [`ApiError::Http`]. A 401 is handled
    /// by the one-shot refresh-and-retry protocol.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response, ApiError> {
        self.dispatch(RequestEnvelope::new(method, path, body)).await
    }

    async fn dispatch(&self, envelope: RequestEnvelope) -> Result<Response, ApiError> {
        let token = self.store.get().map(|c| c.access_token);
        let response = self.send(&envelope, token.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED || envelope.retried {
            return Ok(response);
        }

        // Mark the envelope before anything else; a 401 on the resubmission
        // must come back to the caller untouched.
        let envelope = envelope.into_retry();

        match self.refresh().await {
            Ok(credential) => {
                debug!(path = %envelope.path, "access token refreshed, retrying request");
                self.store.set(credential);
                // Re-read at send time: a concurrent refresh may have
                // written an even newer token, and both are valid.
                let token = self.store.get().map(|c| c.access_token);
                self.send(&envelope, token.as_deref()).await
            }
            Err(err) => {
                warn!(path = %envelope.path, error = %err, "token refresh failed, clearing session");
                self.store.clear();
                (self.on_auth_failure)();
                Err(ApiError::Auth(Box::new(err)))
            }
        }
    }

    async fn send(
        &self,
        envelope: &RequestEnvelope,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, envelope.path);
        let mut request = self.client.request(envelope.method.clone(), &url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(ref body) = envelope.body {
            request = request.json(body);
        }

        debug!(
            method = %envelope.method,
            path = %envelope.path,
            retried = envelope.retried,
            "sending request"
        );
        Ok(request.send().await?)
    }

    /// Exchange the refresh cookie for a new access token.
    async fn refresh(&self) -> Result<Credential, ApiError> {
        let url = format!("{}{}", self.base_url, REFRESH_PATH);
        debug!("requesting access token refresh");

        let response = self.client.post(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let text = response.text().await?;
        let parsed: RefreshResponse = serde_json::from_str(&text)?;
        Ok(Credential::new(parsed.access_token))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}
