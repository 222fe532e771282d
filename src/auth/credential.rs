use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The current session credential: an opaque bearer access token, an
/// optional refresh token, and the time it was issued.
///
/// Created on login, replaced on every successful refresh, cleared on
/// logout or when a refresh fails for good.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            issued_at: Utc::now(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.issued_at).num_minutes()
    }

    /// Whether a persisted credential is too old to be worth reloading.
    /// Past the refresh-token lifetime the backend will reject it anyway,
    /// so stale sessions are discarded on load instead of round-tripping
    /// a doomed refresh.
    pub fn is_stale(&self, max_age_minutes: i64) -> bool {
        self.age_minutes() > max_age_minutes
    }
}
