use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::{debug, warn};

use super::Credential;

/// Session file name in the application cache directory
const SESSION_FILE: &str = "session.json";

/// Application name used for cache directory and keychain service paths
const SERVICE_NAME: &str = "chorister";

/// The storage seam between the API client and wherever the credential
/// actually lives.
///
/// The client only reads the current value and requests updates; it never
/// touches storage directly. Implementations are process-wide cells with
/// last-write-wins semantics - concurrent refresh successes may race, and
/// either winner is a validly-refreshed token. Persistence failures are
/// logged rather than surfaced: the in-memory view stays authoritative for
/// the rest of the process.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Option<Credential>;
    fn set(&self, credential: Credential);
    fn clear(&self);
}

// ============================================================================
// In-memory store
// ============================================================================

/// Credential cell with no persistence. The default for tests and for
/// hosts that manage persistence themselves.
#[derive(Default)]
pub struct MemoryTokenStore {
    inner: RwLock<Option<Credential>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<Credential> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set(&self, credential: Credential) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(credential);
    }

    fn clear(&self) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

// ============================================================================
// Session-file store
// ============================================================================

/// Persists the credential as a JSON session file so it survives restarts.
///
/// The file is read once at construction; sessions older than
/// `max_age_minutes` are discarded on load. After that the in-memory cache
/// is the source of truth and the file just trails it.
pub struct FileTokenStore {
    path: PathBuf,
    max_age_minutes: i64,
    cached: RwLock<Option<Credential>>,
}

impl FileTokenStore {
    pub fn new(path: PathBuf, max_age_minutes: i64) -> Self {
        let cached = Self::load(&path, max_age_minutes);
        Self {
            path,
            max_age_minutes,
            cached: RwLock::new(cached),
        }
    }

    /// Place the session file under the user cache directory.
    pub fn at_default_location(max_age_minutes: i64) -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .context("Could not find cache directory")?
            .join(SERVICE_NAME);
        Ok(Self::new(cache_dir.join(SESSION_FILE), max_age_minutes))
    }

    fn load(path: &PathBuf, max_age_minutes: i64) -> Option<Credential> {
        if !path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read session file");
                return None;
            }
        };
        let credential: Credential = match serde_json::from_str(&contents) {
            Ok(credential) => credential,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to parse session file");
                return None;
            }
        };
        if credential.is_stale(max_age_minutes) {
            debug!(path = %path.display(), "discarding stale session");
            return None;
        }
        Some(credential)
    }

    fn persist(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(credential)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<Credential> {
        let cached = self
            .cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        cached.filter(|c| !c.is_stale(self.max_age_minutes))
    }

    fn set(&self, credential: Credential) {
        if let Err(err) = self.persist(&credential) {
            warn!(path = %self.path.display(), error = %err, "failed to persist session");
        }
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(credential);
    }

    fn clear(&self) {
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = None;
        if self.path.exists() {
            if let Err(err) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %err, "failed to remove session file");
            }
        }
    }
}

// ============================================================================
// OS keychain store
// ============================================================================

/// Persists the serialized credential in the OS keychain, keyed by account.
pub struct KeyringTokenStore {
    account: String,
    cached: RwLock<Option<Credential>>,
}

impl KeyringTokenStore {
    pub fn new(account: impl Into<String>) -> Self {
        let account = account.into();
        let cached = Self::load(&account);
        Self {
            account,
            cached: RwLock::new(cached),
        }
    }

    fn entry(account: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, account).context("Failed to create keyring entry")
    }

    fn load(account: &str) -> Option<Credential> {
        let entry = Self::entry(account).ok()?;
        let serialized = entry.get_password().ok()?;
        match serde_json::from_str(&serialized) {
            Ok(credential) => Some(credential),
            Err(err) => {
                warn!(account, error = %err, "failed to parse keychain credential");
                None
            }
        }
    }

    fn persist(&self, credential: &Credential) -> Result<()> {
        let entry = Self::entry(&self.account)?;
        let serialized = serde_json::to_string(credential)?;
        entry
            .set_password(&serialized)
            .context("Failed to store credential in keychain")?;
        Ok(())
    }
}

impl TokenStore for KeyringTokenStore {
    fn get(&self) -> Option<Credential> {
        self.cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set(&self, credential: Credential) {
        if let Err(err) = self.persist(&credential) {
            warn!(account = %self.account, error = %err, "failed to persist credential to keychain");
        }
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(credential);
    }

    fn clear(&self) {
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = None;
        match Self::entry(&self.account) {
            Ok(entry) => {
                if let Err(err) = entry.delete_credential() {
                    debug!(account = %self.account, error = %err, "no keychain credential to delete");
                }
            }
            Err(err) => {
                warn!(account = %self.account, error = %err, "failed to open keyring entry");
            }
        }
    }
}
