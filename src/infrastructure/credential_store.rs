use crate::infrastructure::error::SyncError;
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};

const DEFAULT_SERVICE: &str = "schedsync.google";
const DEFAULT_ACCOUNT: &str = "default";

/// OAuth access token at rest, plus the metadata needed to decide whether
/// it is still usable without a network round trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl StoredToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at - chrono::Duration::seconds(leeway_seconds) > now
    }
}

pub trait CredentialStore: Send + Sync {
    fn save_token(&self, token: &StoredToken) -> Result<(), SyncError>;
    fn load_token(&self) -> Result<Option<StoredToken>, SyncError>;
    fn delete_token(&self) -> Result<(), SyncError>;
}

/// Stores the token in the platform keyring so it never lands in a config
/// file on disk.
pub struct KeyringCredentialStore {
    service: String,
    account: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_names(DEFAULT_SERVICE, DEFAULT_ACCOUNT)
    }

    pub fn with_names(service: &str, account: &str) -> Self {
        Self {
            service: service.to_string(),
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, SyncError> {
        Entry::new(&self.service, &self.account)
            .map_err(|error| SyncError::Credential(format!("keyring entry: {error}")))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_token(&self, token: &StoredToken) -> Result<(), SyncError> {
        let serialized = serde_json::to_string(token)
            .map_err(|error| SyncError::Credential(format!("serialize token: {error}")))?;
        self.entry()?
            .set_password(&serialized)
            .map_err(|error| SyncError::Credential(format!("store token: {error}")))
    }

    fn load_token(&self) -> Result<Option<StoredToken>, SyncError> {
        match self.entry()?.get_password() {
            Ok(serialized) => {
                let token = serde_json::from_str(&serialized)
                    .map_err(|error| SyncError::Credential(format!("parse token: {error}")))?;
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(SyncError::Credential(format!("read token: {error}"))),
        }
    }

    fn delete_token(&self) -> Result<(), SyncError> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(SyncError::Credential(format!("delete token: {error}"))),
        }
    }
}

/// Keyring-free store for tests.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    token: std::sync::Mutex<Option<StoredToken>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: StoredToken) -> Self {
        Self {
            token: std::sync::Mutex::new(Some(token)),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_token(&self, token: &StoredToken) -> Result<(), SyncError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| SyncError::Credential("credential store lock poisoned".to_string()))?;
        *guard = Some(token.clone());
        Ok(())
    }

    fn load_token(&self) -> Result<Option<StoredToken>, SyncError> {
        let guard = self
            .token
            .lock()
            .map_err(|_| SyncError::Credential("credential store lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn delete_token(&self) -> Result<(), SyncError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| SyncError::Credential("credential store lock poisoned".to_string()))?;
        *guard = None;
        Ok(())
    }
}
