use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::SyncError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const EXPIRY_LEEWAY_SECONDS: i64 = 60;

/// Hands out a usable access token for a run, or a clear instruction when
/// there is none.
pub struct SessionProvider<S: CredentialStore> {
    store: Arc<S>,
    now_provider: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl<S: CredentialStore> SessionProvider<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(
        store: Arc<S>,
        now_provider: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            store,
            now_provider,
        }
    }

    pub fn access_token(&self) -> Result<String, SyncError> {
        let token = self.store.load_token()?.ok_or_else(|| {
            SyncError::Credential(
                "no stored token; run `schedsync auth set` first".to_string(),
            )
        })?;

        let now = (self.now_provider)();
        if !token.is_valid_at(now, EXPIRY_LEEWAY_SECONDS) {
            return Err(SyncError::Credential(format!(
                "stored token expired at {}; run `schedsync auth set` with a fresh token",
                token.expires_at.to_rfc3339()
            )));
        }
        Ok(token.access_token)
    }
}
