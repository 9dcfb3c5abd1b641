use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::{ACCOUNT_KEY_KEY, BEARER_TOKEN_KEY, KeyValueStore};
use crate::wallet::KeyDiscoveryProvider;
use crate::AnchorError;

/// Bearer token paired with the account key that earned it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    pub bearer_token: String,
    pub account_key: String,
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("bearer_token", &"<redacted>")
            .field("account_key", &self.account_key)
            .finish()
    }
}

impl SessionCredential {
    /// A credential only holds while the wallet still reports its key.
    #[must_use]
    pub fn is_valid_for(&self, active_key: &str) -> bool {
        self.account_key == active_key.trim()
    }
}

/// Persists the credential and account key in the shared key/value store.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<Option<SessionCredential>, AnchorError> {
        let token = self.store.get(BEARER_TOKEN_KEY)?;
        let account = self.store.get(ACCOUNT_KEY_KEY)?;
        Ok(match (token, account) {
            (Some(bearer_token), Some(account_key))
                if !bearer_token.trim().is_empty() && !account_key.trim().is_empty() =>
            {
                Some(SessionCredential {
                    bearer_token,
                    account_key,
                })
            }
            _ => None,
        })
    }

    pub fn persist(&self, credential: &SessionCredential) -> Result<(), AnchorError> {
        self.store.set(BEARER_TOKEN_KEY, &credential.bearer_token)?;
        self.store.set(ACCOUNT_KEY_KEY, &credential.account_key)
    }

    pub fn clear(&self) -> Result<(), AnchorError> {
        self.store.remove(BEARER_TOKEN_KEY)?;
        self.store.remove(ACCOUNT_KEY_KEY)
    }

    /// Load the stored credential and keep it only if the active wallet still
    /// reports the same account key. Invalid credentials are cleared.
    pub async fn restore(
        &self,
        provider: &KeyDiscoveryProvider,
    ) -> Result<Option<SessionCredential>, AnchorError> {
        let Some(credential) = self.load()? else {
            return Ok(None);
        };

        match provider.get_address().await {
            Ok(active) if credential.is_valid_for(&active) => {
                tracing::info!(account = %credential.account_key, "session restored");
                Ok(Some(credential))
            }
            Ok(active) => {
                tracing::warn!(
                    stored = %credential.account_key,
                    active = %active,
                    "wallet key changed, discarding session"
                );
                self.clear()?;
                Ok(None)
            }
            Err(AnchorError::NoWalletAvailable) => {
                tracing::info!("no wallet available, discarding session");
                self.clear()?;
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }
}
