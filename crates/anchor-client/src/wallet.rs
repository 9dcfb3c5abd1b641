//! Key-discovery provider: "which key is active" and "sign this blob",
//! independent of the wallet implementation behind it.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::config::Network;
use crate::storage::{KeyValueStore, SELECTED_WALLET_ID_KEY};
use crate::AnchorError;

/// A concrete wallet implementation (browser extension bridge, hardware
/// device, offline signer, ...).
#[async_trait]
pub trait WalletBackend: Send + Sync {
    fn id(&self) -> &str;

    /// Public key of the unlocked account. Backends that are locked or gone
    /// return [`AnchorError::NoWalletAvailable`].
    async fn public_key(&self) -> Result<String, AnchorError>;

    /// Sign an opaque envelope for the given network passphrase and return the
    /// signed encoding. A user decline is [`AnchorError::SigningRejected`].
    async fn sign_envelope(
        &self,
        envelope: &str,
        network_passphrase: &str,
    ) -> Result<String, AnchorError>;

    async fn disconnect(&self) -> Result<(), AnchorError> {
        Ok(())
    }
}

pub struct KeyDiscoveryProvider {
    backends: BTreeMap<String, Arc<dyn WalletBackend>>,
    default_backend: String,
    store: Arc<dyn KeyValueStore>,
    selected: RwLock<Option<String>>,
}

impl std::fmt::Debug for KeyDiscoveryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDiscoveryProvider")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("default_backend", &self.default_backend)
            .field("selected", &self.selected_backend())
            .finish()
    }
}

impl KeyDiscoveryProvider {
    /// Build the provider and restore a persisted backend selection.
    ///
    /// A persisted id that no longer matches a registered backend resolves to
    /// `default_backend`; no persisted id leaves the provider unselected.
    pub fn init(
        store: Arc<dyn KeyValueStore>,
        backends: Vec<Arc<dyn WalletBackend>>,
        default_backend: &str,
    ) -> Result<Self, AnchorError> {
        let backends: BTreeMap<String, Arc<dyn WalletBackend>> = backends
            .into_iter()
            .map(|backend| (backend.id().to_string(), backend))
            .collect();
        if !backends.contains_key(default_backend) {
            return Err(AnchorError::InvalidConfig(format!(
                "default wallet backend `{default_backend}` is not registered"
            )));
        }

        let selected = store.get(SELECTED_WALLET_ID_KEY)?.map(|stored| {
            if backends.contains_key(stored.as_str()) {
                stored
            } else {
                tracing::warn!(
                    stored = %stored,
                    fallback = %default_backend,
                    "persisted wallet backend is unknown, using default"
                );
                default_backend.to_string()
            }
        });

        Ok(Self {
            backends,
            default_backend: default_backend.to_string(),
            store,
            selected: RwLock::new(selected),
        })
    }

    #[must_use]
    pub fn backend_ids(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn selected_backend(&self) -> Option<String> {
        self.selected.read().ok().and_then(|guard| guard.clone())
    }

    /// Select and persist a backend. Unknown ids fall back to the default
    /// backend; the effective id is returned.
    pub fn select_backend(&self, id: &str) -> Result<String, AnchorError> {
        let effective = if self.backends.contains_key(id) {
            id.to_string()
        } else {
            tracing::warn!(
                requested = %id,
                fallback = %self.default_backend,
                "unknown wallet backend, using default"
            );
            self.default_backend.clone()
        };

        self.store.set(SELECTED_WALLET_ID_KEY, &effective)?;
        let mut guard = self
            .selected
            .write()
            .map_err(|_| AnchorError::Storage("mutex poisoned: wallet selection".to_string()))?;
        *guard = Some(effective.clone());
        tracing::info!(backend = %effective, "wallet backend selected");
        Ok(effective)
    }

    pub async fn get_address(&self) -> Result<String, AnchorError> {
        let backend = self.active_backend()?;
        let key = backend.public_key().await?;
        let key = key.trim();
        if key.is_empty() {
            return Err(AnchorError::NoWalletAvailable);
        }
        Ok(key.to_string())
    }

    pub async fn sign(&self, payload: &str, network: Network) -> Result<String, AnchorError> {
        let backend = self.active_backend()?;
        let signed = backend
            .sign_envelope(payload, network.passphrase())
            .await?;
        if signed.trim().is_empty() {
            return Err(AnchorError::SigningRejected(
                "wallet returned an empty signature".to_string(),
            ));
        }
        Ok(signed)
    }

    /// Clear the persisted selection. Later calls fail with
    /// `NoWalletAvailable` until [`Self::select_backend`] runs again.
    pub async fn forget(&self) -> Result<(), AnchorError> {
        let previous = self.take_selection()?;
        self.store.remove(SELECTED_WALLET_ID_KEY)?;
        if let Some(backend) = previous.and_then(|id| self.backends.get(&id).cloned()) {
            if let Err(error) = backend.disconnect().await {
                tracing::warn!(backend = %backend.id(), error = %error, "wallet disconnect failed");
            }
        }
        Ok(())
    }

    /// Release the active backend without touching the persisted choice, so
    /// the next `init` restores it.
    pub async fn dispose(&self) -> Result<(), AnchorError> {
        if let Some(backend) = self
            .take_selection()?
            .and_then(|id| self.backends.get(&id).cloned())
        {
            backend.disconnect().await?;
        }
        Ok(())
    }

    fn take_selection(&self) -> Result<Option<String>, AnchorError> {
        let mut guard = self
            .selected
            .write()
            .map_err(|_| AnchorError::Storage("mutex poisoned: wallet selection".to_string()))?;
        Ok(guard.take())
    }

    fn active_backend(&self) -> Result<Arc<dyn WalletBackend>, AnchorError> {
        let selected = self
            .selected_backend()
            .ok_or(AnchorError::NoWalletAvailable)?;
        self.backends
            .get(&selected)
            .cloned()
            .ok_or(AnchorError::NoWalletAvailable)
    }
}
