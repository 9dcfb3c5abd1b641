use std::sync::Arc;

use anchor_client::{AnchorError, KeyValueStore, WalletBackend};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const MANUAL_BACKEND_ID: &str = "manual";
pub const MANUAL_ACCOUNT_KEY: &str = "manual_account_key";

/// Offline signer: the envelope is shown on the terminal, signed elsewhere
/// (hardware wallet, air-gapped laptop) and pasted back on stdin.
pub struct ManualSigner {
    store: Arc<dyn KeyValueStore>,
}

impl ManualSigner {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn set_account(&self, account_key: &str) -> Result<(), AnchorError> {
        let account_key = account_key.trim();
        if account_key.is_empty() {
            return Err(AnchorError::InvalidConfig(
                "account key must not be empty".to_string(),
            ));
        }
        self.store.set(MANUAL_ACCOUNT_KEY, account_key)
    }
}

#[async_trait]
impl WalletBackend for ManualSigner {
    fn id(&self) -> &str {
        MANUAL_BACKEND_ID
    }

    async fn public_key(&self) -> Result<String, AnchorError> {
        self.store
            .get(MANUAL_ACCOUNT_KEY)?
            .ok_or(AnchorError::NoWalletAvailable)
    }

    async fn sign_envelope(
        &self,
        envelope: &str,
        network_passphrase: &str,
    ) -> Result<String, AnchorError> {
        eprintln!("Sign this envelope for `{network_passphrase}`:");
        println!("{envelope}");
        eprintln!("Paste the signed envelope and press enter (empty line cancels):");

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|error| AnchorError::SigningRejected(format!("read stdin: {error}")))?;
        let signed = line.trim();
        if signed.is_empty() {
            return Err(AnchorError::SigningRejected(
                "no signed envelope entered".to_string(),
            ));
        }
        Ok(signed.to_string())
    }

    async fn disconnect(&self) -> Result<(), AnchorError> {
        self.store.remove(MANUAL_ACCOUNT_KEY)
    }
}
