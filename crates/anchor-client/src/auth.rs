//! Challenge/response authentication against the anchor's web-auth endpoint.
//!
//! One attempt walks `Idle → DiscoveringEndpoint → RequestingChallenge →
//! AwaitingSignature → SubmittingSignature → Authenticated`, each step
//! starting only after its predecessor resolved. Any failure lands in
//! `Failed`; nothing is retried and the caller restarts from `Idle`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use url::Url;
use uuid::Uuid;

use crate::config::{AnchorClientConfig, Network};
use crate::descriptor;
use crate::http::{AnchorHttp, HttpError};
use crate::session::{SessionCredential, SessionStore};
use crate::wallet::KeyDiscoveryProvider;
use crate::AnchorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    DiscoveringEndpoint,
    RequestingChallenge,
    AwaitingSignature,
    SubmittingSignature,
    Authenticated,
    Failed,
}

/// Server-issued signable envelope. Consumed by [`AuthChallenge::sign`], so a
/// challenge can never be signed or submitted twice.
#[derive(Debug, PartialEq, Eq)]
pub struct AuthChallenge {
    envelope: String,
    account_key: String,
}

impl AuthChallenge {
    #[must_use]
    pub fn envelope(&self) -> &str {
        &self.envelope
    }

    #[must_use]
    pub fn account_key(&self) -> &str {
        &self.account_key
    }

    pub async fn sign(
        self,
        provider: &KeyDiscoveryProvider,
        network: Network,
    ) -> Result<SignedChallenge, AnchorError> {
        let envelope = provider.sign(&self.envelope, network).await?;
        Ok(SignedChallenge {
            envelope,
            account_key: self.account_key,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct SignedChallenge {
    envelope: String,
    account_key: String,
}

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    transaction: String,
    #[serde(default)]
    network_passphrase: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChallengeSubmission<'a> {
    transaction: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

pub struct AuthEngine {
    http: AnchorHttp,
    config: AnchorClientConfig,
    provider: Arc<KeyDiscoveryProvider>,
    sessions: SessionStore,
    state: watch::Sender<AuthState>,
}

impl AuthEngine {
    #[must_use]
    pub fn new(
        http: AnchorHttp,
        config: AnchorClientConfig,
        provider: Arc<KeyDiscoveryProvider>,
        sessions: SessionStore,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Idle);
        Self {
            http,
            config,
            provider,
            sessions,
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Run one full attempt. Concurrent attempts are not serialized here;
    /// each fetches and signs its own challenge.
    pub async fn authenticate(&self) -> Result<SessionCredential, AnchorError> {
        let attempt = Uuid::now_v7();
        match self.run_attempt(attempt).await {
            Ok(credential) => {
                self.transition(attempt, AuthState::Authenticated);
                tracing::info!(%attempt, account = %credential.account_key, "anchor authentication succeeded");
                Ok(credential)
            }
            Err(error) => {
                self.transition(attempt, AuthState::Failed);
                tracing::warn!(%attempt, kind = error.kind().label(), error = %error, "anchor authentication failed");
                Err(error)
            }
        }
    }

    async fn run_attempt(&self, attempt: Uuid) -> Result<SessionCredential, AnchorError> {
        self.transition(attempt, AuthState::DiscoveringEndpoint);
        let endpoints = descriptor::discover(&self.http, &self.config).await;

        self.transition(attempt, AuthState::RequestingChallenge);
        let challenge = self.request_challenge(&endpoints.auth_endpoint).await?;

        self.transition(attempt, AuthState::AwaitingSignature);
        let signed = challenge.sign(&self.provider, self.config.network).await?;

        self.transition(attempt, AuthState::SubmittingSignature);
        let credential = self.submit(&endpoints.auth_endpoint, signed).await?;

        self.sessions.persist(&credential)?;
        Ok(credential)
    }

    async fn request_challenge(&self, auth_endpoint: &str) -> Result<AuthChallenge, AnchorError> {
        let account_key = self.provider.get_address().await?;
        let url = challenge_url(auth_endpoint, &account_key)?;

        let response: ChallengeResponse = self
            .http
            .get_json(url.as_str(), None)
            .await
            .map_err(|error: HttpError| AnchorError::ChallengeUnavailable {
                status: error.status(),
                message: error.message(),
            })?;

        if let Some(passphrase) = response.network_passphrase.as_deref() {
            if passphrase != self.config.network.passphrase() {
                return Err(AnchorError::ChallengeUnavailable {
                    status: 200,
                    message: format!("challenge issued for another network: {passphrase}"),
                });
            }
        }
        if response.transaction.trim().is_empty() {
            return Err(AnchorError::ChallengeUnavailable {
                status: 200,
                message: "challenge envelope is empty".to_string(),
            });
        }

        Ok(AuthChallenge {
            envelope: response.transaction,
            account_key,
        })
    }

    async fn submit(
        &self,
        auth_endpoint: &str,
        signed: SignedChallenge,
    ) -> Result<SessionCredential, AnchorError> {
        let response: TokenResponse = self
            .http
            .post_json(
                auth_endpoint,
                &ChallengeSubmission {
                    transaction: &signed.envelope,
                },
                None,
            )
            .await
            .map_err(|error| AnchorError::CredentialIssuanceFailed {
                status: error.status(),
                message: error.message(),
            })?;

        if response.token.trim().is_empty() {
            return Err(AnchorError::CredentialIssuanceFailed {
                status: 200,
                message: "anchor returned an empty token".to_string(),
            });
        }

        // Paired with the key the challenge was requested for, never a key
        // read after signing.
        Ok(SessionCredential {
            bearer_token: response.token,
            account_key: signed.account_key,
        })
    }

    fn transition(&self, attempt: Uuid, next: AuthState) {
        tracing::debug!(%attempt, state = ?next, "auth state");
        self.state.send_replace(next);
    }
}

pub fn challenge_url(auth_endpoint: &str, account_key: &str) -> Result<Url, AnchorError> {
    let mut url = Url::parse(auth_endpoint).map_err(|error| AnchorError::ChallengeUnavailable {
        status: 0,
        message: format!("invalid auth endpoint `{auth_endpoint}`: {error}"),
    })?;
    url.query_pairs_mut().append_pair("account", account_key);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::{AuthChallenge, challenge_url};

    #[test]
    fn challenge_url_appends_account_query() {
        let url = challenge_url("https://anchor.example.com/auth", "GABC").expect("url");
        assert_eq!(url.as_str(), "https://anchor.example.com/auth?account=GABC");
    }

    #[test]
    fn challenge_url_keeps_existing_query() {
        let url =
            challenge_url("https://anchor.example.com/auth?client=web", "GABC").expect("url");
        assert_eq!(
            url.as_str(),
            "https://anchor.example.com/auth?client=web&account=GABC"
        );
    }

    #[test]
    fn challenge_url_rejects_relative_endpoint() {
        assert!(challenge_url("/auth", "GABC").is_err());
    }

    #[test]
    fn challenge_exposes_envelope_and_key() {
        let challenge = AuthChallenge {
            envelope: "AAAA".to_string(),
            account_key: "GABC".to_string(),
        };
        assert_eq!(challenge.envelope(), "AAAA");
        assert_eq!(challenge.account_key(), "GABC");
    }
}
