#![cfg_attr(test, allow(clippy::expect_used, clippy::panic))]

mod common;

use std::sync::atomic::Ordering;

use anchor_client::storage::{ACCOUNT_KEY_KEY, BEARER_TOKEN_KEY};
use anchor_client::{AnchorError, AuthState, KeyValueStore};
use anyhow::Result;
use common::{
    Client, DescriptorMode, PUBLIC_PASSPHRASE, ScriptedWallet, StubOptions, spawn_anchor_stub,
};

const KEY_A: &str = "GAACCOUNTKEYA";
const KEY_B: &str = "GBACCOUNTKEYB";

#[tokio::test]
async fn missing_auth_field_falls_back_to_home_domain_auth() -> Result<()> {
    let stub = spawn_anchor_stub(StubOptions {
        descriptor: DescriptorMode::MissingAuthField,
        ..StubOptions::default()
    })
    .await?;
    let client = Client::new(&stub, ScriptedWallet::fixed(KEY_A))?;
    let auth = client.auth_engine();

    let credential = auth.authenticate().await?;

    assert_eq!(credential.account_key, KEY_A);
    assert_eq!(
        credential.bearer_token,
        format!("token:challenge-for-{KEY_A}:signed")
    );
    assert_eq!(auth.state(), AuthState::Authenticated);

    let routes: Vec<String> = stub.calls().await.into_iter().map(|call| call.route).collect();
    assert_eq!(routes, vec!["descriptor", "challenge", "token"]);
    let challenge = stub.calls_to("challenge").await;
    assert_eq!(
        challenge[0].query.get("account").map(String::as_str),
        Some(KEY_A)
    );

    assert_eq!(
        client.store.get(BEARER_TOKEN_KEY)?,
        Some(credential.bearer_token.clone())
    );
    assert_eq!(client.store.get(ACCOUNT_KEY_KEY)?, Some(KEY_A.to_string()));
    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_descriptor_also_falls_back() -> Result<()> {
    let stub = spawn_anchor_stub(StubOptions {
        descriptor: DescriptorMode::Unavailable,
        ..StubOptions::default()
    })
    .await?;
    let client = Client::new(&stub, ScriptedWallet::fixed(KEY_A))?;

    client.auth_engine().authenticate().await?;

    assert_eq!(stub.calls_to("challenge").await.len(), 1);
    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn credential_key_is_the_challenge_key_even_if_wallet_switches() -> Result<()> {
    let stub = spawn_anchor_stub(StubOptions {
        descriptor: DescriptorMode::Custom,
        ..StubOptions::default()
    })
    .await?;
    let client = Client::new(&stub, ScriptedWallet::with_keys(vec![KEY_A, KEY_B]))?;

    let credential = client.auth_engine().authenticate().await?;

    assert_eq!(credential.account_key, KEY_A);
    let challenge = stub.calls_to("challenge").await;
    assert_eq!(challenge.len(), 1);
    assert_eq!(
        challenge[0].query.get("account").map(String::as_str),
        Some(KEY_A)
    );
    // The wallet now reports another key, so restoring must drop the session.
    assert_eq!(client.sessions.restore(&client.provider).await?, None);
    assert_eq!(client.store.get(BEARER_TOKEN_KEY)?, None);
    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn challenge_failure_reports_anchor_message() -> Result<()> {
    let stub = spawn_anchor_stub(StubOptions {
        challenge_unavailable: true,
        ..StubOptions::default()
    })
    .await?;
    let client = Client::new(&stub, ScriptedWallet::fixed(KEY_A))?;
    let auth = client.auth_engine();

    let error = auth.authenticate().await.expect_err("challenge unavailable");

    assert_eq!(
        error,
        AnchorError::ChallengeUnavailable {
            status: 503,
            message: "signing key rotation in progress".to_string(),
        }
    );
    assert_eq!(auth.state(), AuthState::Failed);
    assert!(stub.calls_to("token").await.is_empty());
    assert_eq!(client.store.get(BEARER_TOKEN_KEY)?, None);
    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn rejected_submission_persists_nothing() -> Result<()> {
    let stub = spawn_anchor_stub(StubOptions {
        token_rejected: true,
        ..StubOptions::default()
    })
    .await?;
    let wallet = ScriptedWallet::fixed(KEY_A);
    let client = Client::new(&stub, wallet.clone())?;
    let auth = client.auth_engine();

    let error = auth.authenticate().await.expect_err("token rejected");

    assert_eq!(
        error,
        AnchorError::CredentialIssuanceFailed {
            status: 401,
            message: "challenge signature does not match account".to_string(),
        }
    );
    assert_eq!(auth.state(), AuthState::Failed);
    assert_eq!(wallet.sign_calls.load(Ordering::SeqCst), 1);
    let submitted = stub.calls_to("token").await;
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        submitted[0].body.as_ref().and_then(|body| body["transaction"].as_str()),
        Some(format!("challenge-for-{KEY_A}:signed").as_str())
    );
    assert_eq!(client.store.get(BEARER_TOKEN_KEY)?, None);
    assert_eq!(client.store.get(ACCOUNT_KEY_KEY)?, None);
    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn challenge_for_another_network_is_not_signed() -> Result<()> {
    let stub = spawn_anchor_stub(StubOptions {
        challenge_passphrase: PUBLIC_PASSPHRASE,
        ..StubOptions::default()
    })
    .await?;
    let wallet = ScriptedWallet::fixed(KEY_A);
    let client = Client::new(&stub, wallet.clone())?;
    let auth = client.auth_engine();

    let error = auth.authenticate().await.expect_err("wrong network");

    match error {
        AnchorError::ChallengeUnavailable { status, message } => {
            assert_eq!(status, 200);
            assert!(message.contains(PUBLIC_PASSPHRASE), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(auth.state(), AuthState::Failed);
    assert_eq!(wallet.sign_calls.load(Ordering::SeqCst), 0);
    assert!(stub.calls_to("token").await.is_empty());
    assert_eq!(client.store.get(BEARER_TOKEN_KEY)?, None);
    assert_eq!(client.store.get(ACCOUNT_KEY_KEY)?, None);
    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn declined_signature_never_submits() -> Result<()> {
    let stub = spawn_anchor_stub(StubOptions::default()).await?;
    let wallet = ScriptedWallet::rejecting(KEY_A);
    let client = Client::new(&stub, wallet.clone())?;
    let auth = client.auth_engine();

    let error = auth.authenticate().await.expect_err("declined");

    assert!(matches!(error, AnchorError::SigningRejected(_)));
    assert_eq!(wallet.sign_calls.load(Ordering::SeqCst), 1);
    assert!(stub.calls_to("token").await.is_empty());
    assert_eq!(auth.state(), AuthState::Failed);
    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn state_changes_are_observable() -> Result<()> {
    let stub = spawn_anchor_stub(StubOptions::default()).await?;
    let client = Client::new(&stub, ScriptedWallet::fixed(KEY_A))?;
    let auth = client.auth_engine();
    let mut states = auth.subscribe();
    assert_eq!(*states.borrow_and_update(), AuthState::Idle);

    auth.authenticate().await?;

    assert!(states.has_changed()?);
    assert_eq!(*states.borrow_and_update(), AuthState::Authenticated);
    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn forgotten_wallet_cannot_authenticate() -> Result<()> {
    let stub = spawn_anchor_stub(StubOptions::default()).await?;
    let client = Client::new(&stub, ScriptedWallet::fixed(KEY_A))?;
    client.provider.forget().await?;

    let error = client
        .auth_engine()
        .authenticate()
        .await
        .expect_err("no wallet");

    assert_eq!(error, AnchorError::NoWalletAvailable);
    assert!(stub.calls_to("challenge").await.is_empty());
    stub.stop().await;
    Ok(())
}
