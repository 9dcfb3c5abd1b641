#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anchor_client::{
    AnchorClientConfig, AnchorError, AnchorHttp, AuthEngine, BrowsingContext, HeadlessBrowser,
    InteractiveEngine, KeyDiscoveryProvider, KeyValueStore, MemoryStore, MessageBus,
    SessionCredential, SessionStore, WalletBackend,
};
use anyhow::Result;
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use url::Url;

pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";
pub const PUBLIC_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";
pub const APP_LOCATION: &str = "https://wallet.example/app?lang=es";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorMode {
    /// `WEB_AUTH_ENDPOINT` points at `/sep10/auth`.
    Custom,
    /// Descriptor present without the auth field.
    MissingAuthField,
    /// Descriptor request answers 404.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiationMode {
    Accept,
    RejectAmount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub route: String,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

#[derive(Clone)]
struct StubState {
    base_url: String,
    descriptor: DescriptorMode,
    initiation: InitiationMode,
    challenge_unavailable: bool,
    challenge_passphrase: &'static str,
    token_rejected: bool,
    statuses: Arc<Mutex<VecDeque<&'static str>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

pub struct AnchorStub {
    pub base_url: String,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl AnchorStub {
    pub fn origin(&self) -> String {
        self.base_url.clone()
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn calls_to(&self, route: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.route == route)
            .cloned()
            .collect()
    }

    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub struct StubOptions {
    pub descriptor: DescriptorMode,
    pub initiation: InitiationMode,
    pub challenge_unavailable: bool,
    /// Passphrase the challenge response claims it was issued for.
    pub challenge_passphrase: &'static str,
    /// Answer the signed-challenge submission with 401.
    pub token_rejected: bool,
    pub statuses: Vec<&'static str>,
}

impl Default for StubOptions {
    fn default() -> Self {
        Self {
            descriptor: DescriptorMode::MissingAuthField,
            initiation: InitiationMode::Accept,
            challenge_unavailable: false,
            challenge_passphrase: TESTNET_PASSPHRASE,
            token_rejected: false,
            statuses: vec!["completed"],
        }
    }
}

pub async fn spawn_anchor_stub(options: StubOptions) -> Result<AnchorStub> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let base_url = format!("http://{addr}");
    let calls = Arc::new(Mutex::new(Vec::new()));

    let state = StubState {
        base_url: base_url.clone(),
        descriptor: options.descriptor,
        initiation: options.initiation,
        challenge_unavailable: options.challenge_unavailable,
        challenge_passphrase: options.challenge_passphrase,
        token_rejected: options.token_rejected,
        statuses: Arc::new(Mutex::new(options.statuses.into_iter().collect())),
        calls: calls.clone(),
    };
    let app = Router::new()
        .route("/.well-known/stellar.toml", get(descriptor))
        .route("/auth", get(challenge).post(token))
        .route("/sep10/auth", get(challenge).post(token))
        .route("/withdraw", axum::routing::post(initiate))
        .route("/deposit", axum::routing::post(initiate))
        .route("/transaction", get(transaction_status))
        .with_state(state);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });

    Ok(AnchorStub {
        base_url,
        calls,
        shutdown: Some(shutdown_tx),
    })
}

async fn record(
    state: &StubState,
    route: &str,
    query: HashMap<String, String>,
    body: Option<Value>,
    headers: &HeaderMap,
) {
    let bearer = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    state.calls.lock().await.push(RecordedCall {
        route: route.to_string(),
        query,
        body,
        bearer,
    });
}

async fn descriptor(State(state): State<StubState>, headers: HeaderMap) -> impl IntoResponse {
    record(&state, "descriptor", HashMap::new(), None, &headers).await;
    match state.descriptor {
        DescriptorMode::Custom => (
            StatusCode::OK,
            format!(
                "NETWORK_PASSPHRASE = \"{TESTNET_PASSPHRASE}\"\nWEB_AUTH_ENDPOINT = \"{}/sep10/auth\"\nTRANSFER_SERVER_SEP0024 = \"{}\"\n",
                state.base_url, state.base_url
            ),
        ),
        DescriptorMode::MissingAuthField => (
            StatusCode::OK,
            format!("NETWORK_PASSPHRASE = \"{TESTNET_PASSPHRASE}\"\n"),
        ),
        DescriptorMode::Unavailable => (StatusCode::NOT_FOUND, "not found".to_string()),
    }
}

async fn challenge(
    State(state): State<StubState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let account = query.get("account").cloned().unwrap_or_default();
    record(&state, "challenge", query, None, &headers).await;
    if state.challenge_unavailable {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "signing key rotation in progress"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "transaction": format!("challenge-for-{account}"),
            "network_passphrase": state.challenge_passphrase,
        })),
    )
}

async fn token(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let signed = body
        .get("transaction")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    record(&state, "token", HashMap::new(), Some(body), &headers).await;
    if state.token_rejected {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "challenge signature does not match account"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({ "token": format!("token:{signed}") })),
    )
}

async fn initiate(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    record(&state, "initiate", HashMap::new(), Some(body), &headers).await;
    match state.initiation {
        InitiationMode::RejectAmount => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid amount"})),
        ),
        InitiationMode::Accept => (
            StatusCode::OK,
            Json(json!({
                "type": "interactive_customer_info_needed",
                "url": format!("{}/interactive?token=abc", state.base_url),
                "id": "tx-1",
            })),
        ),
    }
}

async fn transaction_status(
    State(state): State<StubState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let id = query.get("id").cloned().unwrap_or_default();
    let authorized = headers.contains_key("authorization");
    record(&state, "status", query, None, &headers).await;
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing token"})),
        );
    }
    let status = {
        let mut statuses = state.statuses.lock().await;
        if statuses.len() > 1 {
            statuses.pop_front().unwrap_or("completed")
        } else {
            statuses.front().copied().unwrap_or("completed")
        }
    };
    (
        StatusCode::OK,
        Json(json!({
            "transaction": {
                "id": id,
                "status": status,
                "message": format!("status is {status}"),
            }
        })),
    )
}

/// Wallet whose reported key can change between calls.
pub struct ScriptedWallet {
    keys: Vec<&'static str>,
    address_calls: AtomicUsize,
    reject_signing: bool,
    pub sign_calls: AtomicUsize,
}

impl ScriptedWallet {
    pub fn fixed(key: &'static str) -> Arc<Self> {
        Self::with_keys(vec![key])
    }

    pub fn with_keys(keys: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            keys,
            address_calls: AtomicUsize::new(0),
            reject_signing: false,
            sign_calls: AtomicUsize::new(0),
        })
    }

    pub fn rejecting(key: &'static str) -> Arc<Self> {
        Arc::new(Self {
            keys: vec![key],
            address_calls: AtomicUsize::new(0),
            reject_signing: true,
            sign_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl WalletBackend for ScriptedWallet {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn public_key(&self) -> Result<String, AnchorError> {
        let call = self.address_calls.fetch_add(1, Ordering::SeqCst);
        let key = self
            .keys
            .get(call)
            .or_else(|| self.keys.last())
            .copied()
            .unwrap_or_default();
        Ok(key.to_string())
    }

    async fn sign_envelope(
        &self,
        envelope: &str,
        network_passphrase: &str,
    ) -> Result<String, AnchorError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_signing {
            return Err(AnchorError::SigningRejected("user declined".to_string()));
        }
        assert_eq!(network_passphrase, TESTNET_PASSPHRASE);
        Ok(format!("{envelope}:signed"))
    }
}

pub struct Client {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<KeyDiscoveryProvider>,
    pub sessions: SessionStore,
    pub config: AnchorClientConfig,
    pub browser: HeadlessBrowser,
    pub messages: MessageBus,
}

impl Client {
    pub fn new(stub: &AnchorStub, wallet: Arc<ScriptedWallet>) -> Result<Self> {
        let store = Arc::new(MemoryStore::default());
        let shared: Arc<dyn KeyValueStore> = store.clone();
        let backends = vec![wallet as Arc<dyn WalletBackend>];
        let provider = Arc::new(KeyDiscoveryProvider::init(
            shared.clone(),
            backends,
            "scripted",
        )?);
        provider.select_backend("scripted")?;

        let mut config = AnchorClientConfig::new(&stub.base_url)?;
        config.poll_interval = Duration::from_millis(10);
        config.request_timeout = Duration::from_secs(2);

        Ok(Self {
            store,
            provider,
            sessions: SessionStore::new(shared),
            config,
            browser: HeadlessBrowser::new(Url::parse(APP_LOCATION)?),
            messages: MessageBus::new(),
        })
    }

    pub fn http(&self) -> AnchorHttp {
        AnchorHttp::new(self.config.request_timeout)
    }

    pub fn auth_engine(&self) -> AuthEngine {
        AuthEngine::new(
            self.http(),
            self.config.clone(),
            self.provider.clone(),
            self.sessions.clone(),
        )
    }

    pub fn interactive_engine(&self) -> InteractiveEngine {
        InteractiveEngine::new(
            self.http(),
            self.config.clone(),
            Arc::new(self.browser.clone()) as Arc<dyn BrowsingContext>,
            self.messages.clone(),
        )
    }

    pub fn credential(&self, account_key: &str) -> SessionCredential {
        SessionCredential {
            bearer_token: "bearer-test".to_string(),
            account_key: account_key.to_string(),
        }
    }
}
