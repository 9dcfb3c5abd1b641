//! Client for Stellar anchors: wallet-key challenge/response authentication
//! and anchor-hosted interactive deposits and withdrawals with status
//! tracking.

#![cfg_attr(test, allow(clippy::expect_used, clippy::panic))]

pub mod auth;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod flow;
pub mod http;
pub mod interactive;
pub mod session;
pub mod storage;
pub mod wallet;

pub use auth::{AuthChallenge, AuthEngine, AuthState};
pub use config::{AnchorClientConfig, ConfigLayer, Network};
pub use error::{AnchorError, ErrorKind};
pub use flow::{FlowController, MenuChoice, Screen};
pub use http::AnchorHttp;
pub use interactive::browser::{BrowsingContext, HeadlessBrowser, PopupWindow};
pub use interactive::messages::MessageBus;
pub use interactive::operation::{
    TransferKind, TransferOperation, WithdrawMethod, WithdrawMethodKind,
};
pub use interactive::poller::PollEvent;
pub use interactive::transaction::{TransactionRecord, TransactionStatus};
pub use interactive::{InteractiveEngine, PopupSession, TrackedTransfer};
pub use session::{SessionCredential, SessionStore};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use wallet::{KeyDiscoveryProvider, WalletBackend};
