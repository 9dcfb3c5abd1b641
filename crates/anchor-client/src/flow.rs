//! Screen-level session lifecycle: connect, pick an operation, run it, track
//! it, and tear everything down on disconnect.

use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use crate::AnchorError;
use crate::auth::AuthEngine;
use crate::interactive::browser::strip_return_params;
use crate::interactive::operation::TransferKind;
use crate::interactive::{InteractiveEngine, TrackedTransfer};
use crate::session::{SessionCredential, SessionStore};
use crate::wallet::KeyDiscoveryProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Connect,
    SelectOperation,
    /// Placeholder for cross-chain bridging; no behaviour behind it yet.
    Bridge,
    Transfer(TransferKind),
    Tracking { transaction_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Withdraw,
    Deposit,
    Bridge,
}

pub struct FlowController {
    provider: Arc<KeyDiscoveryProvider>,
    sessions: SessionStore,
    engine: Arc<InteractiveEngine>,
    credential: RwLock<Option<SessionCredential>>,
    screen: watch::Sender<Screen>,
}

impl FlowController {
    #[must_use]
    pub fn new(
        provider: Arc<KeyDiscoveryProvider>,
        sessions: SessionStore,
        engine: Arc<InteractiveEngine>,
    ) -> Self {
        let (screen, _) = watch::channel(Screen::Connect);
        Self {
            provider,
            sessions,
            engine,
            credential: RwLock::new(None),
            screen,
        }
    }

    #[must_use]
    pub fn screen(&self) -> Screen {
        self.screen.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Screen> {
        self.screen.subscribe()
    }

    #[must_use]
    pub fn credential(&self) -> Option<SessionCredential> {
        self.credential
            .read()
            .map(|credential| credential.clone())
            .unwrap_or(None)
    }

    /// Restore a stored session and reconcile a pending anchor return.
    /// Returns the tracked transfer when the location carried one. Returns
    /// without a `kind` parameter are taken as withdrawals.
    pub async fn start(&self) -> Result<Option<TrackedTransfer>, AnchorError> {
        let credential = self.sessions.restore(&self.provider).await?;
        self.set_credential(credential.clone())?;

        let tracked = self
            .engine
            .reconcile_return(credential.as_ref(), TransferKind::Withdrawal)
            .await?;
        match (&credential, &tracked) {
            (_, Some(tracked)) => self.show(Screen::Tracking {
                transaction_id: tracked.record.id.clone(),
            }),
            (Some(_), None) => self.show(Screen::SelectOperation),
            (None, None) => self.show(Screen::Connect),
        }
        Ok(tracked)
    }

    /// Run one authentication attempt and move on when it succeeds.
    pub async fn connect(&self, auth: &AuthEngine) -> Result<SessionCredential, AnchorError> {
        let credential = auth.authenticate().await?;
        self.authenticated(credential.clone())?;
        Ok(credential)
    }

    pub fn authenticated(&self, credential: SessionCredential) -> Result<(), AnchorError> {
        self.set_credential(Some(credential))?;
        self.show(Screen::SelectOperation);
        Ok(())
    }

    /// Operations need an authenticated session; without one the user is
    /// sent back to `Connect`.
    pub fn select_operation(&self, choice: MenuChoice) -> Screen {
        let next = if self.credential().is_none() {
            Screen::Connect
        } else {
            match choice {
                MenuChoice::Withdraw => Screen::Transfer(TransferKind::Withdrawal),
                MenuChoice::Deposit => Screen::Transfer(TransferKind::Deposit),
                MenuChoice::Bridge => Screen::Bridge,
            }
        };
        self.show(next.clone());
        next
    }

    pub fn bridge_complete(&self) {
        if self.screen() == Screen::Bridge {
            self.show(Screen::SelectOperation);
        }
    }

    pub fn tracking_started(&self, transaction_id: &str) {
        self.show(Screen::Tracking {
            transaction_id: transaction_id.to_string(),
        });
    }

    /// Drop the tracked record, stop its poller and strip any return
    /// parameters before going back to the menu.
    pub fn go_back(&self) {
        if let Screen::Tracking { transaction_id } = self.screen() {
            self.engine.stop_tracking(&transaction_id);
        }
        strip_return_params(self.engine.browser().as_ref());
        if self.credential().is_some() {
            self.show(Screen::SelectOperation);
        } else {
            self.show(Screen::Connect);
        }
    }

    /// Forget the wallet backend, clear the stored credential and account
    /// key, and return to `Connect`.
    pub async fn disconnect(&self) -> Result<(), AnchorError> {
        self.engine.stop_all();
        self.set_credential(None)?;
        self.sessions.clear()?;
        self.provider.forget().await?;
        tracing::info!("disconnected");
        self.show(Screen::Connect);
        Ok(())
    }

    fn set_credential(&self, credential: Option<SessionCredential>) -> Result<(), AnchorError> {
        let mut guard = self
            .credential
            .write()
            .map_err(|_| AnchorError::Storage("mutex poisoned: flow credential".to_string()))?;
        *guard = credential;
        Ok(())
    }

    fn show(&self, next: Screen) {
        tracing::debug!(screen = ?next, "flow screen");
        self.screen.send_replace(next);
    }
}
