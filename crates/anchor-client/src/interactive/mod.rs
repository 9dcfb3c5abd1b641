//! Anchor-hosted interactive transfers: initiation, the redirect and pop-up
//! paths, reconciliation after a redirect back, and status tracking.

pub mod browser;
pub mod messages;
pub mod operation;
pub mod poller;
pub mod transaction;

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{OnceCell, mpsc};
use url::Url;

use crate::AnchorError;
use crate::config::AnchorClientConfig;
use crate::descriptor;
use crate::http::AnchorHttp;
use crate::session::SessionCredential;

use browser::{BrowsingContext, PopupWindow, deep_link, take_deep_link_return};
use messages::{MessageBus, OriginListener, TransactionNotice};
use operation::{TransferKind, TransferOperation};
use poller::{PollEvent, StatusClient, TransactionTracker};
use transaction::TransactionRecord;

/// `callback` value asking the anchor to notify the opener window.
pub const POST_MESSAGE_CALLBACK: &str = "postMessage";
const CALLBACK_PARAM: &str = "callback";

#[derive(Debug, Deserialize)]
struct InitiationResponse {
    url: String,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedTransfer {
    pub kind: TransferKind,
    pub interactive_url: Url,
    pub transaction_id: Option<String>,
}

/// A record now under polling. `events` is `None` when the id was already
/// tracked, in which case no second poller was started.
#[derive(Debug)]
pub struct TrackedTransfer {
    pub record: TransactionRecord,
    pub events: Option<mpsc::UnboundedReceiver<PollEvent>>,
}

impl TrackedTransfer {
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.events.is_some()
    }
}

/// Open pop-up plus its origin-scoped listener.
pub struct PopupSession {
    transfer: InitiatedTransfer,
    listener: OriginListener,
    popup: Option<Box<dyn PopupWindow>>,
}

impl PopupSession {
    #[must_use]
    pub fn transfer(&self) -> &InitiatedTransfer {
        &self.transfer
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.popup.is_some()
    }

    /// Wait for the anchor's notice, then close the pop-up and detach the
    /// listener. `None` if the session was closed first.
    pub async fn next_notice(&mut self) -> Option<TransactionNotice> {
        let notice = self.listener.next_notice().await;
        self.close();
        notice
    }

    /// Close the pop-up and detach. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.listener.unsubscribe();
        if let Some(mut popup) = self.popup.take() {
            popup.close();
        }
    }
}

impl Drop for PopupSession {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct InteractiveEngine {
    http: AnchorHttp,
    config: AnchorClientConfig,
    browser: Arc<dyn BrowsingContext>,
    messages: MessageBus,
    tracker: TransactionTracker,
    anchor_base: OnceCell<String>,
}

impl InteractiveEngine {
    #[must_use]
    pub fn new(
        http: AnchorHttp,
        config: AnchorClientConfig,
        browser: Arc<dyn BrowsingContext>,
        messages: MessageBus,
    ) -> Self {
        let tracker = TransactionTracker::new(config.poll_interval);
        Self {
            http,
            config,
            browser,
            messages,
            tracker,
            anchor_base: OnceCell::new(),
        }
    }

    /// Skip descriptor discovery and use `anchor_base` for every request.
    #[must_use]
    pub fn with_anchor_base(mut self, anchor_base: &str) -> Self {
        self.anchor_base = OnceCell::from(anchor_base.trim_end_matches('/').to_string());
        self
    }

    #[must_use]
    pub fn messages(&self) -> &MessageBus {
        &self.messages
    }

    #[must_use]
    pub fn browser(&self) -> &Arc<dyn BrowsingContext> {
        &self.browser
    }

    pub async fn anchor_base(&self) -> String {
        self.anchor_base
            .get_or_init(|| async {
                descriptor::discover(&self.http, &self.config)
                    .await
                    .transfer_server
            })
            .await
            .clone()
    }

    /// Redirect path: initiate with a deep link back to the current location
    /// and navigate the whole context to the anchor.
    pub async fn start_redirect(
        &self,
        credential: &SessionCredential,
        operation: &TransferOperation,
    ) -> Result<InitiatedTransfer, AnchorError> {
        operation.validate(&credential.account_key)?;
        self.tracker.prune_finished();
        let callback = deep_link(&self.browser.location(), operation.kind());
        let mut transfer = self
            .initiate(credential, operation, callback.as_str())
            .await?;
        transfer
            .interactive_url
            .query_pairs_mut()
            .append_pair(CALLBACK_PARAM, callback.as_str());

        tracing::info!(
            kind = operation.kind().label(),
            url = %transfer.interactive_url,
            "redirecting to anchor"
        );
        self.browser.navigate(&transfer.interactive_url)?;
        Ok(transfer)
    }

    /// Pop-up path: the listener is attached before the window opens so an
    /// early notice cannot be missed.
    pub async fn start_popup(
        &self,
        credential: &SessionCredential,
        operation: &TransferOperation,
    ) -> Result<PopupSession, AnchorError> {
        operation.validate(&credential.account_key)?;
        self.tracker.prune_finished();
        let transfer = self
            .initiate(credential, operation, POST_MESSAGE_CALLBACK)
            .await?;

        let mut listener = self.messages.subscribe(&transfer.interactive_url);
        let popup = match self.browser.open_popup(&transfer.interactive_url) {
            Ok(popup) => popup,
            Err(error) => {
                listener.unsubscribe();
                return Err(error);
            }
        };
        tracing::info!(
            kind = operation.kind().label(),
            origin = listener.origin(),
            "anchor pop-up opened"
        );
        Ok(PopupSession {
            transfer,
            listener,
            popup: Some(popup),
        })
    }

    /// Wait for the pop-up's notice and start polling the id it carries.
    pub async fn await_popup(
        &self,
        credential: &SessionCredential,
        session: &mut PopupSession,
    ) -> Result<Option<TrackedTransfer>, AnchorError> {
        let Some(notice) = session.next_notice().await else {
            tracing::debug!("pop-up session closed without a notice");
            return Ok(None);
        };
        let record = TransactionRecord::new(notice.id, notice.status, session.transfer.kind);
        self.track(credential, record).await.map(Some)
    }

    /// Consume `id`/`status` from the current location, if present, and poll
    /// that transaction without re-initiating. The parameters are stripped
    /// even when no credential is available. `fallback_kind` applies only
    /// when the return carries no `kind` parameter.
    pub async fn reconcile_return(
        &self,
        credential: Option<&SessionCredential>,
        fallback_kind: TransferKind,
    ) -> Result<Option<TrackedTransfer>, AnchorError> {
        let Some(returned) = take_deep_link_return(self.browser.as_ref()) else {
            return Ok(None);
        };
        let Some(credential) = credential else {
            tracing::warn!(transaction_id = %returned.id, "deep-link return without a session; ignoring");
            return Ok(None);
        };
        let kind = returned.kind.unwrap_or_else(|| {
            tracing::debug!(
                transaction_id = %returned.id,
                kind = fallback_kind.label(),
                "return without kind parameter"
            );
            fallback_kind
        });
        tracing::info!(
            transaction_id = %returned.id,
            status = %returned.status,
            kind = kind.label(),
            "reconciling anchor return"
        );
        let record = TransactionRecord::new(returned.id, returned.status, kind);
        self.track(credential, record).await.map(Some)
    }

    pub async fn track(
        &self,
        credential: &SessionCredential,
        record: TransactionRecord,
    ) -> Result<TrackedTransfer, AnchorError> {
        let anchor_base = self.anchor_base().await;
        let client = StatusClient::new(self.http.clone(), &anchor_base, &credential.bearer_token);
        let events = self.tracker.track(client, record.clone())?;
        let record = if events.is_some() {
            record
        } else {
            self.tracker.record(&record.id).unwrap_or(record)
        };
        Ok(TrackedTransfer { record, events })
    }

    #[must_use]
    pub fn record(&self, transaction_id: &str) -> Option<TransactionRecord> {
        self.tracker.record(transaction_id)
    }

    pub fn stop_tracking(&self, transaction_id: &str) -> bool {
        self.tracker.release(transaction_id)
    }

    pub fn stop_all(&self) {
        self.tracker.stop_all();
    }

    async fn initiate(
        &self,
        credential: &SessionCredential,
        operation: &TransferOperation,
        callback: &str,
    ) -> Result<InitiatedTransfer, AnchorError> {
        let endpoint = format!(
            "{}{}",
            self.anchor_base().await,
            operation.kind().endpoint_path()
        );
        let body = operation.initiation_request(
            &self.config.asset_code,
            &credential.account_key,
            callback,
        );

        let response: InitiationResponse = self
            .http
            .post_json(&endpoint, &body, Some(&credential.bearer_token))
            .await
            .map_err(|error| {
                tracing::warn!(%endpoint, error = %error, "anchor rejected initiation");
                AnchorError::InitiationRejected {
                    status: error.status(),
                    message: error.message(),
                }
            })?;

        let interactive_url =
            Url::parse(response.url.trim()).map_err(|error| AnchorError::InitiationRejected {
                status: 200,
                message: format!("invalid interactive url `{}`: {error}", response.url),
            })?;
        Ok(InitiatedTransfer {
            kind: operation.kind(),
            interactive_url,
            transaction_id: response
                .id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
        })
    }
}
