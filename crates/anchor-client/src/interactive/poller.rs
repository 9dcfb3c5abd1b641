//! Status polling bound to a transaction id.
//!
//! Each tracked id gets one background task that issues a status read, waits
//! for it to resolve, sleeps for the configured interval and repeats until the
//! anchor reports a terminal status or the task is stopped.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use super::transaction::{TransactionRecord, TransactionStatus};
use crate::AnchorError;
use crate::http::{AnchorHttp, HttpError};

pub const STATUS_PATH: &str = "/transaction";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    Updated(TransactionRecord),
    /// Non-fatal; the loop keeps its cadence.
    TransportError(AnchorError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: TransactionStatus,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    transaction: StatusBody,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: TransactionStatus,
    #[serde(default)]
    message: Option<String>,
}

/// Bearer-authenticated status reads against one anchor.
#[derive(Clone)]
pub struct StatusClient {
    http: AnchorHttp,
    anchor_base: String,
    bearer_token: String,
}

impl std::fmt::Debug for StatusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusClient")
            .field("anchor_base", &self.anchor_base)
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

impl StatusClient {
    #[must_use]
    pub fn new(http: AnchorHttp, anchor_base: &str, bearer_token: &str) -> Self {
        Self {
            http,
            anchor_base: anchor_base.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.to_string(),
        }
    }

    pub fn status_url(&self, transaction_id: &str) -> Result<Url, HttpError> {
        let raw = format!("{}{STATUS_PATH}", self.anchor_base);
        let mut url = Url::parse(&raw)
            .map_err(|error| HttpError::Transport(format!("invalid status url `{raw}`: {error}")))?;
        url.query_pairs_mut().append_pair("id", transaction_id);
        Ok(url)
    }

    pub async fn fetch(&self, transaction_id: &str) -> Result<StatusUpdate, HttpError> {
        let url = self.status_url(transaction_id)?;
        let response: StatusResponse = self
            .http
            .get_json(url.as_str(), Some(&self.bearer_token))
            .await?;
        Ok(StatusUpdate {
            status: response.transaction.status,
            message: response
                .transaction
                .message
                .filter(|message| !message.trim().is_empty()),
        })
    }
}

/// Handle to a running poller. Dropping it cancels the task.
#[derive(Debug)]
pub struct PollHandle {
    transaction_id: String,
    cancel: watch::Sender<bool>,
    latest: watch::Receiver<TransactionRecord>,
    task: JoinHandle<()>,
}

impl PollHandle {
    #[must_use]
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    #[must_use]
    pub fn latest(&self) -> TransactionRecord {
        self.latest.borrow().clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request cancellation. Idempotent; an in-flight read is abandoned.
    pub fn stop(&self) {
        self.cancel.send_replace(true);
    }

    /// Wait for the task to end and return the last known record.
    pub async fn join(mut self) -> TransactionRecord {
        let _ = (&mut self.task).await;
        self.latest()
    }
}

/// Start polling `record`. A record that is already terminal issues no reads.
pub fn spawn_poller(
    client: StatusClient,
    record: TransactionRecord,
    interval: Duration,
    events: mpsc::UnboundedSender<PollEvent>,
) -> PollHandle {
    let (cancel, cancel_rx) = watch::channel(false);
    let (latest_tx, latest) = watch::channel(record.clone());
    let transaction_id = record.id.clone();
    let task = tokio::spawn(poll_loop(client, record, interval, cancel_rx, latest_tx, events));
    PollHandle {
        transaction_id,
        cancel,
        latest,
        task,
    }
}

async fn poll_loop(
    client: StatusClient,
    mut record: TransactionRecord,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
    latest: watch::Sender<TransactionRecord>,
    events: mpsc::UnboundedSender<PollEvent>,
) {
    while !record.terminal && !*cancel.borrow() {
        let outcome = tokio::select! {
            biased;
            _ = cancel.changed() => break,
            outcome = client.fetch(&record.id) => outcome,
        };

        match outcome {
            Ok(update) => {
                record.apply_poll(update.status, update.message, Utc::now());
                tracing::info!(
                    transaction_id = %record.id,
                    status = %record.status,
                    terminal = record.terminal,
                    "transaction status updated"
                );
                latest.send_replace(record.clone());
                let _ = events.send(PollEvent::Updated(record.clone()));
                if record.terminal {
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(transaction_id = %record.id, error = %error, "status poll failed");
                let _ = events.send(PollEvent::TransportError(
                    AnchorError::PollingTransportError(error.to_string()),
                ));
            }
        }

        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    tracing::debug!(transaction_id = %record.id, status = %record.status, "poller stopped");
}

/// At most one poller per transaction id for the lifetime of the tracker.
#[derive(Debug)]
pub struct TransactionTracker {
    interval: Duration,
    pollers: Mutex<HashMap<String, PollHandle>>,
}

impl TransactionTracker {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pollers: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Begin polling. Returns `None` when the id is already tracked, which
    /// makes replayed notices and deep-link returns harmless.
    pub fn track(
        &self,
        client: StatusClient,
        record: TransactionRecord,
    ) -> Result<Option<mpsc::UnboundedReceiver<PollEvent>>, AnchorError> {
        let mut pollers = self
            .pollers
            .lock()
            .map_err(|_| AnchorError::Storage("mutex poisoned: transaction tracker".to_string()))?;
        if pollers.contains_key(&record.id) {
            tracing::debug!(transaction_id = %record.id, "transaction already tracked");
            return Ok(None);
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let id = record.id.clone();
        let handle = spawn_poller(client, record, self.interval, events_tx);
        pollers.insert(id, handle);
        Ok(Some(events_rx))
    }

    #[must_use]
    pub fn is_tracked(&self, transaction_id: &str) -> bool {
        self.pollers
            .lock()
            .map(|pollers| pollers.contains_key(transaction_id))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn record(&self, transaction_id: &str) -> Option<TransactionRecord> {
        self.pollers
            .lock()
            .ok()?
            .get(transaction_id)
            .map(PollHandle::latest)
    }

    /// Stop and forget one id so it may be tracked again.
    pub fn release(&self, transaction_id: &str) -> bool {
        let removed = self
            .pollers
            .lock()
            .ok()
            .and_then(|mut pollers| pollers.remove(transaction_id));
        match removed {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Forget pollers whose record went terminal or whose task ended.
    /// Still-running pollers are kept.
    pub fn prune_finished(&self) -> usize {
        let Ok(mut pollers) = self.pollers.lock() else {
            return 0;
        };
        let before = pollers.len();
        pollers.retain(|_, handle| !handle.latest().terminal && !handle.is_finished());
        let pruned = before - pollers.len();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned finished pollers");
        }
        pruned
    }

    pub fn stop_all(&self) {
        if let Ok(mut pollers) = self.pollers.lock() {
            for (_, handle) in pollers.drain() {
                handle.stop();
            }
        }
    }
}
