//! Cross-window notifications as an origin-filtered channel.
//!
//! The host posts every message its window receives into a [`MessageBus`];
//! each interactive session holds an [`OriginListener`] that only yields
//! transaction notices from the anchor's origin.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tokio::sync::mpsc;
use url::Url;

use super::transaction::TransactionStatus;
use crate::AnchorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowMessage {
    pub origin: String,
    pub data: serde_json::Value,
}

/// Transaction id and status carried by a trusted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionNotice {
    pub id: String,
    pub status: TransactionStatus,
}

#[derive(Debug, Deserialize)]
struct NoticeEnvelope {
    transaction: NoticeBody,
}

#[derive(Debug, Deserialize)]
struct NoticeBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<TransactionStatus>,
}

#[derive(Debug, Default)]
struct BusState {
    next_id: u64,
    listeners: HashMap<u64, mpsc::UnboundedSender<WindowMessage>>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageBus {
    inner: Arc<Mutex<BusState>>,
}

impl MessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message to every attached listener; returns how many
    /// listeners received it.
    pub fn post(&self, origin: &str, data: serde_json::Value) -> usize {
        let Ok(mut state) = self.inner.lock() else {
            return 0;
        };
        let message = WindowMessage {
            origin: origin.to_string(),
            data,
        };
        state
            .listeners
            .retain(|_, sender| sender.send(message.clone()).is_ok());
        state.listeners.len()
    }

    #[must_use]
    pub fn subscribe(&self, anchor_url: &Url) -> OriginListener {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = match self.inner.lock() {
            Ok(mut state) => {
                state.next_id += 1;
                let id = state.next_id;
                state.listeners.insert(id, sender);
                id
            }
            Err(_) => 0,
        };
        OriginListener {
            id,
            origin: anchor_url.origin().ascii_serialization(),
            bus: self.clone(),
            receiver,
            attached: id != 0,
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner
            .lock()
            .map(|state| state.listeners.len())
            .unwrap_or(0)
    }

    fn detach(&self, id: u64) {
        if let Ok(mut state) = self.inner.lock() {
            state.listeners.remove(&id);
        }
    }
}

pub struct OriginListener {
    id: u64,
    origin: String,
    bus: MessageBus,
    receiver: mpsc::UnboundedReceiver<WindowMessage>,
    attached: bool,
}

impl OriginListener {
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Wait for the next notice from the anchor origin. Foreign-origin and
    /// malformed messages are logged and skipped. `None` once detached.
    pub async fn next_notice(&mut self) -> Option<TransactionNotice> {
        while let Some(message) = self.receiver.recv().await {
            match self.accept(&message) {
                Ok(Some(notice)) => return Some(notice),
                Ok(None) => {
                    tracing::debug!(origin = %message.origin, "ignoring message without transaction id");
                }
                Err(error) => {
                    tracing::warn!(expected = %self.origin, error = %error, "discarding cross-window message");
                }
            }
        }
        None
    }

    /// Origin check and payload decoding for one message.
    pub fn accept(&self, message: &WindowMessage) -> Result<Option<TransactionNotice>, AnchorError> {
        if !same_origin(&message.origin, &self.origin) {
            return Err(AnchorError::UnknownOrigin {
                origin: message.origin.clone(),
            });
        }
        let Ok(envelope) = serde_json::from_value::<NoticeEnvelope>(message.data.clone()) else {
            return Ok(None);
        };
        let Some(id) = envelope
            .transaction
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
        else {
            return Ok(None);
        };
        Ok(Some(TransactionNotice {
            id,
            status: envelope
                .transaction
                .status
                .unwrap_or(TransactionStatus::Pending),
        }))
    }

    /// Detach from the bus. Safe to call any number of times; returns true
    /// only for the call that actually detached.
    pub fn unsubscribe(&mut self) -> bool {
        if !self.attached {
            return false;
        }
        self.attached = false;
        self.bus.detach(self.id);
        self.receiver.close();
        true
    }
}

impl Drop for OriginListener {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn same_origin(candidate: &str, expected: &str) -> bool {
    Url::parse(candidate)
        .map(|url| url.origin().ascii_serialization() == expected)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;

    use super::{MessageBus, TransactionNotice};
    use crate::interactive::transaction::TransactionStatus;
    use crate::AnchorError;

    fn anchor() -> Url {
        Url::parse("https://anchor.example.com/sep24/interactive?token=abc").expect("url")
    }

    #[tokio::test]
    async fn listener_yields_notice_from_anchor_origin() {
        let bus = MessageBus::new();
        let mut listener = bus.subscribe(&anchor());

        bus.post(
            "https://evil.example.com",
            json!({"transaction": {"id": "spoofed", "status": "completed"}}),
        );
        bus.post("https://anchor.example.com", json!({"hello": "world"}));
        bus.post(
            "https://anchor.example.com",
            json!({"transaction": {"id": "tx-7", "status": "pending_user_transfer_start"}}),
        );

        assert_eq!(
            listener.next_notice().await,
            Some(TransactionNotice {
                id: "tx-7".to_string(),
                status: TransactionStatus::Other("pending_user_transfer_start".to_string()),
            })
        );
    }

    #[test]
    fn foreign_origin_is_reported_as_unknown() {
        let bus = MessageBus::new();
        let listener = bus.subscribe(&anchor());
        let result = listener.accept(&super::WindowMessage {
            origin: "https://anchor.example.com:8443".to_string(),
            data: json!({"transaction": {"id": "tx"}}),
        });
        assert_eq!(
            result,
            Err(AnchorError::UnknownOrigin {
                origin: "https://anchor.example.com:8443".to_string()
            })
        );
    }

    #[test]
    fn unsubscribe_is_idempotent_and_detaches() {
        let bus = MessageBus::new();
        let mut listener = bus.subscribe(&anchor());
        assert_eq!(bus.listener_count(), 1);

        assert!(listener.unsubscribe());
        assert!(!listener.unsubscribe());
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(bus.post("https://anchor.example.com", json!({})), 0);
    }

    #[tokio::test]
    async fn detached_listener_yields_none() {
        let bus = MessageBus::new();
        let mut listener = bus.subscribe(&anchor());
        listener.unsubscribe();
        assert_eq!(listener.next_notice().await, None);
    }

    #[test]
    fn dropping_listener_detaches() {
        let bus = MessageBus::new();
        {
            let _listener = bus.subscribe(&anchor());
            assert_eq!(bus.listener_count(), 1);
        }
        assert_eq!(bus.listener_count(), 0);
    }
}
