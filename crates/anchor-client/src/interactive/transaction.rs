use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::operation::TransferKind;

/// Anchor-reported status. Only `Completed`, `Failed` and `Error` are
/// terminal; anchor-defined intermediate values land in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Incomplete,
    Pending,
    Processing,
    Completed,
    Failed,
    Error,
    Other(String),
}

impl TransactionStatus {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "incomplete" => Self::Incomplete,
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Other(raw) => raw.as_str(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Error)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TransactionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TransactionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// In-memory view of one anchor transaction. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub id: String,
    pub status: TransactionStatus,
    pub kind: TransferKind,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub terminal: bool,
    pub message: Option<String>,
}

impl TransactionRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, status: TransactionStatus, kind: TransferKind) -> Self {
        let terminal = status.is_terminal();
        Self {
            id: id.into(),
            status,
            kind,
            last_polled_at: None,
            terminal,
            message: None,
        }
    }

    /// Overwrite status from a poll. A terminal record never changes again;
    /// returns whether the update was applied.
    pub fn apply_poll(
        &mut self,
        status: TransactionStatus,
        message: Option<String>,
        polled_at: DateTime<Utc>,
    ) -> bool {
        if self.terminal {
            return false;
        }
        self.terminal = status.is_terminal();
        self.status = status;
        self.message = message;
        self.last_polled_at = Some(polled_at);
        true
    }
}
