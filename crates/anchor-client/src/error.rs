use thiserror::Error;

/// Every failure the client surfaces to its caller.
///
/// `PollingTransportError` and `UnknownOrigin` are absorbed by the engine that
/// produces them (retried and ignored respectively); all other variants abort
/// the current step and the user may retry by re-entering it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnchorError {
    #[error("no wallet available")]
    NoWalletAvailable,

    #[error("signing rejected: {0}")]
    SigningRejected(String),

    #[error("auth challenge unavailable ({status}): {message}")]
    ChallengeUnavailable { status: u16, message: String },

    #[error("credential issuance failed ({status}): {message}")]
    CredentialIssuanceFailed { status: u16, message: String },

    #[error("initiation rejected ({status}): {message}")]
    InitiationRejected { status: u16, message: String },

    #[error("polling transport error: {0}")]
    PollingTransportError(String),

    #[error("message from unknown origin: {origin}")]
    UnknownOrigin { origin: String },

    #[error("missing or invalid fields: {}", missing.join(", "))]
    DataValidationError { missing: Vec<String> },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Stable label for an [`AnchorError`], suitable for logs and UI routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoWalletAvailable,
    SigningRejected,
    ChallengeUnavailable,
    CredentialIssuanceFailed,
    InitiationRejected,
    PollingTransportError,
    UnknownOrigin,
    DataValidationError,
    InvalidConfig,
    Storage,
    Transport,
}

impl ErrorKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NoWalletAvailable => "no_wallet_available",
            Self::SigningRejected => "signing_rejected",
            Self::ChallengeUnavailable => "challenge_unavailable",
            Self::CredentialIssuanceFailed => "credential_issuance_failed",
            Self::InitiationRejected => "initiation_rejected",
            Self::PollingTransportError => "polling_transport_error",
            Self::UnknownOrigin => "unknown_origin",
            Self::DataValidationError => "data_validation_error",
            Self::InvalidConfig => "invalid_config",
            Self::Storage => "storage",
            Self::Transport => "transport",
        }
    }
}

impl AnchorError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoWalletAvailable => ErrorKind::NoWalletAvailable,
            Self::SigningRejected(_) => ErrorKind::SigningRejected,
            Self::ChallengeUnavailable { .. } => ErrorKind::ChallengeUnavailable,
            Self::CredentialIssuanceFailed { .. } => ErrorKind::CredentialIssuanceFailed,
            Self::InitiationRejected { .. } => ErrorKind::InitiationRejected,
            Self::PollingTransportError(_) => ErrorKind::PollingTransportError,
            Self::UnknownOrigin { .. } => ErrorKind::UnknownOrigin,
            Self::DataValidationError { .. } => ErrorKind::DataValidationError,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    /// True for failures the producing engine handles itself.
    #[must_use]
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PollingTransportError(_) | Self::UnknownOrigin { .. }
        )
    }
}
