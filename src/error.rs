//! Error types for inbox-filter

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("Action error: {0}")]
    Action(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification carried in run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connect,
    Auth,
    Protocol,
    Action,
    Config,
    Credential,
    Store,
    Timeout,
    Cancelled,
    Internal,
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(_) | Self::Io(_) | Self::Tls(_) => ErrorKind::Connect,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Action(_) => ErrorKind::Action,
            Self::Config(_) => ErrorKind::Config,
            Self::Credential(_) => ErrorKind::Credential,
            Self::Store(_) => ErrorKind::Store,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the session can no longer be trusted after this error.
    ///
    /// A fatal error ends the account pass instead of being recorded
    /// against a single term, rule, or UID.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::Io(_)
                | Self::Tls(_)
                | Self::Timeout(_)
                | Self::Cancelled
        )
    }

    /// Whether opening a session may be retried after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Io(_) | Self::Tls(_) | Self::Timeout(_)
        )
    }
}
