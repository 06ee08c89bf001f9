use std::fmt;

/// Error classes the sync engine reacts to differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Server overload, 5xx, 429, timeout, dropped connection. Retried with backoff.
    Transient,
    /// Remote rejected the request or answered garbage. Aborts the pass.
    FatalRemote,
    /// Local store could not read or write. Aborts the pass.
    LocalStorage,
    /// Caller or configuration mistakes.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::FatalRemote => write!(f, "fatal-remote"),
            ErrorKind::LocalStorage => write!(f, "local-storage"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedSyncError {
    /// 5xx and 429 answers
    #[error("Server error [{status}]: {message}")]
    ServerError { status: u16, message: String },
    /// Any other non-success answer
    #[error("Request rejected [{status}]: {message}")]
    Rejected { status: u16, message: String },
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeedSyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedSyncError::ServerError { .. }
            | FeedSyncError::Timeout(_)
            | FeedSyncError::Transport(_) => ErrorKind::Transient,
            FeedSyncError::Rejected { .. } | FeedSyncError::MalformedResponse(_) => {
                ErrorKind::FatalRemote
            }
            FeedSyncError::KvStore(_) | FeedSyncError::Serialization(_) | FeedSyncError::IO(_) => {
                ErrorKind::LocalStorage
            }
            FeedSyncError::Config(_)
            | FeedSyncError::InvalidArgument(_)
            | FeedSyncError::Internal(_) => ErrorKind::Other,
        }
    }

    /// Whether a retry with backoff may help.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Map an HTTP status to the taxonomy: 429 and 5xx are transient, the rest fatal.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 429 || (500..600).contains(&status) {
            FeedSyncError::ServerError { status, message }
        } else {
            FeedSyncError::Rejected { status, message }
        }
    }
}

impl From<sled::Error> for FeedSyncError {
    fn from(error: sled::Error) -> Self {
        FeedSyncError::KvStore(error.to_string())
    }
}

impl From<bincode::Error> for FeedSyncError {
    fn from(error: bincode::Error) -> Self {
        FeedSyncError::Serialization(error.to_string())
    }
}

impl From<serde_json::Error> for FeedSyncError {
    fn from(error: serde_json::Error) -> Self {
        FeedSyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for FeedSyncError {
    fn from(error: std::io::Error) -> Self {
        FeedSyncError::IO(error.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for FeedSyncError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        FeedSyncError::Timeout(error.to_string())
    }
}

impl From<reqwest::Error> for FeedSyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FeedSyncError::Timeout(error.to_string())
        } else if error.is_decode() {
            FeedSyncError::MalformedResponse(error.to_string())
        } else if let Some(status) = error.status() {
            FeedSyncError::from_status(status.as_u16(), error.to_string())
        } else {
            FeedSyncError::Transport(error.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, FeedSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert!(FeedSyncError::from_status(503, "busy").is_transient());
        assert!(FeedSyncError::from_status(429, "slow down").is_transient());
        assert_eq!(
            FeedSyncError::from_status(404, "gone").kind(),
            ErrorKind::FatalRemote
        );
        assert_eq!(
            FeedSyncError::from_status(401, "auth").kind(),
            ErrorKind::FatalRemote
        );
    }

    #[test]
    fn storage_errors_are_local() {
        let err: FeedSyncError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(err.kind(), ErrorKind::LocalStorage);
        assert!(!err.is_transient());
    }
}
