use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the task core. None of them is fatal: each one
/// degrades a single feature while the session keeps running.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad user input. The input is rejected and the user re-prompted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Store read or write failed. Local state is left as it was.
    #[error("sync failed: {message}")]
    Sync { message: String, retriable: bool },

    /// The identity provider or the notification API said no.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Guest upgrade stopped partway. The pending snapshot is kept for a retry.
    #[error("migration failed after copying {copied} of {total} tasks: {source}")]
    Migration {
        copied: usize,
        total: usize,
        #[source]
        source: Box<Error>,
    },

    /// An operation was called in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    pub fn sync(message: impl Into<String>, retriable: bool) -> Self {
        Error::Sync {
            message: message.into(),
            retriable,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Sync { .. } => "SYNC_ERROR",
            Error::Permission(_) => "PERMISSION_DENIED",
            Error::Migration { .. } => "MIGRATION_ERROR",
            Error::InvalidState(_) => "INVALID_STATE",
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn retryable(&self) -> bool {
        match self {
            Error::Validation(_) => false,
            Error::Sync { retriable, .. } => *retriable,
            Error::Permission(_) => false,
            Error::Migration { .. } => true,
            Error::InvalidState(_) => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        let retriable = matches!(
            err.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        );
        Error::sync(err.to_string(), retriable)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let retriable = matches!(
            err.kind(),
            std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
        );
        Error::sync(err.to_string(), retriable)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::sync(format!("corrupt local data: {err}"), false)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::sync(format!("background task failed: {err}"), true)
    }
}
