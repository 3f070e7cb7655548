//! Error types for bk-core
//!
//! `Error` covers configuration, alias and bucket administration failures.
//! The upload path has its own, narrower taxonomy: [`StorageError`] is what a
//! storage backend reports, [`TransferError`] is what the upload controller
//! returns to its caller.

use thiserror::Error;

/// Result type alias for bk-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// General error type for everything outside the transfer path
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    General(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Alias not found: {0}")]
    AliasNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// How the upload controller treats a storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credentials expired; refresh and retry under the retry budget
    CredentialExpired,
    /// Anything else; surfaced immediately
    Fatal,
}

/// Failure reported by a [`StorageService`](crate::StorageService) call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("credentials expired: {0}")]
    CredentialExpired(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("bucket not found: {0}")]
    NoSuchBucket(String),

    #[error("multipart upload not found: {0}")]
    NoSuchUpload(String),

    #[error("malformed request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("storage service error: {0}")]
    Service(String),
}

impl StorageError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StorageError::CredentialExpired(_) => ErrorClass::CredentialExpired,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_credential_expired(&self) -> bool {
        self.class() == ErrorClass::CredentialExpired
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::CredentialExpired(msg) | StorageError::AccessDenied(msg) => {
                Error::Auth(msg)
            }
            StorageError::NoSuchBucket(msg) | StorageError::NoSuchUpload(msg) => {
                Error::NotFound(msg)
            }
            StorageError::InvalidRequest(msg) => Error::General(msg),
            StorageError::Network(msg) => Error::Network(msg),
            StorageError::Service(msg) => Error::General(msg),
        }
    }
}

/// Failure of the credential refresh capability
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("credential refresh failed: {message}")]
pub struct AuthError {
    pub message: String,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Underlying cause of a [`TransferError::Fatal`]
#[derive(Debug, Error)]
pub enum FatalCause {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Refresh(#[from] AuthError),

    #[error("reading source file: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload worker failed: {0}")]
    Worker(String),
}

/// Terminal outcome of a failed transfer
#[derive(Debug, Error)]
pub enum TransferError {
    /// Bad input; nothing was sent to the storage service
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Retryable failure. Handled inside the controller, never returned by it.
    #[error("credentials expired: {0}")]
    CredentialExpired(StorageError),

    #[error("transfer failed: {0}")]
    Fatal(#[source] FatalCause),

    #[error("retry budget exhausted after {attempts} attempt(s) with expired credentials")]
    RetryBudgetExhausted { attempts: u32 },
}

impl TransferError {
    /// Classify a storage failure the way the retry policy sees it
    pub fn from_storage(err: StorageError) -> Self {
        match err.class() {
            ErrorClass::CredentialExpired => TransferError::CredentialExpired(err),
            ErrorClass::Fatal => TransferError::Fatal(FatalCause::Storage(err)),
        }
    }

    pub fn fatal(cause: impl Into<FatalCause>) -> Self {
        TransferError::Fatal(cause.into())
    }
}
