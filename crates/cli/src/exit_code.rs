//! Process exit codes
//!
//! Scripts branch on these, so values never change once published.

use bk_core::{Error, FatalCause, StorageError, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    UsageError = 2,
    NetworkError = 3,
    AuthError = 4,
    NotFound = 5,
    Conflict = 6,
    UnsupportedFeature = 7,
    /// A transfer was started and then aborted
    TransferAborted = 8,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Network(_) => ExitCode::NetworkError,
            Error::Auth(_) => ExitCode::AuthError,
            Error::NotFound(_) | Error::AliasNotFound(_) => ExitCode::NotFound,
            Error::Conflict(_) => ExitCode::Conflict,
            Error::InvalidPath(_) => ExitCode::UsageError,
            Error::UnsupportedFeature(_) => ExitCode::UnsupportedFeature,
            _ => ExitCode::GeneralError,
        }
    }

    pub fn from_transfer_error(error: &TransferError) -> Self {
        match error {
            TransferError::InvalidArgument(_) => ExitCode::UsageError,
            TransferError::CredentialExpired(_) => ExitCode::AuthError,
            TransferError::RetryBudgetExhausted { .. } => ExitCode::TransferAborted,
            TransferError::Fatal(FatalCause::Refresh(_)) => ExitCode::AuthError,
            TransferError::Fatal(FatalCause::Storage(storage)) => match storage {
                StorageError::CredentialExpired(_) | StorageError::AccessDenied(_) => {
                    ExitCode::AuthError
                }
                StorageError::NoSuchBucket(_) => ExitCode::NotFound,
                StorageError::Network(_) => ExitCode::NetworkError,
                _ => ExitCode::TransferAborted,
            },
            TransferError::Fatal(_) => ExitCode::TransferAborted,
        }
    }
}
