use thiserror::Error;

use crate::domain::{Cents, ParseCentsError, WalletId};
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    #[error("Wallet already exists: {0}")]
    AlreadyExists(WalletId),

    #[error("Insufficient funds in wallet {wallet}: balance {balance}, required {required}")]
    InsufficientFunds {
        wallet: WalletId,
        balance: Cents,
        required: Cents,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid wallet id: {0}")]
    InvalidIdentifier(String),

    /// Connectivity failure, lock wait past the deadline, or any other
    /// store-side error. Nothing was committed.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl LedgerError {
    /// Expected business outcomes, as opposed to infrastructure failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, LedgerError::StorageUnavailable(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(id) => LedgerError::AlreadyExists(id),
            StoreError::Backend(err) => LedgerError::StorageUnavailable(format!("{:#}", err)),
        }
    }
}

impl From<ParseCentsError> for LedgerError {
    fn from(err: ParseCentsError) -> Self {
        LedgerError::InvalidAmount(err.to_string())
    }
}
