use std::future::Future;

use thiserror::Error;

use crate::domain::{Cents, WalletId};

#[derive(Error, Debug)]
pub enum StoreError {
    /// The store's uniqueness constraint on the wallet id rejected an insert.
    #[error("Wallet already exists: {0}")]
    Conflict(WalletId),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent wallet table consumed by the ledger.
///
/// All balance mutations go through a [`UnitOfWork`]; the store itself only
/// hands those out and serves unlocked point reads.
pub trait WalletStore: Send + Sync {
    type Unit: UnitOfWork;

    /// Start a unit of work that is committed or rolled back as a whole.
    fn begin(&self) -> impl Future<Output = StoreResult<Self::Unit>> + Send;

    /// Most recently committed balance of a wallet, without taking its lock.
    fn balance(&self, id: WalletId) -> impl Future<Output = StoreResult<Option<Cents>>> + Send;
}

/// An open transaction against a [`WalletStore`].
///
/// Dropping a unit of work without calling [`UnitOfWork::commit`] discards
/// every staged write and releases every lock it holds.
pub trait UnitOfWork: Send {
    /// Take the exclusive lock on one wallet row and read its balance.
    ///
    /// Blocks while another unit of work holds the same row; never blocks on
    /// other rows. The lock is held until commit or rollback. Returns `None`
    /// when the wallet does not exist.
    fn lock(&mut self, id: WalletId) -> impl Future<Output = StoreResult<Option<Cents>>> + Send;

    /// Insert a new wallet, failing with [`StoreError::Conflict`] if the id is taken.
    fn insert(
        &mut self,
        id: WalletId,
        balance: Cents,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Insert a new wallet unless the id is taken. Returns whether a row was inserted.
    ///
    /// Waits for a concurrent, uncommitted insert of the same id to settle
    /// before deciding.
    fn insert_missing(
        &mut self,
        id: WalletId,
        balance: Cents,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Overwrite the balance of a wallet previously returned by [`UnitOfWork::lock`].
    fn update(
        &mut self,
        id: WalletId,
        balance: Cents,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn commit(self) -> impl Future<Output = StoreResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = StoreResult<()>> + Send;
}
