use std::future::Future;
use std::time::Duration;

use crate::domain::{Cents, Wallet, WalletId};
use crate::storage::{UnitOfWork, WalletStore};

use super::{LedgerError, OpContext};

/// Default upper bound on a single operation, lock waits included.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for [`LedgerService`].
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Deadline applied when the caller's context carries none (and the cap
    /// applied when it carries a later one).
    pub op_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

/// Result of a deposit that may have created the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositResult {
    pub wallet: Wallet,
    pub created: bool,
}

/// The ledger engine: every balance change goes through here.
///
/// Each mutation runs as one unit of work that locks the single wallet row it
/// touches, reads the balance, writes the new one and commits. The row lock is
/// the only coordination between concurrent callers, so any number of service
/// instances may share one store.
pub struct LedgerService<S> {
    store: S,
    config: LedgerConfig,
}

impl<S: WalletStore> LedgerService<S> {
    /// Create a new ledger service over the given store.
    pub fn new(store: S) -> Self {
        Self::with_config(store, LedgerConfig::default())
    }

    pub fn with_config(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ========================
    // Mutations
    // ========================

    /// Create a wallet with an initial balance.
    ///
    /// Fails with [`LedgerError::AlreadyExists`] if the id is taken; the
    /// existing wallet is left untouched.
    pub async fn create_wallet(
        &self,
        ctx: &OpContext,
        id: WalletId,
        initial: Cents,
    ) -> Result<Wallet, LedgerError> {
        if initial < 0 {
            return Err(LedgerError::InvalidAmount(
                "Initial balance cannot be negative".to_string(),
            ));
        }

        self.bounded(ctx, "create_wallet", async {
            let mut unit = self.store.begin().await?;
            unit.insert(id, initial).await?;
            unit.commit().await?;

            tracing::info!(wallet = %id, balance = initial, "wallet created");
            Ok::<_, LedgerError>(Wallet::new(id, initial))
        })
        .await
    }

    /// Add funds to an existing wallet.
    pub async fn deposit(
        &self,
        ctx: &OpContext,
        id: WalletId,
        amount: Cents,
    ) -> Result<Wallet, LedgerError> {
        require_positive(amount)?;

        self.bounded(ctx, "deposit", async {
            let mut unit = self.store.begin().await?;
            let Some(balance) = unit.lock(id).await? else {
                return Err(abort(unit, LedgerError::WalletNotFound(id)).await);
            };

            credit(unit, Wallet::new(id, balance), amount).await
        })
        .await
    }

    /// Add funds to a wallet, creating it with `amount` as its balance if it
    /// does not exist yet. Creation and credit happen in one unit of work, so
    /// concurrent first deposits to the same id cannot race each other.
    pub async fn deposit_or_create(
        &self,
        ctx: &OpContext,
        id: WalletId,
        amount: Cents,
    ) -> Result<DepositResult, LedgerError> {
        require_positive(amount)?;

        self.bounded(ctx, "deposit_or_create", async {
            let mut unit = self.store.begin().await?;

            if unit.insert_missing(id, amount).await? {
                unit.commit().await?;
                tracing::info!(wallet = %id, balance = amount, "wallet created by deposit");
                return Ok(DepositResult {
                    wallet: Wallet::new(id, amount),
                    created: true,
                });
            }

            let Some(balance) = unit.lock(id).await? else {
                return Err(abort(unit, LedgerError::WalletNotFound(id)).await);
            };

            let wallet = credit(unit, Wallet::new(id, balance), amount).await?;
            Ok(DepositResult {
                wallet,
                created: false,
            })
        })
        .await
    }

    /// Remove funds from a wallet. Never lets the balance go below zero.
    pub async fn withdraw(
        &self,
        ctx: &OpContext,
        id: WalletId,
        amount: Cents,
    ) -> Result<Wallet, LedgerError> {
        require_positive(amount)?;

        self.bounded(ctx, "withdraw", async {
            let mut unit = self.store.begin().await?;
            let Some(balance) = unit.lock(id).await? else {
                return Err(abort(unit, LedgerError::WalletNotFound(id)).await);
            };

            let wallet = Wallet::new(id, balance);
            let Some(updated) = wallet.debited(amount) else {
                let err = LedgerError::InsufficientFunds {
                    wallet: id,
                    balance,
                    required: amount,
                };
                return Err(abort(unit, err).await);
            };

            unit.update(id, updated).await?;
            unit.commit().await?;

            tracing::debug!(wallet = %id, amount, balance = updated, "withdrawal committed");
            Ok(Wallet::new(id, updated))
        })
        .await
    }

    // ========================
    // Queries
    // ========================

    /// Get the last committed balance of a wallet. Takes no lock.
    pub async fn get_balance(&self, ctx: &OpContext, id: WalletId) -> Result<Cents, LedgerError> {
        Ok(self.get_wallet(ctx, id).await?.balance)
    }

    pub async fn get_wallet(&self, ctx: &OpContext, id: WalletId) -> Result<Wallet, LedgerError> {
        self.bounded(ctx, "get_wallet", async {
            self.store
                .balance(id)
                .await?
                .map(|balance| Wallet::new(id, balance))
                .ok_or(LedgerError::WalletNotFound(id))
        })
        .await
    }

    /// Run `op` under the context deadline. On expiry the future is dropped,
    /// which rolls back any open unit of work and releases its locks.
    async fn bounded<T, F>(&self, ctx: &OpContext, op: &'static str, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        let deadline = ctx.effective_deadline(self.config.op_timeout);
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, "operation deadline exceeded, rolled back");
                Err(LedgerError::StorageUnavailable(format!(
                    "{} deadline exceeded",
                    op
                )))
            }
        }
    }
}

fn require_positive(amount: Cents) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Write `wallet.balance + amount` back to the locked row and commit.
async fn credit<U: UnitOfWork>(
    mut unit: U,
    wallet: Wallet,
    amount: Cents,
) -> Result<Wallet, LedgerError> {
    let Some(updated) = wallet.credited(amount) else {
        let err = LedgerError::InvalidAmount("Deposit would overflow the balance".to_string());
        return Err(abort(unit, err).await);
    };

    unit.update(wallet.id, updated).await?;
    unit.commit().await?;

    tracing::debug!(wallet = %wallet.id, amount, balance = updated, "deposit committed");
    Ok(Wallet::new(wallet.id, updated))
}

/// Roll back without writing and hand back the business error that caused it.
async fn abort<U: UnitOfWork>(unit: U, err: LedgerError) -> LedgerError {
    if let Err(rollback_err) = unit.rollback().await {
        tracing::warn!(error = %rollback_err, "rollback failed after rejected operation");
    }
    err
}
