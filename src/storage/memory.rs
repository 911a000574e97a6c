use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::domain::{Cents, WalletId};

use super::{StoreError, StoreResult, UnitOfWork, WalletStore};

/// Sentinel for a row slot whose wallet has not been committed yet.
const ABSENT: Cents = -1;

struct Row {
    lock: Arc<RowLock<()>>,
    committed: AtomicI64,
}

impl Row {
    fn committed(&self) -> Option<Cents> {
        match self.committed.load(Ordering::Acquire) {
            ABSENT => None,
            balance => Some(balance),
        }
    }
}

/// In-process wallet store with one async lock per row.
///
/// Committed balances live in atomics so unlocked reads never wait on a
/// writer. Cloning shares the same table.
#[derive(Clone, Default)]
pub struct MemoryWalletStore {
    rows: Arc<Mutex<HashMap<WalletId, Arc<Row>>>>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, id: WalletId) -> StoreResult<Arc<Row>> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("Wallet table mutex poisoned"))?;
        let row = rows.entry(id).or_insert_with(|| {
            Arc::new(Row {
                lock: Arc::new(RowLock::new(())),
                committed: AtomicI64::new(ABSENT),
            })
        });
        Ok(Arc::clone(row))
    }

    fn existing_row(&self, id: WalletId) -> StoreResult<Option<Arc<Row>>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("Wallet table mutex poisoned"))?;
        Ok(rows.get(&id).cloned())
    }
}

impl WalletStore for MemoryWalletStore {
    type Unit = MemoryUnitOfWork;

    async fn begin(&self) -> StoreResult<MemoryUnitOfWork> {
        Ok(MemoryUnitOfWork {
            store: self.clone(),
            held: HashMap::new(),
            staged: HashMap::new(),
        })
    }

    async fn balance(&self, id: WalletId) -> StoreResult<Option<Cents>> {
        Ok(self.existing_row(id)?.and_then(|row| row.committed()))
    }
}

pub struct MemoryUnitOfWork {
    store: MemoryWalletStore,
    held: HashMap<WalletId, (Arc<Row>, OwnedMutexGuard<()>)>,
    staged: HashMap<WalletId, Cents>,
}

impl MemoryUnitOfWork {
    /// Current view of a locked row: staged write first, then committed value.
    fn current(&self, id: WalletId) -> Option<Cents> {
        if let Some(balance) = self.staged.get(&id) {
            return Some(*balance);
        }
        self.held.get(&id).and_then(|(row, _)| row.committed())
    }

    /// Lock the row for `id`. With `create` unset, an id with no slot is
    /// reported missing without allocating one.
    async fn acquire(&mut self, id: WalletId, create: bool) -> StoreResult<Option<Cents>> {
        if !self.held.contains_key(&id) {
            let row = if create {
                self.store.row(id)?
            } else {
                match self.store.existing_row(id)? {
                    Some(row) => row,
                    None => return Ok(None),
                }
            };
            let guard = Arc::clone(&row.lock).lock_owned().await;
            self.held.insert(id, (row, guard));
        }
        Ok(self.current(id))
    }
}

impl Drop for MemoryUnitOfWork {
    /// Release slots this unit allocated for wallets that never got committed.
    /// A slot is only dropped when no other unit holds or waits on it; slot
    /// handles are only cloned under the table mutex.
    fn drop(&mut self) {
        let Ok(mut rows) = self.store.rows.lock() else {
            return;
        };
        for (id, (row, _)) in &self.held {
            if row.committed().is_none() && Arc::strong_count(row) == 2 {
                rows.remove(id);
            }
        }
    }
}

impl UnitOfWork for MemoryUnitOfWork {
    async fn lock(&mut self, id: WalletId) -> StoreResult<Option<Cents>> {
        self.acquire(id, false).await
    }

    async fn insert(&mut self, id: WalletId, balance: Cents) -> StoreResult<()> {
        if self.acquire(id, true).await?.is_some() {
            return Err(StoreError::Conflict(id));
        }
        self.staged.insert(id, balance);
        Ok(())
    }

    async fn insert_missing(&mut self, id: WalletId, balance: Cents) -> StoreResult<bool> {
        if self.acquire(id, true).await?.is_some() {
            return Ok(false);
        }
        self.staged.insert(id, balance);
        Ok(true)
    }

    async fn update(&mut self, id: WalletId, balance: Cents) -> StoreResult<()> {
        if self.current(id).is_none() {
            return Err(anyhow!("Update of unlocked or missing wallet {}", id).into());
        }
        if balance < 0 {
            return Err(anyhow!("Balance check violated for wallet {}", id).into());
        }
        self.staged.insert(id, balance);
        Ok(())
    }

    async fn commit(mut self) -> StoreResult<()> {
        for (id, balance) in self.staged.drain() {
            if let Some((row, _)) = self.held.get(&id) {
                row.committed.store(balance, Ordering::Release);
            }
        }
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryWalletStore::new();
        let id = Uuid::new_v4();

        let mut unit = store.begin().await.unwrap();
        unit.insert(id, 100).await.unwrap();
        assert_eq!(store.balance(id).await.unwrap(), None);
        unit.commit().await.unwrap();
        assert_eq!(store.balance(id).await.unwrap(), Some(100));

        let mut unit = store.begin().await.unwrap();
        assert_eq!(unit.lock(id).await.unwrap(), Some(100));
        unit.update(id, 40).await.unwrap();
        drop(unit);
        assert_eq!(store.balance(id).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_insert_conflict() {
        let store = MemoryWalletStore::new();
        let id = Uuid::new_v4();

        let mut unit = store.begin().await.unwrap();
        unit.insert(id, 0).await.unwrap();
        unit.commit().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        assert!(matches!(
            unit.insert(id, 5).await,
            Err(StoreError::Conflict(conflict)) if conflict == id
        ));
        unit.rollback().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        assert!(!unit.insert_missing(id, 5).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_blocks_same_row_only() {
        let store = MemoryWalletStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut holder = store.begin().await.unwrap();
        holder.insert(a, 10).await.unwrap();

        let mut other = store.begin().await.unwrap();
        tokio::time::timeout(Duration::from_millis(200), other.insert(b, 20))
            .await
            .expect("different row must not block")
            .unwrap();

        let mut waiter = store.begin().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), waiter.lock(a)).await;
        assert!(blocked.is_err(), "same row must block while held");

        holder.commit().await.unwrap();
        let mut waiter = store.begin().await.unwrap();
        assert_eq!(waiter.lock(a).await.unwrap(), Some(10));
    }

    fn slots(store: &MemoryWalletStore) -> usize {
        store.rows.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_uncommitted_ids_leave_no_slot() {
        let store = MemoryWalletStore::new();
        let id = Uuid::new_v4();

        let mut unit = store.begin().await.unwrap();
        assert_eq!(unit.lock(id).await.unwrap(), None);
        unit.rollback().await.unwrap();
        assert_eq!(slots(&store), 0);

        let mut unit = store.begin().await.unwrap();
        unit.insert(id, 100).await.unwrap();
        unit.rollback().await.unwrap();
        assert_eq!(slots(&store), 0);

        let mut unit = store.begin().await.unwrap();
        assert!(unit.insert_missing(id, 100).await.unwrap());
        drop(unit);
        assert_eq!(slots(&store), 0);
        assert_eq!(store.balance(id).await.unwrap(), None);

        let mut unit = store.begin().await.unwrap();
        unit.insert(id, 100).await.unwrap();
        unit.commit().await.unwrap();
        assert_eq!(slots(&store), 1);
        assert_eq!(store.balance(id).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_slot_kept_while_another_unit_waits() {
        let store = MemoryWalletStore::new();
        let id = Uuid::new_v4();

        let mut first = store.begin().await.unwrap();
        first.insert(id, 10).await.unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut unit = waiter_store.begin().await.unwrap();
            let created = unit.insert_missing(id, 20).await.unwrap();
            unit.commit().await.unwrap();
            created
        });

        // Let the waiter queue up on the row lock before the first unit gives up
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.rollback().await.unwrap();

        assert!(waiter.await.unwrap());
        assert_eq!(store.balance(id).await.unwrap(), Some(20));
        assert_eq!(slots(&store), 1);
    }
}
