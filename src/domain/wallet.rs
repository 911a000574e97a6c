use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type WalletId = Uuid;

/// A wallet and its current balance in minor units.
///
/// Balances are never negative; the store enforces this with a check
/// constraint and the ledger refuses any withdrawal that would break it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub balance: Cents,
}

impl Wallet {
    pub fn new(id: WalletId, balance: Cents) -> Self {
        Self { id, balance }
    }

    pub fn can_cover(&self, amount: Cents) -> bool {
        self.balance >= amount
    }

    /// Balance after adding `amount`, or `None` on overflow.
    pub fn credited(&self, amount: Cents) -> Option<Cents> {
        self.balance.checked_add(amount)
    }

    /// Balance after removing `amount`, or `None` if it would go negative.
    pub fn debited(&self, amount: Cents) -> Option<Cents> {
        if self.can_cover(amount) {
            Some(self.balance - amount)
        } else {
            None
        }
    }
}

/// Parse a wallet identifier from its textual form.
pub fn parse_wallet_id(input: &str) -> Option<WalletId> {
    Uuid::parse_str(input).ok()
}
