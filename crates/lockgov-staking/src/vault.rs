//! Token custody seam.
//!
//! The ledger only accounts for locked amounts. Moving the underlying tokens
//! is the vault's job: deposits are taken before a stake commits, releases
//! happen when an expired bucket is withdrawn.

use std::collections::HashMap;

use lockgov_types::{Address, Amount};
use serde::{Deserialize, Serialize};

use crate::error::StakingError;

/// Custody of the staked token.
pub trait TokenVault {
    /// Spendable (unlocked) balance of `account`.
    fn balance_of(&self, account: &Address) -> Amount;

    /// Total amount held in custody on behalf of stakers.
    fn held(&self) -> Amount;

    /// Move `amount` from `owner`'s balance into custody.
    fn deposit(&mut self, owner: &Address, amount: Amount) -> Result<(), StakingError>;

    /// Move `amount` out of custody back to `owner`.
    fn release(&mut self, owner: &Address, amount: Amount) -> Result<(), StakingError>;

    /// Move spendable balance between accounts.
    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), StakingError>;
}

/// Balance-map vault used by the node and in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryVault {
    balances: HashMap<Address, Amount>,
    held: Amount,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` to `account` out of thin air (genesis allocations).
    pub fn mint(&mut self, account: Address, amount: Amount) -> Result<(), StakingError> {
        let balance = self.balance_of(&account);
        let updated = balance.try_add(&amount)?;
        self.balances.insert(account, updated);
        Ok(())
    }

    fn debit(&mut self, account: &Address, amount: Amount) -> Result<(), StakingError> {
        let balance = self.balance_of(account);
        let updated = balance.checked_sub(&amount).ok_or_else(|| {
            StakingError::Vault(format!(
                "insufficient balance for {}: have {}, need {}",
                account, balance, amount
            ))
        })?;
        self.balances.insert(*account, updated);
        Ok(())
    }

    fn credit(&mut self, account: &Address, amount: Amount) -> Result<(), StakingError> {
        let updated = self.balance_of(account).try_add(&amount)?;
        self.balances.insert(*account, updated);
        Ok(())
    }
}

impl TokenVault for InMemoryVault {
    fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or_default()
    }

    fn held(&self) -> Amount {
        self.held
    }

    fn deposit(&mut self, owner: &Address, amount: Amount) -> Result<(), StakingError> {
        let held = self.held.try_add(&amount)?;
        self.debit(owner, amount)?;
        self.held = held;
        Ok(())
    }

    fn release(&mut self, owner: &Address, amount: Amount) -> Result<(), StakingError> {
        let held = self.held.checked_sub(&amount).ok_or_else(|| {
            StakingError::Vault(format!("release of {} exceeds custody {}", amount, self.held))
        })?;
        self.credit(owner, amount)?;
        self.held = held;
        Ok(())
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), StakingError> {
        if from == to {
            return Ok(());
        }
        // Check the credit side first so a failure leaves both balances intact
        self.balance_of(to).try_add(&amount)?;
        self.debit(from, amount)?;
        self.credit(to, amount)
    }
}
