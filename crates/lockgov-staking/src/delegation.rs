//! Delegation registry.
//!
//! Every owner attributes its stake to exactly one delegate (itself unless
//! told otherwise). The registry keeps the current pointer, its checkpointed
//! history, and the per-bucket amounts attributed to each delegatee. Moving
//! amounts between delegatees is driven by the ledger, which knows the
//! owner's live buckets.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use lockgov_types::{Address, Amount, Timestamp};
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointLog;
use crate::error::StakingError;

/// Owner -> delegate pointers and the amounts they aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRegistry {
    /// Current delegate, absent for self-delegation
    current: HashMap<Address, Address>,
    /// Delegate history per owner
    history: HashMap<Address, CheckpointLog<Address>>,
    /// delegatee -> bucket -> attributed amount
    delegated: HashMap<Address, BTreeMap<Timestamp, CheckpointLog<Amount>>>,
}

impl DelegationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current delegate of `owner`.
    pub fn delegate_of(&self, owner: &Address) -> Address {
        self.current.get(owner).copied().unwrap_or(*owner)
    }

    /// Delegate of `owner` in effect at `point`.
    pub fn delegate_at(&self, owner: &Address, point: Timestamp) -> Address {
        self.history
            .get(owner)
            .and_then(|log| log.value_at(point))
            .unwrap_or(*owner)
    }

    /// Point the delegate pointer of `owner` to `to` as of `now`.
    ///
    /// Returns the previous delegate, or `None` when `to` already is the
    /// delegate. Only the pointer moves; attributed amounts are rewritten by
    /// the caller through [`DelegationRegistry::write_delegated`].
    pub fn set_delegate(
        &mut self,
        owner: Address,
        to: Address,
        now: Timestamp,
    ) -> Result<Option<Address>, StakingError> {
        if owner.is_zero() || to.is_zero() {
            return Err(StakingError::InvalidParameter(
                "delegation to or from the zero address".to_string(),
            ));
        }

        let previous = self.delegate_of(&owner);
        if previous == to {
            return Ok(None);
        }

        self.history.entry(owner).or_default().write(now, to)?;
        if to == owner {
            self.current.remove(&owner);
        } else {
            self.current.insert(owner, to);
        }

        tracing::debug!("Delegate of {} changed from {} to {}", owner, previous, to);
        Ok(Some(previous))
    }

    /// Amount attributed to `delegatee` in `bucket`, as currently recorded.
    pub fn delegated(&self, delegatee: &Address, bucket: Timestamp) -> Amount {
        self.delegated
            .get(delegatee)
            .and_then(|buckets| buckets.get(&bucket))
            .and_then(|log| log.latest())
            .map(|c| c.value)
            .unwrap_or_default()
    }

    /// Amount attributed to `delegatee` in `bucket` at `point`.
    pub fn delegated_at(&self, delegatee: &Address, bucket: Timestamp, point: Timestamp) -> Amount {
        self.delegated
            .get(delegatee)
            .and_then(|buckets| buckets.get(&bucket))
            .and_then(|log| log.value_at(point))
            .unwrap_or_default()
    }

    /// Newest point the delegate pointer of `owner` was written at.
    pub(crate) fn last_change(&self, owner: &Address) -> Option<Timestamp> {
        self.history.get(owner).and_then(|log| log.latest()).map(|c| c.point)
    }

    /// Newest point the amount of `delegatee` in `bucket` was written at.
    pub(crate) fn last_attribution(&self, delegatee: &Address, bucket: Timestamp) -> Option<Timestamp> {
        self.delegated
            .get(delegatee)
            .and_then(|buckets| buckets.get(&bucket))
            .and_then(|log| log.latest())
            .map(|c| c.point)
    }

    /// Buckets of `delegatee` that end strictly after `point`, in order.
    pub fn live_buckets(
        &self,
        delegatee: &Address,
        point: Timestamp,
    ) -> impl Iterator<Item = (&Timestamp, &CheckpointLog<Amount>)> + '_ {
        self.delegated
            .get(delegatee)
            .into_iter()
            .flat_map(move |buckets| buckets.range((Bound::Excluded(point), Bound::Unbounded)))
    }

    /// Record the amount attributed to `delegatee` in `bucket` as of `now`.
    pub fn write_delegated(
        &mut self,
        delegatee: Address,
        bucket: Timestamp,
        now: Timestamp,
        amount: Amount,
    ) -> Result<(), StakingError> {
        self.delegated
            .entry(delegatee)
            .or_default()
            .entry(bucket)
            .or_default()
            .write(now, amount)
    }
}
