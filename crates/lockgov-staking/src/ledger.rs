//! Time-locked stake ledger.
//!
//! Stakes are kept per owner and per lock bucket: the unlock timestamp
//! quantized down to the bucket calendar. Every change appends a checkpoint
//! so voting power can be read at any past point.
//!
//! Mutations follow a plan/commit pattern: every check and every piece of
//! arithmetic runs against a [`Plan`] overlay first, and only a fully
//! validated plan is written to the checkpoint logs. A failed call leaves the
//! ledger untouched.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use lockgov_types::{Address, Amount, Timestamp, DAY};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{packed_logs, CheckpointLog, StakePoint};
use crate::curve::WeightCurve;
use crate::delegation::DelegationRegistry;
use crate::error::StakingError;
use crate::events::StakingEvent;

/// Weighted voting power. Amounts are 96-bit; weights carry the multiplier on
/// top and need the full `u128`.
pub type VotingPower = u128;

/// Ledger configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingParams {
    /// Origin of the bucket calendar
    pub kickoff: Timestamp,
    /// Bucket width in seconds
    pub bucket_interval: Timestamp,
    /// Weight curve, also bounding the longest lock
    pub curve: WeightCurve,
}

impl Default for StakingParams {
    fn default() -> Self {
        Self {
            kickoff: 0,
            bucket_interval: Self::DEFAULT_BUCKET_INTERVAL,
            curve: WeightCurve::default(),
        }
    }
}

impl StakingParams {
    /// Two weeks.
    pub const DEFAULT_BUCKET_INTERVAL: Timestamp = 14 * DAY;

    pub fn validate(&self) -> Result<(), StakingError> {
        self.curve.validate()?;
        if self.bucket_interval == 0 || self.bucket_interval > self.curve.max_duration {
            return Err(StakingError::InvalidParameter(format!(
                "bucket interval {} must be in 1..={}",
                self.bucket_interval, self.curve.max_duration
            )));
        }
        Ok(())
    }

    /// Round `t` down to the bucket calendar. Anything at or before kickoff
    /// maps to kickoff.
    pub fn quantize(&self, t: Timestamp) -> Timestamp {
        if t <= self.kickoff {
            return self.kickoff;
        }
        let offset = t - self.kickoff;
        self.kickoff + offset - offset % self.bucket_interval
    }
}

/// One non-empty bucket of an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePosition {
    pub bucket: Timestamp,
    pub amount: Amount,
    pub delegate: Address,
}

/// Outcome of a stake or lock extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeReceipt {
    pub owner: Address,
    /// Bucket the stake now sits in
    pub bucket: Timestamp,
    /// Total amount in that bucket after the call
    pub amount: Amount,
}

/// Pending writes of a single ledger call.
#[derive(Debug, Default)]
struct Plan {
    stakes: BTreeMap<(Address, Timestamp), StakePoint>,
    delegated: BTreeMap<(Address, Timestamp), Amount>,
    total: Option<Amount>,
    delegate: Option<Address>,
}

/// Checkpointed stake balances and the voting power they confer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeLedger {
    params: StakingParams,
    /// owner -> bucket -> stake history
    #[serde(with = "packed_logs")]
    stakes: HashMap<Address, BTreeMap<Timestamp, CheckpointLog<StakePoint>>>,
    delegation: DelegationRegistry,
    total: Amount,
    total_log: CheckpointLog<Amount>,
    /// Latest point any call has been made at
    last_point: Timestamp,
    #[serde(skip)]
    events: Vec<StakingEvent>,
}

impl StakeLedger {
    /// Create an empty ledger.
    pub fn new(params: StakingParams) -> Result<Self, StakingError> {
        params.validate()?;
        Ok(Self {
            params,
            stakes: HashMap::new(),
            delegation: DelegationRegistry::new(),
            total: Amount::ZERO,
            total_log: CheckpointLog::new(),
            last_point: 0,
            events: Vec::new(),
        })
    }

    pub fn params(&self) -> &StakingParams {
        &self.params
    }

    pub fn delegation(&self) -> &DelegationRegistry {
        &self.delegation
    }

    pub fn last_point(&self) -> Timestamp {
        self.last_point
    }

    /// Round `t` down to the bucket calendar.
    pub fn quantize(&self, t: Timestamp) -> Timestamp {
        self.params.quantize(t)
    }

    /// Bucket a lock requested until `until` lands in, checked against `now`.
    pub fn lock_bucket(&self, until: Timestamp, now: Timestamp) -> Result<Timestamp, StakingError> {
        let bucket = self.quantize(until);
        if bucket <= now {
            return Err(StakingError::TemporalViolation(format!(
                "lock until {} falls in bucket {}, not after {}",
                until, bucket, now
            )));
        }
        if bucket - now > self.params.curve.max_duration {
            return Err(StakingError::TemporalViolation(format!(
                "lock bucket {} exceeds the maximum duration of {}s",
                bucket, self.params.curve.max_duration
            )));
        }
        Ok(bucket)
    }

    /// Lock `amount` until `until`, attributing it to `delegate`.
    ///
    /// If `delegate` is not the owner's current delegate, all of the owner's
    /// live stake is re-delegated within the same call.
    pub fn stake(
        &mut self,
        owner: Address,
        amount: Amount,
        until: Timestamp,
        delegate: Address,
        now: Timestamp,
    ) -> Result<StakeReceipt, StakingError> {
        if owner.is_zero() || delegate.is_zero() {
            return Err(StakingError::InvalidParameter(
                "owner and delegate must be non-zero".to_string(),
            ));
        }
        if amount.is_zero() {
            return Err(StakingError::InvalidParameter("cannot stake zero".to_string()));
        }
        self.check_clock(now)?;

        let bucket = self.lock_bucket(until, now)?;
        if let Some(latest) = self.latest_live_bucket(&owner, now) {
            if bucket < latest {
                return Err(StakingError::TemporalViolation(format!(
                    "bucket {} is earlier than the current lock at {}",
                    bucket, latest
                )));
            }
        }

        let mut plan = Plan::default();
        let previous = self.delegation.delegate_of(&owner);
        if delegate != previous {
            self.plan_redelegate(&mut plan, &owner, delegate, now)?;
        }
        let staked = self.plan_add(&mut plan, &owner, bucket, amount, delegate)?;
        self.plan_total_add(&mut plan, amount)?;
        self.commit(&owner, plan, now)?;

        if delegate != previous {
            self.events.push(StakingEvent::DelegateChanged {
                owner,
                from: previous,
                to: delegate,
            });
        }
        self.events.push(StakingEvent::StakeChanged {
            owner,
            bucket,
            amount: staked,
        });

        tracing::info!(
            owner = %owner,
            bucket,
            amount = %amount,
            "Staked"
        );
        Ok(StakeReceipt {
            owner,
            bucket,
            amount: staked,
        })
    }

    /// Move the whole stake of `from_bucket` to the bucket of `until` and add
    /// `additional` on top.
    pub fn extend_and_increase(
        &mut self,
        owner: Address,
        from_bucket: Timestamp,
        until: Timestamp,
        additional: Amount,
        now: Timestamp,
    ) -> Result<StakeReceipt, StakingError> {
        self.check_clock(now)?;

        let current = self.latest_stake(&owner, from_bucket);
        if current.amount.is_zero() {
            return Err(StakingError::InvalidParameter(format!(
                "{} has nothing staked in bucket {}",
                owner, from_bucket
            )));
        }
        if from_bucket <= now {
            return Err(StakingError::TemporalViolation(format!(
                "lock in bucket {} has already expired",
                from_bucket
            )));
        }

        let bucket = self.lock_bucket(until, now)?;
        if bucket < from_bucket {
            return Err(StakingError::TemporalViolation(format!(
                "cannot shorten lock from bucket {} to {}",
                from_bucket, bucket
            )));
        }

        let delegate = self.delegation.delegate_of(&owner);
        let mut plan = Plan::default();
        let staked = if bucket == from_bucket {
            self.plan_add(&mut plan, &owner, bucket, additional, delegate)?
        } else {
            let moved = self.plan_remove(&mut plan, &owner, from_bucket)?;
            let moving = moved.amount.checked_add(&additional).ok_or_else(|| {
                StakingError::Overflow(format!("{} + {}", moved.amount, additional))
            })?;
            self.plan_add(&mut plan, &owner, bucket, moving, delegate)?
        };
        if !additional.is_zero() {
            self.plan_total_add(&mut plan, additional)?;
        }
        self.commit(&owner, plan, now)?;

        if bucket != from_bucket {
            self.events.push(StakingEvent::StakeChanged {
                owner,
                bucket: from_bucket,
                amount: Amount::ZERO,
            });
        }
        self.events.push(StakingEvent::StakeChanged {
            owner,
            bucket,
            amount: staked,
        });

        tracing::info!(owner = %owner, from_bucket, bucket, "Lock extended");
        Ok(StakeReceipt {
            owner,
            bucket,
            amount: staked,
        })
    }

    /// Release the stake of an expired bucket.
    pub fn withdraw(
        &mut self,
        owner: Address,
        bucket: Timestamp,
        now: Timestamp,
    ) -> Result<Amount, StakingError> {
        self.check_clock(now)?;

        let current = self.latest_stake(&owner, bucket);
        if current.amount.is_zero() {
            return Err(StakingError::InvalidParameter(format!(
                "{} has nothing staked in bucket {}",
                owner, bucket
            )));
        }
        if now < bucket {
            return Err(StakingError::TemporalViolation(format!(
                "bucket {} is still locked at {}",
                bucket, now
            )));
        }

        let mut plan = Plan::default();
        let released = self.plan_remove(&mut plan, &owner, bucket)?;
        self.plan_total_sub(&mut plan, released.amount)?;
        self.commit(&owner, plan, now)?;

        self.events.push(StakingEvent::Withdrawn {
            owner,
            bucket,
            amount: released.amount,
        });

        tracing::info!(owner = %owner, bucket, amount = %released.amount, "Withdrawn");
        Ok(released.amount)
    }

    /// Attribute `owner`'s live stake to `to` from `now` on.
    ///
    /// Returns the previous delegate, `None` if `to` already was the delegate.
    pub fn delegate(
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
        self.check_clock(now)?;

        let previous = self.delegation.delegate_of(&owner);
        if previous == to {
            return Ok(None);
        }

        let mut plan = Plan::default();
        self.plan_redelegate(&mut plan, &owner, to, now)?;
        self.commit(&owner, plan, now)?;

        self.events.push(StakingEvent::DelegateChanged {
            owner,
            from: previous,
            to,
        });
        Ok(Some(previous))
    }

    /// Voting power attributed to `account` at `point`.
    ///
    /// Sums, over every bucket ending after `point`, the amount delegated to
    /// `account` as of `point` weighted by the bucket's remaining duration.
    pub fn voting_power_at(
        &self,
        account: &Address,
        point: Timestamp,
    ) -> Result<VotingPower, StakingError> {
        let mut power: VotingPower = 0;
        for (bucket, log) in self.delegation.live_buckets(account, point) {
            let amount = log.value_at(point).unwrap_or_default();
            if amount.is_zero() {
                continue;
            }
            let weight = self.params.curve.weight(amount, bucket - point);
            power = power
                .checked_add(weight)
                .ok_or_else(|| StakingError::Overflow(format!("voting power of {}", account)))?;
        }
        Ok(power)
    }

    /// Same as [`StakeLedger::voting_power_at`], recomputed from the raw
    /// stake checkpoints of every owner by linear scan.
    pub fn voting_power_at_linear(
        &self,
        account: &Address,
        point: Timestamp,
    ) -> Result<VotingPower, StakingError> {
        let mut per_bucket: BTreeMap<Timestamp, u128> = BTreeMap::new();
        for buckets in self.stakes.values() {
            for (bucket, log) in buckets.range((Bound::Excluded(point), Bound::Unbounded)) {
                let Some(stake) = log.value_at_linear(point) else {
                    continue;
                };
                if stake.delegate != *account {
                    continue;
                }
                let sum = per_bucket.entry(*bucket).or_default();
                *sum = sum
                    .checked_add(stake.amount.get())
                    .ok_or_else(|| StakingError::Overflow("bucket sum".to_string()))?;
            }
        }

        let mut power: VotingPower = 0;
        for (bucket, sum) in per_bucket {
            let amount = Amount::new(sum)
                .ok_or_else(|| StakingError::Overflow(format!("bucket {} sum {}", bucket, sum)))?;
            power = power
                .checked_add(self.params.curve.weight(amount, bucket - point))
                .ok_or_else(|| StakingError::Overflow(format!("voting power of {}", account)))?;
        }
        Ok(power)
    }

    /// Current amount in `owner`'s `bucket`.
    pub fn amount_of(&self, owner: &Address, bucket: Timestamp) -> Amount {
        self.latest_stake(owner, bucket).amount
    }

    /// Amount in `owner`'s `bucket` at `point`.
    pub fn amount_at(&self, owner: &Address, bucket: Timestamp, point: Timestamp) -> Amount {
        self.checkpoints(owner, bucket)
            .and_then(|log| log.value_at(point))
            .map(|stake| stake.amount)
            .unwrap_or_default()
    }

    /// Non-empty buckets of `owner`, earliest first.
    pub fn positions(&self, owner: &Address) -> Vec<StakePosition> {
        self.stakes
            .get(owner)
            .into_iter()
            .flat_map(|buckets| buckets.iter())
            .filter_map(|(bucket, log)| {
                let latest = log.latest()?;
                (!latest.value.amount.is_zero()).then_some(StakePosition {
                    bucket: *bucket,
                    amount: latest.value.amount,
                    delegate: latest.value.delegate,
                })
            })
            .collect()
    }

    /// Total amount `owner` has locked across all buckets.
    pub fn balance_of(&self, owner: &Address) -> Result<Amount, StakingError> {
        self.positions(owner)
            .into_iter()
            .map(|p| p.amount)
            .sum::<Option<Amount>>()
            .ok_or_else(|| StakingError::Overflow(format!("balance of {}", owner)))
    }

    /// Total amount locked in the ledger.
    pub fn total_staked(&self) -> Amount {
        self.total
    }

    pub fn total_staked_at(&self, point: Timestamp) -> Amount {
        self.total_log.value_at(point).unwrap_or_default()
    }

    pub fn delegate_of(&self, owner: &Address) -> Address {
        self.delegation.delegate_of(owner)
    }

    pub fn delegate_at(&self, owner: &Address, point: Timestamp) -> Address {
        self.delegation.delegate_at(owner, point)
    }

    /// Raw checkpoint log of `owner`'s `bucket`.
    pub fn checkpoints(&self, owner: &Address, bucket: Timestamp) -> Option<&CheckpointLog<StakePoint>> {
        self.stakes.get(owner).and_then(|buckets| buckets.get(&bucket))
    }

    /// Every account that has ever staked.
    pub fn owners(&self) -> impl Iterator<Item = &Address> {
        self.stakes.keys()
    }

    /// Take the events emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<StakingEvent> {
        std::mem::take(&mut self.events)
    }

    fn check_clock(&self, now: Timestamp) -> Result<(), StakingError> {
        if now < self.last_point {
            return Err(StakingError::TemporalViolation(format!(
                "time {} is before the last recorded point {}",
                now, self.last_point
            )));
        }
        Ok(())
    }

    fn latest_stake(&self, owner: &Address, bucket: Timestamp) -> StakePoint {
        self.checkpoints(owner, bucket)
            .and_then(|log| log.latest())
            .map(|c| c.value)
            .unwrap_or(StakePoint {
                amount: Amount::ZERO,
                delegate: self.delegation.delegate_of(owner),
            })
    }

    fn latest_live_bucket(&self, owner: &Address, now: Timestamp) -> Option<Timestamp> {
        self.stakes.get(owner).and_then(|buckets| {
            buckets
                .range((Bound::Excluded(now), Bound::Unbounded))
                .rev()
                .find(|(_, log)| log.latest().map_or(false, |c| !c.value.amount.is_zero()))
                .map(|(bucket, _)| *bucket)
        })
    }

    fn planned_stake(&self, plan: &Plan, owner: &Address, bucket: Timestamp) -> StakePoint {
        plan.stakes
            .get(&(*owner, bucket))
            .copied()
            .unwrap_or_else(|| self.latest_stake(owner, bucket))
    }

    fn plan_credit(
        &self,
        plan: &mut Plan,
        delegatee: Address,
        bucket: Timestamp,
        amount: Amount,
    ) -> Result<(), StakingError> {
        let current = plan
            .delegated
            .get(&(delegatee, bucket))
            .copied()
            .unwrap_or_else(|| self.delegation.delegated(&delegatee, bucket));
        let updated = current.checked_add(&amount).ok_or_else(|| {
            StakingError::Overflow(format!("delegated to {} in bucket {}", delegatee, bucket))
        })?;
        plan.delegated.insert((delegatee, bucket), updated);
        Ok(())
    }

    fn plan_debit(
        &self,
        plan: &mut Plan,
        delegatee: Address,
        bucket: Timestamp,
        amount: Amount,
    ) -> Result<(), StakingError> {
        let current = plan
            .delegated
            .get(&(delegatee, bucket))
            .copied()
            .unwrap_or_else(|| self.delegation.delegated(&delegatee, bucket));
        let updated = current.checked_sub(&amount).ok_or_else(|| {
            StakingError::Underflow(format!(
                "{} delegated to {} in bucket {}, removing {}",
                current, delegatee, bucket, amount
            ))
        })?;
        plan.delegated.insert((delegatee, bucket), updated);
        Ok(())
    }

    /// Add `amount` to `owner`'s `bucket`, attributed to `delegate`.
    fn plan_add(
        &self,
        plan: &mut Plan,
        owner: &Address,
        bucket: Timestamp,
        amount: Amount,
        delegate: Address,
    ) -> Result<Amount, StakingError> {
        let current = self.planned_stake(plan, owner, bucket);
        let staked = current.amount.checked_add(&amount).ok_or_else(|| {
            StakingError::Overflow(format!("{} + {} in bucket {}", current.amount, amount, bucket))
        })?;

        if current.delegate == delegate || current.amount.is_zero() {
            self.plan_credit(plan, delegate, bucket, amount)?;
        } else {
            self.plan_debit(plan, current.delegate, bucket, current.amount)?;
            self.plan_credit(plan, delegate, bucket, staked)?;
        }
        plan.stakes.insert(
            (*owner, bucket),
            StakePoint {
                amount: staked,
                delegate,
            },
        );
        Ok(staked)
    }

    /// Empty `owner`'s `bucket`, returning what it held.
    fn plan_remove(
        &self,
        plan: &mut Plan,
        owner: &Address,
        bucket: Timestamp,
    ) -> Result<StakePoint, StakingError> {
        let current = self.planned_stake(plan, owner, bucket);
        self.plan_debit(plan, current.delegate, bucket, current.amount)?;
        plan.stakes.insert(
            (*owner, bucket),
            StakePoint {
                amount: Amount::ZERO,
                delegate: current.delegate,
            },
        );
        Ok(current)
    }

    /// Re-attribute every live bucket of `owner` to `to`.
    fn plan_redelegate(
        &self,
        plan: &mut Plan,
        owner: &Address,
        to: Address,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        let live: Vec<Timestamp> = self
            .stakes
            .get(owner)
            .map(|buckets| {
                buckets
                    .range((Bound::Excluded(now), Bound::Unbounded))
                    .map(|(bucket, _)| *bucket)
                    .collect()
            })
            .unwrap_or_default();

        for bucket in live {
            let current = self.planned_stake(plan, owner, bucket);
            if current.amount.is_zero() || current.delegate == to {
                continue;
            }
            self.plan_debit(plan, current.delegate, bucket, current.amount)?;
            self.plan_credit(plan, to, bucket, current.amount)?;
            plan.stakes.insert(
                (*owner, bucket),
                StakePoint {
                    amount: current.amount,
                    delegate: to,
                },
            );
        }
        plan.delegate = Some(to);
        Ok(())
    }

    fn plan_total_add(&self, plan: &mut Plan, amount: Amount) -> Result<(), StakingError> {
        let total = plan.total.unwrap_or(self.total);
        let updated = total
            .checked_add(&amount)
            .ok_or_else(|| StakingError::Overflow(format!("total staked {} + {}", total, amount)))?;
        plan.total = Some(updated);
        Ok(())
    }

    fn plan_total_sub(&self, plan: &mut Plan, amount: Amount) -> Result<(), StakingError> {
        let total = plan.total.unwrap_or(self.total);
        let updated = total
            .checked_sub(&amount)
            .ok_or_else(|| StakingError::Underflow(format!("total staked {} - {}", total, amount)))?;
        plan.total = Some(updated);
        Ok(())
    }

    /// Newest point already recorded in any log `plan` writes to.
    fn newest_point(&self, owner: &Address, plan: &Plan) -> Option<Timestamp> {
        let delegate = plan.delegate.and_then(|_| self.delegation.last_change(owner));
        let stakes = plan.stakes.keys().map(|(account, bucket)| {
            self.checkpoints(account, *bucket)
                .and_then(|log| log.latest())
                .map(|c| c.point)
        });
        let delegated = plan
            .delegated
            .keys()
            .map(|(delegatee, bucket)| self.delegation.last_attribution(delegatee, *bucket));
        let total = plan
            .total
            .and_then(|_| self.total_log.latest())
            .map(|c| c.point);

        std::iter::once(delegate)
            .chain(stakes)
            .chain(delegated)
            .chain(std::iter::once(total))
            .flatten()
            .max()
    }

    /// Write a plan. Every log it touches is checked first, so a rejected
    /// plan leaves the ledger as it was.
    fn commit(&mut self, owner: &Address, plan: Plan, now: Timestamp) -> Result<(), StakingError> {
        if let Some(newest) = self.newest_point(owner, &plan).filter(|p| *p > now) {
            return Err(StakingError::TemporalViolation(format!(
                "time {} is before a checkpoint recorded at {}",
                now, newest
            )));
        }

        if let Some(to) = plan.delegate {
            self.delegation.set_delegate(*owner, to, now)?;
        }
        for ((account, bucket), stake) in plan.stakes {
            self.stakes
                .entry(account)
                .or_default()
                .entry(bucket)
                .or_default()
                .write(now, stake)?;
        }
        for ((delegatee, bucket), amount) in plan.delegated {
            self.delegation.write_delegated(delegatee, bucket, now, amount)?;
        }
        if let Some(total) = plan.total {
            self.total_log.write(now, total)?;
            self.total = total;
        }
        self.last_point = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockgov_types::YEAR;
    use proptest::prelude::*;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn ledger() -> StakeLedger {
        StakeLedger::new(StakingParams::default()).unwrap()
    }

    /// Small calendar so random histories cross many buckets.
    fn small_ledger() -> StakeLedger {
        StakeLedger::new(StakingParams {
            kickoff: 0,
            bucket_interval: 10,
            curve: WeightCurve::new(10_000, 30_000, 1_000).unwrap(),
        })
        .unwrap()
    }

    #[test]
    fn test_quantize() {
        let params = StakingParams {
            kickoff: 1_000,
            bucket_interval: 100,
            curve: WeightCurve::default(),
        };
        assert_eq!(params.quantize(0), 1_000);
        assert_eq!(params.quantize(1_000), 1_000);
        assert_eq!(params.quantize(1_099), 1_000);
        assert_eq!(params.quantize(1_100), 1_100);
        assert_eq!(params.quantize(1_250), 1_200);
    }

    #[test]
    fn test_params_validation() {
        let mut params = StakingParams::default();
        assert!(params.validate().is_ok());
        params.bucket_interval = 0;
        assert!(StakeLedger::new(params).is_err());
    }

    #[test]
    fn test_stake_max_duration_power() {
        let mut ledger = ledger();
        let alice = addr(1);
        let receipt = ledger
            .stake(alice, Amount::from_u64(10_000), 3 * YEAR, alice, 0)
            .unwrap();

        assert_eq!(receipt.amount, Amount::from_u64(10_000));
        assert_eq!(receipt.bucket % StakingParams::DEFAULT_BUCKET_INTERVAL, 0);

        let power = ledger.voting_power_at(&alice, 0).unwrap();
        assert!(power >= 29_900 && power <= 30_000, "power {}", power);
        assert_eq!(ledger.total_staked(), Amount::from_u64(10_000));
    }

    #[test]
    fn test_power_decays_and_expires() {
        let mut ledger = ledger();
        let alice = addr(1);
        let receipt = ledger
            .stake(alice, Amount::from_u64(10_000), YEAR, alice, 0)
            .unwrap();

        let early = ledger.voting_power_at(&alice, 0).unwrap();
        let late = ledger.voting_power_at(&alice, receipt.bucket / 2).unwrap();
        assert!(early > late);
        assert_eq!(ledger.voting_power_at(&alice, receipt.bucket).unwrap(), 0);
    }

    #[test]
    fn test_stake_rejects_bad_buckets() {
        let mut ledger = ledger();
        let alice = addr(1);
        let now = 100 * DAY;

        // Quantizes to a bucket at or before now
        let err = ledger
            .stake(alice, Amount::ONE, now + DAY, alice, now)
            .unwrap_err();
        assert!(matches!(err, StakingError::TemporalViolation(_)));

        let err = ledger
            .stake(alice, Amount::ONE, now + 4 * YEAR, alice, now)
            .unwrap_err();
        assert!(matches!(err, StakingError::TemporalViolation(_)));

        let err = ledger
            .stake(alice, Amount::ZERO, now + YEAR, alice, now)
            .unwrap_err();
        assert!(matches!(err, StakingError::InvalidParameter(_)));

        let err = ledger
            .stake(Address::ZERO, Amount::ONE, now + YEAR, alice, now)
            .unwrap_err();
        assert!(matches!(err, StakingError::InvalidParameter(_)));
    }

    #[test]
    fn test_stake_cannot_shorten_lock() {
        let mut ledger = ledger();
        let alice = addr(1);
        ledger.stake(alice, Amount::ONE, 2 * YEAR, alice, 0).unwrap();

        let before = ledger.clone();
        let err = ledger.stake(alice, Amount::ONE, YEAR, alice, 0).unwrap_err();
        assert!(matches!(err, StakingError::TemporalViolation(_)));
        assert_eq!(ledger, before);

        // Same or later bucket is fine
        ledger.stake(alice, Amount::ONE, 2 * YEAR, alice, 0).unwrap();
        ledger.stake(alice, Amount::ONE, 3 * YEAR, alice, 0).unwrap();
        assert_eq!(ledger.positions(&alice).len(), 2);
    }

    #[test]
    fn test_stake_overflow_is_atomic() {
        let mut ledger = ledger();
        let alice = addr(1);
        let almost = Amount::new(Amount::MAX.get() - 1).unwrap();

        ledger.stake(alice, almost, YEAR, alice, 0).unwrap();
        let before = ledger.clone();

        let err = ledger
            .stake(alice, Amount::from_u64(2), YEAR, alice, 0)
            .unwrap_err();
        assert!(matches!(err, StakingError::Overflow(_)));
        assert_eq!(ledger, before);

        ledger.stake(alice, Amount::ONE, YEAR, alice, 0).unwrap();
        assert_eq!(ledger.total_staked(), Amount::MAX);
    }

    #[test]
    fn test_withdraw() {
        let mut ledger = ledger();
        let alice = addr(1);
        let receipt = ledger
            .stake(alice, Amount::from_u64(500), YEAR, alice, 0)
            .unwrap();

        let err = ledger.withdraw(alice, receipt.bucket, receipt.bucket - 1).unwrap_err();
        assert!(matches!(err, StakingError::TemporalViolation(_)));

        let released = ledger.withdraw(alice, receipt.bucket, receipt.bucket).unwrap();
        assert_eq!(released, Amount::from_u64(500));
        assert!(ledger.total_staked().is_zero());
        assert!(ledger.positions(&alice).is_empty());

        // History survives the withdrawal
        assert_eq!(ledger.amount_at(&alice, receipt.bucket, 0), Amount::from_u64(500));
        assert_eq!(ledger.total_staked_at(0), Amount::from_u64(500));

        let err = ledger.withdraw(alice, receipt.bucket, receipt.bucket).unwrap_err();
        assert!(matches!(err, StakingError::InvalidParameter(_)));
    }

    #[test]
    fn test_delegate_moves_live_power() {
        let mut ledger = ledger();
        let (alice, bob) = (addr(1), addr(2));
        ledger.stake(alice, Amount::from_u64(1_000), YEAR, alice, 0).unwrap();

        let power = ledger.voting_power_at(&alice, 10).unwrap();
        assert_eq!(ledger.delegate(alice, bob, 10).unwrap(), Some(alice));

        assert_eq!(ledger.voting_power_at(&alice, 10).unwrap(), 0);
        assert_eq!(ledger.voting_power_at(&bob, 10).unwrap(), power);
        // History is not rewritten
        assert!(ledger.voting_power_at(&alice, 9).unwrap() > 0);
        assert_eq!(ledger.voting_power_at(&bob, 9).unwrap(), 0);
        assert_eq!(ledger.delegate_at(&alice, 9), alice);
        assert_eq!(ledger.delegate_at(&alice, 10), bob);

        // New stake follows the delegate
        ledger.stake(alice, Amount::from_u64(1_000), YEAR, bob, 20).unwrap();
        assert_eq!(ledger.voting_power_at(&alice, 20).unwrap(), 0);
        assert_eq!(ledger.delegate(alice, bob, 20).unwrap(), None);
    }

    #[test]
    fn test_stake_with_new_delegate_redelegates() {
        let mut ledger = ledger();
        let (alice, bob) = (addr(1), addr(2));
        ledger.stake(alice, Amount::from_u64(1_000), YEAR, alice, 0).unwrap();
        ledger.stake(alice, Amount::from_u64(1_000), 2 * YEAR, bob, 5).unwrap();

        assert_eq!(ledger.voting_power_at(&alice, 5).unwrap(), 0);
        assert_eq!(
            ledger.voting_power_at(&bob, 5).unwrap(),
            ledger.voting_power_at_linear(&bob, 5).unwrap()
        );
        let events = ledger.drain_events();
        assert!(events.contains(&StakingEvent::DelegateChanged {
            owner: alice,
            from: alice,
            to: bob
        }));
    }

    #[test]
    fn test_extend_and_increase() {
        let mut ledger = ledger();
        let alice = addr(1);
        let first = ledger.stake(alice, Amount::from_u64(100), YEAR, alice, 0).unwrap();

        let moved = ledger
            .extend_and_increase(alice, first.bucket, 2 * YEAR, Amount::from_u64(50), 10)
            .unwrap();
        assert!(moved.bucket > first.bucket);
        assert_eq!(moved.amount, Amount::from_u64(150));
        assert!(ledger.amount_of(&alice, first.bucket).is_zero());
        assert_eq!(ledger.total_staked(), Amount::from_u64(150));
        assert_eq!(ledger.balance_of(&alice).unwrap(), Amount::from_u64(150));

        let err = ledger
            .extend_and_increase(alice, moved.bucket, YEAR, Amount::ZERO, 20)
            .unwrap_err();
        assert!(matches!(err, StakingError::TemporalViolation(_)));

        let err = ledger
            .extend_and_increase(alice, first.bucket, 2 * YEAR, Amount::ZERO, 20)
            .unwrap_err();
        assert!(matches!(err, StakingError::InvalidParameter(_)));
    }

    #[test]
    fn test_clock_cannot_go_back() {
        let mut ledger = ledger();
        let alice = addr(1);
        ledger.stake(alice, Amount::ONE, YEAR, alice, 1_000).unwrap();
        ledger.drain_events();
        let before = ledger.clone();

        let err = ledger.stake(alice, Amount::ONE, YEAR, alice, 999).unwrap_err();
        assert!(matches!(err, StakingError::TemporalViolation(_)));
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_rejected_plan_writes_nothing() {
        let (alice, bob) = (addr(1), addr(2));
        let mut ledger = ledger();
        ledger.stake(alice, Amount::from_u64(100), YEAR, alice, 1_000).unwrap();
        ledger.drain_events();

        // A restored ledger whose clock lags its own checkpoints
        let mut value = serde_json::to_value(&ledger).unwrap();
        value["last_point"] = serde_json::json!(0);
        let mut ledger: StakeLedger = serde_json::from_value(value).unwrap();
        let before = ledger.clone();

        let err = ledger
            .stake(alice, Amount::from_u64(100), YEAR, bob, 500)
            .unwrap_err();
        assert!(matches!(err, StakingError::TemporalViolation(_)));
        assert_eq!(ledger, before);
        assert_eq!(ledger.delegate_of(&alice), alice);
        assert!(ledger.drain_events().is_empty());
    }

    #[test]
    fn test_ledger_json_persistence() {
        let mut ledger = ledger();
        let (alice, bob) = (addr(1), addr(2));
        ledger.stake(alice, Amount::from_u64(1_000), YEAR, alice, 0).unwrap();
        ledger.delegate(alice, bob, 100).unwrap();
        ledger.drain_events();

        let json = serde_json::to_string(&ledger).unwrap();
        let restored: StakeLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, ledger);
        assert_eq!(
            restored.voting_power_at(&bob, 200).unwrap(),
            ledger.voting_power_at(&bob, 200).unwrap()
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Stake { owner: u8, delegate: u8, amount: u64, lock: u64 },
        Extend { owner: u8, pick: usize, lock: u64, amount: u64 },
        Withdraw { owner: u8, pick: usize },
        Delegate { owner: u8, to: u8 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u8..4, 1u8..4, 1u64..1_000, 1u64..1_000)
                .prop_map(|(owner, delegate, amount, lock)| Op::Stake { owner, delegate, amount, lock }),
            (1u8..4, 0usize..4, 1u64..1_000, 0u64..100)
                .prop_map(|(owner, pick, lock, amount)| Op::Extend { owner, pick, lock, amount }),
            (1u8..4, 0usize..4).prop_map(|(owner, pick)| Op::Withdraw { owner, pick }),
            (1u8..4, 1u8..4).prop_map(|(owner, to)| Op::Delegate { owner, to }),
        ]
    }

    fn apply(ledger: &mut StakeLedger, op: &Op, now: Timestamp) {
        // Rejected operations are part of the history being exercised
        let _ = match *op {
            Op::Stake { owner, delegate, amount, lock } => ledger
                .stake(addr(owner), Amount::from_u64(amount), now + lock, addr(delegate), now)
                .map(|_| ()),
            Op::Extend { owner, pick, lock, amount } => {
                let positions = ledger.positions(&addr(owner));
                match positions.get(pick) {
                    Some(p) => ledger
                        .extend_and_increase(addr(owner), p.bucket, now + lock, Amount::from_u64(amount), now)
                        .map(|_| ()),
                    None => Ok(()),
                }
            }
            Op::Withdraw { owner, pick } => {
                let positions = ledger.positions(&addr(owner));
                match positions.get(pick) {
                    Some(p) => ledger.withdraw(addr(owner), p.bucket, now).map(|_| ()),
                    None => Ok(()),
                }
            }
            Op::Delegate { owner, to } => ledger.delegate(addr(owner), addr(to), now).map(|_| ()),
        };
    }

    proptest! {
        #[test]
        fn prop_quantize_idempotent(kickoff in 0u64..1_000_000, interval in 1u64..100_000, t in any::<u64>()) {
            let params = StakingParams {
                kickoff,
                bucket_interval: interval,
                curve: WeightCurve::default(),
            };
            let q = params.quantize(t);
            prop_assert_eq!(params.quantize(q), q);
            prop_assert!(q <= t.max(kickoff));
        }

        #[test]
        fn prop_power_matches_linear_scan(
            ops in proptest::collection::vec((op_strategy(), 0u64..40), 1..40),
            queries in proptest::collection::vec(0u64..2_000, 1..16),
        ) {
            let mut ledger = small_ledger();
            let mut now = 0;
            for (op, advance) in &ops {
                now += advance;
                apply(&mut ledger, op, now);
            }
            for q in queries {
                for n in 1u8..4 {
                    let account = addr(n);
                    prop_assert_eq!(
                        ledger.voting_power_at(&account, q).unwrap(),
                        ledger.voting_power_at_linear(&account, q).unwrap()
                    );
                }
            }
        }

        #[test]
        fn prop_bucket_amount_non_decreasing(amounts in proptest::collection::vec(1u64..1_000_000, 1..20)) {
            let mut ledger = ledger();
            let alice = addr(1);
            let mut now = 0;
            let mut bucket = 0;
            for amount in amounts {
                bucket = ledger.stake(alice, Amount::from_u64(amount), 2 * YEAR, alice, now).unwrap().bucket;
                now += DAY;
            }
            let log = ledger.checkpoints(&alice, bucket).unwrap();
            for pair in log.entries().windows(2) {
                prop_assert!(pair[0].value.amount <= pair[1].value.amount);
            }
        }
    }
}
