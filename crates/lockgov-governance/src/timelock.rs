//! Timelock holding queued actions until their eta.
//!
//! Entries are keyed by the action's content hash, which covers the eta:
//! the same action may sit in the queue at different etas, but never twice
//! at the same one. Execution consumes the entry before anything is
//! dispatched, so an action runs at most once.

use std::collections::BTreeMap;

use lockgov_types::{Address, Hash, Timestamp, DAY};
use serde::{Deserialize, Serialize};

use crate::action::ProposalAction;
use crate::error::GovernanceError;
use crate::events::GovernanceEvent;

/// Timelock delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockParams {
    /// Delay applied when the governor queues a proposal
    pub delay: Timestamp,
    pub min_delay: Timestamp,
    pub max_delay: Timestamp,
    /// How long past its eta an entry stays executable
    pub grace_period: Timestamp,
}

impl Default for TimelockParams {
    fn default() -> Self {
        Self {
            delay: 2 * DAY,
            min_delay: 2 * DAY,
            max_delay: 30 * DAY,
            grace_period: 14 * DAY,
        }
    }
}

impl TimelockParams {
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.min_delay > self.max_delay {
            return Err(GovernanceError::InvalidParameter(format!(
                "min delay {} exceeds max delay {}",
                self.min_delay, self.max_delay
            )));
        }
        if self.delay < self.min_delay || self.delay > self.max_delay {
            return Err(GovernanceError::InvalidParameter(format!(
                "delay {} outside [{}, {}]",
                self.delay, self.min_delay, self.max_delay
            )));
        }
        if self.grace_period == 0 {
            return Err(GovernanceError::InvalidParameter(
                "grace period must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A queued action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub action: ProposalAction,
    pub eta: Timestamp,
    pub queued_at: Timestamp,
}

/// Admin-controlled delay queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timelock {
    admin: Address,
    params: TimelockParams,
    queued: BTreeMap<Hash, QueuedAction>,
    #[serde(skip)]
    events: Vec<GovernanceEvent>,
}

impl Timelock {
    pub fn new(admin: Address, params: TimelockParams) -> Result<Self, GovernanceError> {
        if admin.is_zero() {
            return Err(GovernanceError::InvalidParameter(
                "timelock admin is the zero address".to_string(),
            ));
        }
        params.validate()?;
        Ok(Self {
            admin,
            params,
            queued: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    pub fn admin(&self) -> &Address {
        &self.admin
    }

    pub fn params(&self) -> &TimelockParams {
        &self.params
    }

    pub fn delay(&self) -> Timestamp {
        self.params.delay
    }

    pub fn grace_period(&self) -> Timestamp {
        self.params.grace_period
    }

    pub fn is_queued(&self, hash: &Hash) -> bool {
        self.queued.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&QueuedAction> {
        self.queued.get(hash)
    }

    pub fn queued(&self) -> impl Iterator<Item = (&Hash, &QueuedAction)> {
        self.queued.iter()
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Queue `action` for execution at `eta`.
    pub fn queue(
        &mut self,
        caller: &Address,
        action: &ProposalAction,
        eta: Timestamp,
        now: Timestamp,
    ) -> Result<Hash, GovernanceError> {
        self.only_admin(caller)?;

        let earliest = now.saturating_add(self.params.min_delay);
        let latest = now.saturating_add(self.params.max_delay);
        if eta < earliest || eta > latest {
            return Err(GovernanceError::TemporalViolation(format!(
                "eta {} outside [{}, {}]",
                eta, earliest, latest
            )));
        }

        let hash = action.hash(eta);
        if self.queued.contains_key(&hash) {
            return Err(GovernanceError::StateConflict(format!(
                "action already queued at eta {} ({})",
                eta, hash
            )));
        }

        self.queued.insert(
            hash,
            QueuedAction {
                action: action.clone(),
                eta,
                queued_at: now,
            },
        );
        self.events.push(GovernanceEvent::ActionQueued {
            hash,
            target: action.target,
            eta,
        });

        tracing::debug!("Queued action {} for {} at eta {}", hash, action.target, eta);
        Ok(hash)
    }

    /// Consume a due entry.
    ///
    /// The entry is removed before the caller dispatches the action, so a
    /// failing dispatch does not make it executable again.
    pub fn execute(
        &mut self,
        caller: &Address,
        action: &ProposalAction,
        eta: Timestamp,
        now: Timestamp,
    ) -> Result<Hash, GovernanceError> {
        self.only_admin(caller)?;

        let hash = action.hash(eta);
        if !self.queued.contains_key(&hash) {
            return Err(GovernanceError::StateConflict(format!(
                "action {} is not queued",
                hash
            )));
        }
        self.check_due(eta, now)?;

        self.queued.remove(&hash);
        tracing::debug!("Released action {} for execution", hash);
        Ok(hash)
    }

    /// Drop an entry. Dropping an entry that is not queued is not an error.
    pub fn cancel(
        &mut self,
        caller: &Address,
        action: &ProposalAction,
        eta: Timestamp,
    ) -> Result<Hash, GovernanceError> {
        self.only_admin(caller)?;

        let hash = action.hash(eta);
        if self.queued.remove(&hash).is_some() {
            self.events.push(GovernanceEvent::ActionCanceled {
                hash,
                target: action.target,
            });
            tracing::debug!("Canceled queued action {}", hash);
        }
        Ok(hash)
    }

    /// Change the delay applied to newly queued proposals.
    pub fn set_delay(&mut self, caller: &Address, delay: Timestamp) -> Result<(), GovernanceError> {
        self.only_admin(caller)?;
        let params = TimelockParams {
            delay,
            ..self.params
        };
        params.validate()?;
        self.params = params;
        Ok(())
    }

    /// Remove entries whose grace period has run out.
    pub fn prune_stale(&mut self, now: Timestamp) -> Vec<Hash> {
        let grace = self.params.grace_period;
        let stale: Vec<Hash> = self
            .queued
            .iter()
            .filter(|(_, entry)| now > entry.eta.saturating_add(grace))
            .map(|(hash, _)| *hash)
            .collect();

        for hash in &stale {
            self.queued.remove(hash);
            self.events.push(GovernanceEvent::ActionExpired { hash: *hash });
        }
        if !stale.is_empty() {
            tracing::info!("Pruned {} stale timelock entries", stale.len());
        }
        stale
    }

    /// Whether an entry at `eta` may run at `now`.
    pub fn check_due(&self, eta: Timestamp, now: Timestamp) -> Result<(), GovernanceError> {
        if now < eta {
            return Err(GovernanceError::TemporalViolation(format!(
                "eta {} not reached at {}",
                eta, now
            )));
        }
        if now > eta.saturating_add(self.params.grace_period) {
            return Err(GovernanceError::TemporalViolation(format!(
                "grace period after eta {} elapsed at {}",
                eta, now
            )));
        }
        Ok(())
    }

    /// Take the events emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<GovernanceEvent> {
        std::mem::take(&mut self.events)
    }

    fn only_admin(&self, caller: &Address) -> Result<(), GovernanceError> {
        if caller != &self.admin {
            return Err(GovernanceError::Unauthorized(format!(
                "{} is not the timelock admin",
                caller
            )));
        }
        Ok(())
    }
}
