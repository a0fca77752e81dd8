//! Protocol facade.
//!
//! Owns the stake ledger, the governor and the timelock as one state value,
//! plus the token vault and the capability registry. Every mutating call
//! takes the current time, which must not run backwards, and appends the
//! events it caused to the journal.

use std::collections::BTreeMap;

use lockgov_staking::{
    InMemoryVault, StakeLedger, StakeReceipt, StakingError, StakingParams, TokenVault,
    VotingPower,
};
use lockgov_types::{Address, Amount, ErrorKind, Hash, Timestamp};
use serde::{Deserialize, Serialize};

use crate::action::{Command, ProposalAction, ProposalRequest};
use crate::error::GovernanceError;
use crate::events::{GovernanceEvent, JournalEntry, ProtocolEvent};
use crate::governor::{Governor, GovernorParams};
use crate::proposal::{ProposalState, VoteSupport};
use crate::registry::{ActionContext, ActionHandler, ActionOutput, CapabilityRegistry};
use crate::timelock::{Timelock, TimelockParams};

/// Parameters of a fresh protocol instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Address the protocol acts as: governor, timelock admin and the target
    /// of self-configuration actions
    pub address: Address,
    /// Zero for no guardian
    #[serde(default)]
    pub guardian: Address,
    #[serde(default)]
    pub staking: StakingParams,
    #[serde(default)]
    pub governor: GovernorParams,
    #[serde(default)]
    pub timelock: TimelockParams,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            address: Address::derive(b"lockgov/protocol"),
            guardian: Address::ZERO,
            staking: StakingParams::default(),
            governor: GovernorParams::default(),
            timelock: TimelockParams::default(),
        }
    }
}

/// Serializable protocol state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolState {
    pub address: Address,
    pub ledger: StakeLedger,
    pub governor: Governor,
    pub timelock: Timelock,
    /// Active handler version per capability target
    pub capabilities: BTreeMap<Address, u32>,
    /// Latest time a call succeeded at
    pub clock: Timestamp,
    /// Sequence number of the next journal entry
    pub next_seq: u64,
}

/// Result of one dispatched action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutcome {
    Executed(ActionOutput),
    Failed { kind: ErrorKind, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub hash: Hash,
    pub target: Address,
    pub signature: String,
    pub outcome: ActionOutcome,
}

impl ActionReceipt {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ActionOutcome::Executed(_))
    }
}

/// What executing a proposal did, one receipt per action in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub proposal_id: u64,
    pub eta: Timestamp,
    pub receipts: Vec<ActionReceipt>,
}

impl ExecutionReport {
    pub fn all_succeeded(&self) -> bool {
        self.receipts.iter().all(ActionReceipt::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionReceipt> {
        self.receipts.iter().filter(|r| !r.succeeded())
    }
}

/// Staking and governance behind one entry point.
pub struct Protocol<V: TokenVault = InMemoryVault> {
    state: ProtocolState,
    vault: V,
    registry: CapabilityRegistry,
    /// Events emitted by the protocol itself during the current call
    events: Vec<GovernanceEvent>,
    /// Journal entries not yet taken by [`Protocol::drain_journal`]
    journal: Vec<JournalEntry>,
}

impl<V: TokenVault> Protocol<V> {
    /// Create a protocol with empty state.
    pub fn new(config: ProtocolConfig, vault: V) -> Result<Self, GovernanceError> {
        let ledger = StakeLedger::new(config.staking)?;
        let governor = Governor::new(config.address, config.governor, config.guardian)?;
        let timelock = Timelock::new(config.address, config.timelock)?;
        let state = ProtocolState {
            address: config.address,
            ledger,
            governor,
            timelock,
            capabilities: BTreeMap::new(),
            clock: 0,
            next_seq: 0,
        };
        Ok(Self::from_snapshot(state, vault, CapabilityRegistry::new()))
    }

    /// Resume from persisted state.
    pub fn from_snapshot(state: ProtocolState, vault: V, registry: CapabilityRegistry) -> Self {
        Self {
            state,
            vault,
            registry,
            events: Vec::new(),
            journal: Vec::new(),
        }
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    pub fn address(&self) -> &Address {
        &self.state.address
    }

    pub fn ledger(&self) -> &StakeLedger {
        &self.state.ledger
    }

    pub fn governor(&self) -> &Governor {
        &self.state.governor
    }

    pub fn timelock(&self) -> &Timelock {
        &self.state.timelock
    }

    pub fn vault(&self) -> &V {
        &self.vault
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn clock(&self) -> Timestamp {
        self.state.clock
    }

    /// Active handler version of `target`.
    pub fn active_version(&self, target: &Address) -> Option<u32> {
        self.state.capabilities.get(target).copied()
    }

    /// Register handler code for a capability target. The first version
    /// registered for a target becomes active; later ones need an
    /// `UpgradeCapability` proposal.
    pub fn register_capability(
        &mut self,
        target: Address,
        version: u32,
        handler: Box<dyn ActionHandler>,
    ) -> Result<(), GovernanceError> {
        if target == self.state.address {
            return Err(GovernanceError::InvalidParameter(
                "the protocol address cannot be a capability target".to_string(),
            ));
        }
        self.registry.register(target, version, handler)?;
        self.state.capabilities.entry(target).or_insert(version);
        Ok(())
    }

    pub fn stake(
        &mut self,
        owner: Address,
        amount: Amount,
        until: Timestamp,
        delegate: Address,
        now: Timestamp,
    ) -> Result<StakeReceipt, GovernanceError> {
        self.check_clock(now)?;
        if amount.is_zero() {
            return Err(GovernanceError::InvalidParameter("cannot stake zero".to_string()));
        }

        let result = self.with_custody(
            |ledger| ledger.stake(owner, amount, until, delegate, now),
            |vault, _| vault.deposit(&owner, amount),
        );
        self.settle(now, result)
    }

    pub fn extend_and_increase(
        &mut self,
        owner: Address,
        from_bucket: Timestamp,
        until: Timestamp,
        additional: Amount,
        now: Timestamp,
    ) -> Result<StakeReceipt, GovernanceError> {
        self.check_clock(now)?;

        let result = self.with_custody(
            |ledger| ledger.extend_and_increase(owner, from_bucket, until, additional, now),
            |vault, _| {
                if additional.is_zero() {
                    return Ok(());
                }
                vault.deposit(&owner, additional)
            },
        );
        self.settle(now, result)
    }

    /// Withdraw an expired bucket back to the owner's spendable balance.
    pub fn withdraw(
        &mut self,
        owner: Address,
        bucket: Timestamp,
        now: Timestamp,
    ) -> Result<Amount, GovernanceError> {
        self.check_clock(now)?;

        let result = self.with_custody(
            |ledger| ledger.withdraw(owner, bucket, now),
            |vault, amount| vault.release(&owner, *amount),
        );
        self.settle(now, result)
    }

    pub fn delegate(
        &mut self,
        owner: Address,
        to: Address,
        now: Timestamp,
    ) -> Result<Option<Address>, GovernanceError> {
        self.check_clock(now)?;
        let result = self.state.ledger.delegate(owner, to, now);
        self.settle(now, result.map_err(Into::into))
    }

    /// Create a proposal. Governance commands must target the protocol
    /// itself; everything else must target a registered capability.
    pub fn propose(
        &mut self,
        proposer: Address,
        request: &ProposalRequest,
        now: Timestamp,
    ) -> Result<u64, GovernanceError> {
        self.check_clock(now)?;
        for action in request.actions()? {
            self.check_target(&action)?;
        }
        let result = self
            .state
            .governor
            .propose(&self.state.ledger, proposer, request, now);
        self.settle(now, result)
    }

    pub fn cast_vote(
        &mut self,
        voter: Address,
        id: u64,
        support: VoteSupport,
        now: Timestamp,
    ) -> Result<VotingPower, GovernanceError> {
        self.check_clock(now)?;
        let result = self
            .state
            .governor
            .cast_vote(&self.state.ledger, voter, id, support, now);
        self.settle(now, result)
    }

    pub fn queue(&mut self, id: u64, now: Timestamp) -> Result<Timestamp, GovernanceError> {
        self.check_clock(now)?;
        let result = self.state.governor.queue(&mut self.state.timelock, id, now);
        self.settle(now, result)
    }

    /// Execute a queued proposal.
    ///
    /// The proposal is marked executed and its timelock entries consumed
    /// before any action runs. A failing action shows up as a failed receipt
    /// and does not stop the remaining ones.
    pub fn execute(&mut self, id: u64, now: Timestamp) -> Result<ExecutionReport, GovernanceError> {
        self.check_clock(now)?;
        let released = match self.state.governor.execute(&mut self.state.timelock, id, now) {
            Ok(released) => released,
            Err(e) => return self.settle(now, Err(e)),
        };

        let mut receipts = Vec::with_capacity(released.actions.len());
        for (hash, action) in released.actions {
            let outcome = match self.dispatch(id, &action, now) {
                Ok(output) => ActionOutcome::Executed(output),
                Err(reason) => {
                    tracing::warn!(proposal = id, action = %hash, "Action failed: {}", reason);
                    ActionOutcome::Failed {
                        kind: ErrorKind::ExecutionFailed,
                        reason,
                    }
                }
            };
            let success = matches!(outcome, ActionOutcome::Executed(_));
            self.events.push(GovernanceEvent::ActionExecuted {
                hash,
                target: action.target,
                success,
            });
            receipts.push(ActionReceipt {
                hash,
                target: action.target,
                signature: action.signature,
                outcome,
            });
        }

        self.settle(
            now,
            Ok(ExecutionReport {
                proposal_id: id,
                eta: released.eta,
                receipts,
            }),
        )
    }

    pub fn cancel(&mut self, caller: Address, id: u64, now: Timestamp) -> Result<(), GovernanceError> {
        self.check_clock(now)?;
        let result = self.state.governor.cancel(
            &self.state.ledger,
            &mut self.state.timelock,
            caller,
            id,
            now,
        );
        self.settle(now, result)
    }

    /// Drop timelock entries whose grace period has run out.
    pub fn prune_stale(&mut self, now: Timestamp) -> Result<Vec<Hash>, GovernanceError> {
        self.check_clock(now)?;
        let pruned = self.state.timelock.prune_stale(now);
        self.settle(now, Ok(pruned))
    }

    pub fn proposal_state(&self, id: u64, now: Timestamp) -> Result<ProposalState, GovernanceError> {
        self.state.governor.state(id, now, &self.state.timelock)
    }

    pub fn voting_power_at(
        &self,
        account: &Address,
        point: Timestamp,
    ) -> Result<VotingPower, GovernanceError> {
        Ok(self.state.ledger.voting_power_at(account, point)?)
    }

    /// Take the journal entries recorded since the last drain.
    pub fn drain_journal(&mut self) -> Vec<JournalEntry> {
        std::mem::take(&mut self.journal)
    }

    /// Put back a state and vault captured before the last call, dropping
    /// anything it journaled that was not yet drained.
    pub fn rollback(&mut self, state: ProtocolState, vault: V) {
        self.state = state;
        self.vault = vault;
        self.events.clear();
        self.journal.clear();
    }

    /// Take the state, vault and registry apart.
    pub fn into_parts(self) -> (ProtocolState, V, CapabilityRegistry) {
        (self.state, self.vault, self.registry)
    }

    fn check_clock(&self, now: Timestamp) -> Result<(), GovernanceError> {
        if now < self.state.clock {
            return Err(GovernanceError::TemporalViolation(format!(
                "time {} is before the protocol clock {}",
                now, self.state.clock
            )));
        }
        Ok(())
    }

    fn check_target(&self, action: &ProposalAction) -> Result<(), GovernanceError> {
        let command = action.command()?;
        if action.target == self.state.address {
            if !command.is_governance() {
                return Err(GovernanceError::InvalidParameter(format!(
                    "{} cannot target the protocol",
                    command.signature()
                )));
            }
        } else {
            if command.is_governance() {
                return Err(GovernanceError::InvalidParameter(format!(
                    "{} must target the protocol {}",
                    command.signature(),
                    self.state.address
                )));
            }
            if !self.state.capabilities.contains_key(&action.target) {
                return Err(GovernanceError::InvalidParameter(format!(
                    "{} is not a registered capability",
                    action.target
                )));
            }
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        proposal_id: u64,
        action: &ProposalAction,
        now: Timestamp,
    ) -> Result<ActionOutput, String> {
        let command = action.command().map_err(|e| e.to_string())?;
        if action.target == self.state.address {
            return self.apply_own(&command);
        }

        let version = self
            .state
            .capabilities
            .get(&action.target)
            .copied()
            .ok_or_else(|| format!("{} is not a registered capability", action.target))?;
        let handler = self
            .registry
            .resolve(&action.target, version)
            .ok_or_else(|| format!("no handler for {} version {}", action.target, version))?;

        let mut ctx = ActionContext {
            proposal_id,
            target: action.target,
            value: action.value,
            now,
            vault: &mut self.vault,
        };
        handler.handle(&mut ctx, &command)
    }

    /// Apply a self-configuration command.
    fn apply_own(&mut self, command: &Command) -> Result<ActionOutput, String> {
        let governor = &mut self.state.governor;
        let (name, value) = match command {
            Command::SetVotingDelay { delay } => {
                governor.set_voting_delay(*delay).map_err(|e| e.to_string())?;
                ("voting_delay", delay.to_string())
            }
            Command::SetVotingPeriod { period } => {
                governor.set_voting_period(*period).map_err(|e| e.to_string())?;
                ("voting_period", period.to_string())
            }
            Command::SetProposalThreshold { threshold } => {
                governor
                    .set_proposal_threshold(*threshold)
                    .map_err(|e| e.to_string())?;
                ("proposal_threshold", threshold.to_string())
            }
            Command::SetQuorumVotes { quorum } => {
                governor.set_quorum_votes(*quorum).map_err(|e| e.to_string())?;
                ("quorum_votes", quorum.to_string())
            }
            Command::SetGuardian { guardian } => {
                governor.set_guardian(*guardian);
                ("guardian", guardian.to_string())
            }
            Command::SetTimelockDelay { delay } => {
                self.state
                    .timelock
                    .set_delay(&self.state.address, *delay)
                    .map_err(|e| e.to_string())?;
                ("timelock_delay", delay.to_string())
            }
            Command::UpgradeCapability { target, version } => {
                if !self.registry.has_version(target, *version) {
                    return Err(format!("version {} of {} is not registered", version, target));
                }
                self.state.capabilities.insert(*target, *version);
                self.events.push(GovernanceEvent::CapabilityUpgraded {
                    target: *target,
                    version: *version,
                });
                tracing::info!(target = %target, version, "Capability upgraded");
                return Ok(ActionOutput::CapabilityUpgraded {
                    target: *target,
                    version: *version,
                });
            }
            Command::TreasuryTransfer { .. } => {
                return Err("treasury transfers are not handled by the protocol".to_string())
            }
        };

        self.events.push(GovernanceEvent::ParameterChanged {
            name: name.to_string(),
            value: value.clone(),
        });
        tracing::info!(name, value = %value, "Parameter changed");
        Ok(ActionOutput::ParameterChanged {
            name: name.to_string(),
            value,
        })
    }

    /// Run a ledger call, then move the tokens it accounts for. A vault
    /// failure puts the ledger back as it was before the call.
    fn with_custody<T>(
        &mut self,
        call: impl FnOnce(&mut StakeLedger) -> Result<T, StakingError>,
        custody: impl FnOnce(&mut V, &T) -> Result<(), StakingError>,
    ) -> Result<T, GovernanceError> {
        let before = self.state.ledger.clone();
        let value = call(&mut self.state.ledger)?;
        if let Err(e) = custody(&mut self.vault, &value) {
            self.state.ledger = before;
            return Err(e.into());
        }
        Ok(value)
    }

    /// Advance the clock on success and journal whatever the call emitted.
    fn settle<T>(
        &mut self,
        now: Timestamp,
        result: Result<T, GovernanceError>,
    ) -> Result<T, GovernanceError> {
        if result.is_ok() {
            self.state.clock = now;
        }

        let staking = self.state.ledger.drain_events().into_iter().map(ProtocolEvent::from);
        let timelock = self.state.timelock.drain_events();
        let governor = self.state.governor.drain_events();
        let own = std::mem::take(&mut self.events);
        let events: Vec<ProtocolEvent> = staking
            .chain(
                timelock
                    .into_iter()
                    .chain(governor)
                    .chain(own)
                    .map(ProtocolEvent::from),
            )
            .collect();

        for event in events {
            self.journal.push(JournalEntry {
                seq: self.state.next_seq,
                at: now,
                event,
            });
            self.state.next_seq += 1;
        }
        result
    }
}
