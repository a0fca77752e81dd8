//! Governor state machine.
//!
//! Owns the proposal table. Voting power comes from the stake ledger, queued
//! actions go to the timelock; both are passed in by the caller so the
//! governor never holds references to the other services.

use std::collections::{BTreeMap, HashMap, HashSet};

use lockgov_staking::{StakeLedger, VotingPower};
use lockgov_types::{Address, Hash, Timestamp, DAY};
use serde::{Deserialize, Serialize};

use crate::action::{ProposalAction, ProposalRequest};
use crate::error::GovernanceError;
use crate::events::GovernanceEvent;
use crate::proposal::{Proposal, ProposalState, VoteSupport};
use crate::timelock::Timelock;

/// Governor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorParams {
    /// Time between proposal creation and the start of voting
    pub voting_delay: Timestamp,
    /// Length of the voting window
    pub voting_period: Timestamp,
    /// Voting power needed to propose
    #[serde(with = "power_string")]
    pub proposal_threshold: VotingPower,
    /// Minimum `for` votes for a proposal to pass
    #[serde(with = "power_string")]
    pub quorum_votes: VotingPower,
    /// Maximum number of actions per proposal
    pub max_actions: usize,
}

impl Default for GovernorParams {
    fn default() -> Self {
        Self {
            voting_delay: DAY,
            voting_period: 3 * DAY,
            proposal_threshold: 1_000,
            quorum_votes: 20_000,
            max_actions: 10,
        }
    }
}

impl GovernorParams {
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.voting_period == 0 {
            return Err(GovernanceError::InvalidParameter(
                "voting period must be positive".to_string(),
            ));
        }
        if self.max_actions == 0 {
            return Err(GovernanceError::InvalidParameter(
                "max actions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Actions released from the timelock for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedActions {
    pub eta: Timestamp,
    pub actions: Vec<(Hash, ProposalAction)>,
}

/// Proposal lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Governor {
    /// Address the governor acts as; admin of the timelock
    address: Address,
    params: GovernorParams,
    /// Zero when no guardian is set
    guardian: Address,
    proposals: BTreeMap<u64, Proposal>,
    latest_by_proposer: HashMap<Address, u64>,
    next_id: u64,
    #[serde(skip)]
    events: Vec<GovernanceEvent>,
}

impl Governor {
    pub fn new(
        address: Address,
        params: GovernorParams,
        guardian: Address,
    ) -> Result<Self, GovernanceError> {
        if address.is_zero() {
            return Err(GovernanceError::InvalidParameter(
                "governor address is the zero address".to_string(),
            ));
        }
        params.validate()?;
        Ok(Self {
            address,
            params,
            guardian,
            proposals: BTreeMap::new(),
            latest_by_proposer: HashMap::new(),
            next_id: 1,
            events: Vec::new(),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn params(&self) -> &GovernorParams {
        &self.params
    }

    pub fn guardian(&self) -> Option<&Address> {
        (!self.guardian.is_zero()).then_some(&self.guardian)
    }

    pub fn get(&self, id: u64) -> Option<&Proposal> {
        self.proposals.get(&id)
    }

    pub fn proposals(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals.values()
    }

    /// Number of proposals ever created.
    pub fn proposal_count(&self) -> u64 {
        self.next_id - 1
    }

    /// Lifecycle state of proposal `id` at `now`.
    pub fn state(
        &self,
        id: u64,
        now: Timestamp,
        timelock: &Timelock,
    ) -> Result<ProposalState, GovernanceError> {
        Ok(self.proposal(id)?.state(now, timelock.grace_period()))
    }

    /// Create a proposal.
    pub fn propose(
        &mut self,
        ledger: &StakeLedger,
        proposer: Address,
        request: &ProposalRequest,
        now: Timestamp,
    ) -> Result<u64, GovernanceError> {
        let actions = request.actions()?;
        if actions.is_empty() || actions.len() > self.params.max_actions {
            return Err(GovernanceError::InvalidParameter(format!(
                "proposal must carry 1..={} actions, got {}",
                self.params.max_actions,
                actions.len()
            )));
        }
        for action in &actions {
            action.command()?;
        }

        let snapshot = now.saturating_sub(1);
        let power = ledger.voting_power_at(&proposer, snapshot)?;
        if power < self.params.proposal_threshold {
            return Err(GovernanceError::Unauthorized(format!(
                "{} has {} votes, below the proposal threshold {}",
                proposer, power, self.params.proposal_threshold
            )));
        }

        if let Some(latest) = self.latest_by_proposer.get(&proposer) {
            if let Some(previous) = self.proposals.get(latest) {
                if previous.state(now, 0).is_open() {
                    return Err(GovernanceError::StateConflict(format!(
                        "{} already has an open proposal {}",
                        proposer, latest
                    )));
                }
            }
        }

        let start = now
            .checked_add(self.params.voting_delay)
            .ok_or_else(|| GovernanceError::Overflow("voting start".to_string()))?;
        let end = start
            .checked_add(self.params.voting_period)
            .ok_or_else(|| GovernanceError::Overflow("voting end".to_string()))?;

        let id = self.next_id;
        self.next_id += 1;

        self.events.push(GovernanceEvent::ProposalCreated {
            id,
            proposer,
            start,
            end,
            actions: actions.len(),
            description: request.description.clone(),
        });
        self.proposals.insert(
            id,
            Proposal {
                id,
                proposer,
                actions,
                description: request.description.clone(),
                created_at: now,
                snapshot,
                start,
                end,
                quorum_votes: self.params.quorum_votes,
                eta: 0,
                for_votes: 0,
                against_votes: 0,
                abstain_votes: 0,
                receipts: BTreeMap::new(),
                executed: false,
                canceled: false,
            },
        );
        self.latest_by_proposer.insert(proposer, id);

        tracing::info!(id, proposer = %proposer, start, end, "Proposal created");
        Ok(id)
    }

    /// Vote on an active proposal with the power held at its snapshot.
    pub fn cast_vote(
        &mut self,
        ledger: &StakeLedger,
        voter: Address,
        id: u64,
        support: VoteSupport,
        now: Timestamp,
    ) -> Result<VotingPower, GovernanceError> {
        let proposal = self.proposal(id)?;
        match proposal.state(now, 0) {
            ProposalState::Active => {}
            state if state.is_terminal() => {
                return Err(GovernanceError::StateConflict(format!(
                    "proposal {} is {}",
                    id, state
                )))
            }
            state => {
                return Err(GovernanceError::TemporalViolation(format!(
                    "voting on proposal {} is closed ({}), window [{}, {}]",
                    id, state, proposal.start, proposal.end
                )))
            }
        }
        if proposal.has_voted(&voter) {
            return Err(GovernanceError::StateConflict(format!(
                "{} already voted on proposal {}",
                voter, id
            )));
        }

        let votes = ledger.voting_power_at(&voter, proposal.snapshot)?;
        if votes == 0 {
            return Err(GovernanceError::Unauthorized(format!(
                "{} had no voting power at {}",
                voter, proposal.snapshot
            )));
        }

        self.proposal_mut(id)?.record_vote(voter, support, votes)?;
        self.events.push(GovernanceEvent::VoteCast {
            voter,
            id,
            support,
            votes,
        });

        tracing::debug!(id, voter = %voter, ?support, votes, "Vote cast");
        Ok(votes)
    }

    /// Queue the actions of a succeeded proposal, all at `now + delay`.
    ///
    /// Any action that is already queued at that eta, or that appears twice in
    /// the proposal, fails the whole call before anything is queued.
    pub fn queue(
        &mut self,
        timelock: &mut Timelock,
        id: u64,
        now: Timestamp,
    ) -> Result<Timestamp, GovernanceError> {
        let proposal = self.proposal(id)?;
        match proposal.state(now, timelock.grace_period()) {
            ProposalState::Succeeded => {}
            state @ (ProposalState::Pending | ProposalState::Active) => {
                return Err(GovernanceError::TemporalViolation(format!(
                    "proposal {} is still {}",
                    id, state
                )))
            }
            state => {
                return Err(GovernanceError::StateConflict(format!(
                    "proposal {} is {}, only succeeded proposals can be queued",
                    id, state
                )))
            }
        }
        if timelock.admin() != &self.address {
            return Err(GovernanceError::Unauthorized(
                "governor is not the timelock admin".to_string(),
            ));
        }

        let eta = now
            .checked_add(timelock.delay())
            .ok_or_else(|| GovernanceError::Overflow("eta".to_string()))?;

        let mut seen = HashSet::new();
        for action in &proposal.actions {
            let hash = action.hash(eta);
            if !seen.insert(hash) || timelock.is_queued(&hash) {
                return Err(GovernanceError::StateConflict(format!(
                    "action already queued at eta {} ({})",
                    eta, hash
                )));
            }
        }

        let actions = proposal.actions.clone();
        for action in &actions {
            timelock.queue(&self.address, action, eta, now)?;
        }
        self.proposal_mut(id)?.eta = eta;
        self.events.push(GovernanceEvent::ProposalQueued { id, eta });

        tracing::info!(id, eta, "Proposal queued");
        Ok(eta)
    }

    /// Release the actions of a queued proposal from the timelock and mark
    /// it executed. Dispatching them is the caller's job.
    pub fn execute(
        &mut self,
        timelock: &mut Timelock,
        id: u64,
        now: Timestamp,
    ) -> Result<ReleasedActions, GovernanceError> {
        let proposal = self.proposal(id)?;
        match proposal.state(now, timelock.grace_period()) {
            ProposalState::Queued => {}
            ProposalState::Expired => {
                return Err(GovernanceError::TemporalViolation(format!(
                    "proposal {} expired: grace period after eta {} elapsed",
                    id, proposal.eta
                )))
            }
            state @ (ProposalState::Pending | ProposalState::Active) => {
                return Err(GovernanceError::TemporalViolation(format!(
                    "proposal {} is still {}",
                    id, state
                )))
            }
            state => {
                return Err(GovernanceError::StateConflict(format!(
                    "proposal {} is {}, only queued proposals can be executed",
                    id, state
                )))
            }
        }

        let eta = proposal.eta;
        timelock.check_due(eta, now)?;
        for action in &proposal.actions {
            let hash = action.hash(eta);
            if !timelock.is_queued(&hash) {
                return Err(GovernanceError::StateConflict(format!(
                    "action {} of proposal {} is no longer queued",
                    hash, id
                )));
            }
        }

        let actions = proposal.actions.clone();
        let mut released = Vec::with_capacity(actions.len());
        for action in actions {
            let hash = timelock.execute(&self.address, &action, eta, now)?;
            released.push((hash, action));
        }
        self.proposal_mut(id)?.executed = true;
        self.events.push(GovernanceEvent::ProposalExecuted { id });

        tracing::info!(id, actions = released.len(), "Proposal executed");
        Ok(ReleasedActions {
            eta,
            actions: released,
        })
    }

    /// Cancel a proposal that has not been executed.
    ///
    /// Allowed for the proposer, the guardian, or anyone once the proposer's
    /// power has dropped below the proposal threshold. Queued actions are
    /// removed from the timelock.
    pub fn cancel(
        &mut self,
        ledger: &StakeLedger,
        timelock: &mut Timelock,
        caller: Address,
        id: u64,
        now: Timestamp,
    ) -> Result<(), GovernanceError> {
        let proposal = self.proposal(id)?;
        let state = proposal.state(now, timelock.grace_period());
        if state.is_terminal() {
            return Err(GovernanceError::StateConflict(format!(
                "proposal {} is {}",
                id, state
            )));
        }

        let authorized = caller == proposal.proposer
            || self.guardian().map_or(false, |g| *g == caller)
            || ledger.voting_power_at(&proposal.proposer, now.saturating_sub(1))?
                < self.params.proposal_threshold;
        if !authorized {
            return Err(GovernanceError::Unauthorized(format!(
                "{} may not cancel proposal {}",
                caller, id
            )));
        }

        if proposal.eta != 0 {
            let (eta, actions) = (proposal.eta, proposal.actions.clone());
            for action in &actions {
                timelock.cancel(&self.address, action, eta)?;
            }
        }
        self.proposal_mut(id)?.canceled = true;
        self.events.push(GovernanceEvent::ProposalCanceled { id });

        tracing::info!(id, caller = %caller, "Proposal canceled");
        Ok(())
    }

    pub fn set_voting_delay(&mut self, delay: Timestamp) -> Result<(), GovernanceError> {
        self.update(GovernorParams {
            voting_delay: delay,
            ..self.params
        })
    }

    pub fn set_voting_period(&mut self, period: Timestamp) -> Result<(), GovernanceError> {
        self.update(GovernorParams {
            voting_period: period,
            ..self.params
        })
    }

    pub fn set_proposal_threshold(&mut self, threshold: VotingPower) -> Result<(), GovernanceError> {
        self.update(GovernorParams {
            proposal_threshold: threshold,
            ..self.params
        })
    }

    pub fn set_quorum_votes(&mut self, quorum: VotingPower) -> Result<(), GovernanceError> {
        self.update(GovernorParams {
            quorum_votes: quorum,
            ..self.params
        })
    }

    /// Replace the guardian. The zero address removes it.
    pub fn set_guardian(&mut self, guardian: Address) {
        self.guardian = guardian;
    }

    /// Take the events emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<GovernanceEvent> {
        std::mem::take(&mut self.events)
    }

    fn update(&mut self, params: GovernorParams) -> Result<(), GovernanceError> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    fn proposal(&self, id: u64) -> Result<&Proposal, GovernanceError> {
        self.proposals
            .get(&id)
            .ok_or(GovernanceError::ProposalNotFound(id))
    }

    fn proposal_mut(&mut self, id: u64) -> Result<&mut Proposal, GovernanceError> {
        self.proposals
            .get_mut(&id)
            .ok_or(GovernanceError::ProposalNotFound(id))
    }
}

/// Serde adapter writing voting power as a decimal string. TOML integers
/// are 64-bit.
mod power_string {
    use lockgov_staking::VotingPower;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &VotingPower, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<VotingPower, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Command;
    use crate::timelock::TimelockParams;
    use lockgov_staking::StakingParams;
    use lockgov_types::{Amount, YEAR};

    const START: Timestamp = 1_000 * DAY;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn governor_address() -> Address {
        addr(0xee)
    }

    struct Fixture {
        ledger: StakeLedger,
        governor: Governor,
        timelock: Timelock,
    }

    fn fixture() -> Fixture {
        let mut ledger = StakeLedger::new(StakingParams::default()).unwrap();
        // alice: ~30_000 votes, bob: ~3_000 votes
        ledger
            .stake(addr(1), Amount::from_u64(10_000), START + 3 * YEAR, addr(1), START)
            .unwrap();
        ledger
            .stake(addr(2), Amount::from_u64(1_000), START + 3 * YEAR, addr(2), START)
            .unwrap();

        let governor = Governor::new(governor_address(), GovernorParams::default(), addr(9)).unwrap();
        let timelock = Timelock::new(governor_address(), TimelockParams::default()).unwrap();
        Fixture {
            ledger,
            governor,
            timelock,
        }
    }

    fn request(delay: Timestamp) -> ProposalRequest {
        ProposalRequest::new("raise voting delay")
            .with_command(governor_address(), Amount::ZERO, &Command::SetVotingDelay { delay })
            .unwrap()
    }

    #[test]
    fn test_propose_requirements() {
        let mut f = fixture();
        let now = START + 1;

        // Below threshold
        let err = f.governor.propose(&f.ledger, addr(3), &request(DAY), now).unwrap_err();
        assert!(matches!(err, GovernanceError::Unauthorized(_)));

        // No actions
        let err = f
            .governor
            .propose(&f.ledger, addr(1), &ProposalRequest::new("empty"), now)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidParameter(_)));

        // Unknown signature
        let mut bad = request(DAY);
        bad.signatures[0] = "drain()".to_string();
        let err = f.governor.propose(&f.ledger, addr(1), &bad, now).unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidParameter(_)));

        let id = f.governor.propose(&f.ledger, addr(1), &request(DAY), now).unwrap();
        assert_eq!(id, 1);
        let p = f.governor.get(id).unwrap();
        assert_eq!(p.start, now + DAY);
        assert_eq!(p.end, now + 4 * DAY);
        assert_eq!(p.snapshot, now - 1);

        // One open proposal per proposer
        let err = f.governor.propose(&f.ledger, addr(1), &request(2 * DAY), now).unwrap_err();
        assert!(matches!(err, GovernanceError::StateConflict(_)));
    }

    #[test]
    fn test_stake_at_creation_is_not_counted() {
        let mut f = fixture();
        // carol stakes in the same instant the proposal is created
        f.ledger
            .stake(addr(3), Amount::from_u64(5_000), START + 3 * YEAR, addr(3), START + 1)
            .unwrap();
        let id = f.governor.propose(&f.ledger, addr(1), &request(DAY), START + 1).unwrap();

        let voting = f.governor.get(id).unwrap().start;
        let err = f
            .governor
            .cast_vote(&f.ledger, addr(3), id, VoteSupport::For, voting)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Unauthorized(_)));
    }

    #[test]
    fn test_vote_window() {
        let mut f = fixture();
        let id = f.governor.propose(&f.ledger, addr(1), &request(DAY), START + 1).unwrap();
        let (start, end) = {
            let p = f.governor.get(id).unwrap();
            (p.start, p.end)
        };

        let err = f
            .governor
            .cast_vote(&f.ledger, addr(1), id, VoteSupport::For, start - 1)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::TemporalViolation(_)));

        let votes = f.governor.cast_vote(&f.ledger, addr(1), id, VoteSupport::For, start).unwrap();
        assert!(votes > 29_000);

        let err = f
            .governor
            .cast_vote(&f.ledger, addr(1), id, VoteSupport::Against, start + 1)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::StateConflict(_)));

        let err = f
            .governor
            .cast_vote(&f.ledger, addr(2), id, VoteSupport::Against, end + 1)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::TemporalViolation(_)));

        let err = f
            .governor
            .cast_vote(&f.ledger, addr(2), 42, VoteSupport::For, start)
            .unwrap_err();
        assert_eq!(err, GovernanceError::ProposalNotFound(42));
    }

    fn succeeded(f: &mut Fixture) -> (u64, Timestamp) {
        let id = f.governor.propose(&f.ledger, addr(1), &request(DAY), START + 1).unwrap();
        let (start, end) = {
            let p = f.governor.get(id).unwrap();
            (p.start, p.end)
        };
        f.governor.cast_vote(&f.ledger, addr(1), id, VoteSupport::For, start).unwrap();
        (id, end + 1)
    }

    #[test]
    fn test_queue_and_execute() {
        let mut f = fixture();
        let (id, after) = succeeded(&mut f);
        assert_eq!(f.governor.state(id, after, &f.timelock).unwrap(), ProposalState::Succeeded);

        let eta = f.governor.queue(&mut f.timelock, id, after).unwrap();
        assert_eq!(eta, after + 2 * DAY);
        assert_eq!(f.timelock.len(), 1);

        let err = f.governor.queue(&mut f.timelock, id, after).unwrap_err();
        assert!(matches!(err, GovernanceError::StateConflict(_)));

        let err = f.governor.execute(&mut f.timelock, id, eta - 1).unwrap_err();
        assert!(matches!(err, GovernanceError::TemporalViolation(_)));

        let released = f.governor.execute(&mut f.timelock, id, eta).unwrap();
        assert_eq!(released.actions.len(), 1);
        assert!(f.timelock.is_empty());
        assert_eq!(f.governor.state(id, eta, &f.timelock).unwrap(), ProposalState::Executed);

        let err = f.governor.execute(&mut f.timelock, id, eta).unwrap_err();
        assert!(matches!(err, GovernanceError::StateConflict(_)));
    }

    #[test]
    fn test_queue_collision_queues_nothing() {
        let mut f = fixture();
        let (id, after) = succeeded(&mut f);

        // The same action is already waiting in the timelock at that eta
        let action = f.governor.get(id).unwrap().actions[0].clone();
        let eta = after + f.timelock.delay();
        f.timelock.queue(&governor_address(), &action, eta, after).unwrap();

        let err = f.governor.queue(&mut f.timelock, id, after).unwrap_err();
        assert!(matches!(err, GovernanceError::StateConflict(_)));
        assert_eq!(f.timelock.len(), 1);
        assert_eq!(f.governor.get(id).unwrap().eta, 0);
    }

    #[test]
    fn test_duplicate_actions_in_one_proposal() {
        let mut f = fixture();
        let twice = request(DAY)
            .with_command(governor_address(), Amount::ZERO, &Command::SetVotingDelay { delay: DAY })
            .unwrap();
        let id = f.governor.propose(&f.ledger, addr(1), &twice, START + 1).unwrap();
        let start = f.governor.get(id).unwrap().start;
        f.governor.cast_vote(&f.ledger, addr(1), id, VoteSupport::For, start).unwrap();

        let after = f.governor.get(id).unwrap().end + 1;
        let err = f.governor.queue(&mut f.timelock, id, after).unwrap_err();
        assert!(matches!(err, GovernanceError::StateConflict(_)));
        assert!(f.timelock.is_empty());
    }

    #[test]
    fn test_defeated_cannot_be_queued() {
        let mut f = fixture();
        let id = f.governor.propose(&f.ledger, addr(1), &request(DAY), START + 1).unwrap();
        let start = f.governor.get(id).unwrap().start;
        // bob alone is below quorum
        f.governor.cast_vote(&f.ledger, addr(2), id, VoteSupport::For, start).unwrap();

        let after = f.governor.get(id).unwrap().end + 1;
        assert_eq!(f.governor.state(id, after, &f.timelock).unwrap(), ProposalState::Defeated);
        let err = f.governor.queue(&mut f.timelock, id, after).unwrap_err();
        assert!(matches!(err, GovernanceError::StateConflict(_)));

        let err = f.governor.queue(&mut f.timelock, id, start).unwrap_err();
        assert!(matches!(err, GovernanceError::TemporalViolation(_)));
    }

    #[test]
    fn test_execute_after_grace_is_expired() {
        let mut f = fixture();
        let (id, after) = succeeded(&mut f);
        let eta = f.governor.queue(&mut f.timelock, id, after).unwrap();

        let late = eta + f.timelock.grace_period() + 1;
        assert_eq!(f.governor.state(id, late, &f.timelock).unwrap(), ProposalState::Expired);
        let err = f.governor.execute(&mut f.timelock, id, late).unwrap_err();
        assert!(matches!(err, GovernanceError::TemporalViolation(_)));
        assert_eq!(f.timelock.len(), 1);
    }

    #[test]
    fn test_cancel_authority() {
        let mut f = fixture();
        let (id, after) = succeeded(&mut f);
        f.governor.queue(&mut f.timelock, id, after).unwrap();

        // bob is neither proposer nor guardian, and alice still holds power
        let err = f
            .governor
            .cancel(&f.ledger, &mut f.timelock, addr(2), id, after)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Unauthorized(_)));

        // guardian may cancel; queued entries go with it
        f.governor.cancel(&f.ledger, &mut f.timelock, addr(9), id, after).unwrap();
        assert!(f.timelock.is_empty());
        assert_eq!(f.governor.state(id, after, &f.timelock).unwrap(), ProposalState::Canceled);

        let err = f
            .governor
            .cancel(&f.ledger, &mut f.timelock, addr(1), id, after)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::StateConflict(_)));
    }

    #[test]
    fn test_anyone_cancels_when_proposer_loses_power() {
        let mut f = fixture();
        let id = f.governor.propose(&f.ledger, addr(1), &request(DAY), START + 1).unwrap();

        // alice hands her power to bob; from then on anyone may cancel
        f.ledger.delegate(addr(1), addr(2), START + 2).unwrap();
        f.governor
            .cancel(&f.ledger, &mut f.timelock, addr(7), id, START + 3)
            .unwrap();
        assert!(f.governor.get(id).unwrap().canceled);
    }

    #[test]
    fn test_params_string_encoding() {
        let params = GovernorParams::default();
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"quorum_votes\":\"20000\""));
        let back: GovernorParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
