//! Proposal records and their lifecycle states.
//!
//! Proposals go through states: Pending -> Active -> Succeeded/Defeated ->
//! Queued -> Executed/Expired, and may be Canceled until executed. The state
//! is derived from the record and the current time, never stored.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use lockgov_staking::VotingPower;
use lockgov_types::{Address, Timestamp};
use serde::{Deserialize, Serialize};

use crate::action::ProposalAction;
use crate::error::GovernanceError;

/// Proposal state in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalState {
    /// Created, waiting for voting to start
    Pending,
    /// Voting is open
    Active,
    /// Canceled by the proposer or an authorized canceller
    Canceled,
    /// Voting ended without majority or quorum
    Defeated,
    /// Voting ended with majority and quorum, not yet queued
    Succeeded,
    /// Actions are in the timelock
    Queued,
    /// Queued, but the grace period after eta ran out
    Expired,
    /// Actions were executed
    Executed,
}

impl ProposalState {
    /// Check if voting is still possible.
    pub fn can_vote(&self) -> bool {
        matches!(self, ProposalState::Active)
    }

    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalState::Canceled | ProposalState::Executed)
    }

    /// Voting has not concluded yet.
    pub fn is_open(&self) -> bool {
        matches!(self, ProposalState::Pending | ProposalState::Active)
    }
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Vote support options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteSupport {
    /// Vote against
    Against,
    /// Vote in favor
    For,
    /// Abstain (recorded but does not decide the outcome)
    Abstain,
}

impl FromStr for VoteSupport {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "against" | "0" => Ok(VoteSupport::Against),
            "for" | "1" => Ok(VoteSupport::For),
            "abstain" | "2" => Ok(VoteSupport::Abstain),
            other => Err(GovernanceError::InvalidParameter(format!(
                "unknown vote support '{}'",
                other
            ))),
        }
    }
}

/// A recorded vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub support: VoteSupport,
    pub votes: VotingPower,
}

/// Governance proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique proposal ID
    pub id: u64,
    /// Proposer address
    pub proposer: Address,
    /// Actions to run once executed
    pub actions: Vec<ProposalAction>,
    pub description: String,
    pub created_at: Timestamp,
    /// Point voting power is read at
    pub snapshot: Timestamp,
    /// First instant votes are accepted
    pub start: Timestamp,
    /// Last instant votes are accepted
    pub end: Timestamp,
    /// Quorum in force when the proposal was created
    pub quorum_votes: VotingPower,
    /// Earliest execution time, 0 until queued
    pub eta: Timestamp,
    pub for_votes: VotingPower,
    pub against_votes: VotingPower,
    pub abstain_votes: VotingPower,
    pub receipts: BTreeMap<Address, VoteReceipt>,
    pub executed: bool,
    pub canceled: bool,
}

impl Proposal {
    /// Lifecycle state at `now`, given the timelock grace period.
    pub fn state(&self, now: Timestamp, grace_period: Timestamp) -> ProposalState {
        if self.canceled {
            ProposalState::Canceled
        } else if self.executed {
            ProposalState::Executed
        } else if now < self.start {
            ProposalState::Pending
        } else if now <= self.end {
            ProposalState::Active
        } else if !self.passed() {
            ProposalState::Defeated
        } else if self.eta == 0 {
            ProposalState::Succeeded
        } else if now > self.eta.saturating_add(grace_period) {
            ProposalState::Expired
        } else {
            ProposalState::Queued
        }
    }

    /// Majority and quorum reached.
    pub fn passed(&self) -> bool {
        self.for_votes > self.against_votes && self.for_votes >= self.quorum_votes
    }

    /// Record a vote.
    pub fn record_vote(
        &mut self,
        voter: Address,
        support: VoteSupport,
        votes: VotingPower,
    ) -> Result<(), GovernanceError> {
        if self.receipts.contains_key(&voter) {
            return Err(GovernanceError::StateConflict(format!(
                "{} already voted on proposal {}",
                voter, self.id
            )));
        }

        let tally = match support {
            VoteSupport::For => &mut self.for_votes,
            VoteSupport::Against => &mut self.against_votes,
            VoteSupport::Abstain => &mut self.abstain_votes,
        };
        *tally = tally
            .checked_add(votes)
            .ok_or_else(|| GovernanceError::Overflow(format!("tally of proposal {}", self.id)))?;

        self.receipts.insert(voter, VoteReceipt { support, votes });
        Ok(())
    }

    /// Get total votes cast.
    pub fn total_votes(&self) -> VotingPower {
        self.for_votes
            .saturating_add(self.against_votes)
            .saturating_add(self.abstain_votes)
    }

    /// Check if voter has voted.
    pub fn has_voted(&self, voter: &Address) -> bool {
        self.receipts.contains_key(voter)
    }
}
