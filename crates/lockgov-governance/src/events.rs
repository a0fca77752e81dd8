use lockgov_staking::{StakingEvent, VotingPower};
use lockgov_types::{Address, Hash, Timestamp};
use serde::{Deserialize, Serialize};

use crate::proposal::VoteSupport;

/// Observable changes emitted by the governor and the timelock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GovernanceEvent {
    ProposalCreated {
        id: u64,
        proposer: Address,
        start: Timestamp,
        end: Timestamp,
        actions: usize,
        description: String,
    },
    VoteCast {
        voter: Address,
        id: u64,
        support: VoteSupport,
        votes: VotingPower,
    },
    ProposalQueued {
        id: u64,
        eta: Timestamp,
    },
    ProposalExecuted {
        id: u64,
    },
    ProposalCanceled {
        id: u64,
    },
    ActionQueued {
        hash: Hash,
        target: Address,
        eta: Timestamp,
    },
    ActionExecuted {
        hash: Hash,
        target: Address,
        success: bool,
    },
    ActionCanceled {
        hash: Hash,
        target: Address,
    },
    /// Pruned after its grace period ran out
    ActionExpired {
        hash: Hash,
    },
    ParameterChanged {
        name: String,
        value: String,
    },
    CapabilityUpgraded {
        target: Address,
        version: u32,
    },
}

/// Any event the protocol journals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    Staking(StakingEvent),
    Governance(GovernanceEvent),
}

impl From<StakingEvent> for ProtocolEvent {
    fn from(e: StakingEvent) -> Self {
        ProtocolEvent::Staking(e)
    }
}

impl From<GovernanceEvent> for ProtocolEvent {
    fn from(e: GovernanceEvent) -> Self {
        ProtocolEvent::Governance(e)
    }
}

/// A journaled event with its sequence number and logical time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub at: Timestamp,
    pub event: ProtocolEvent,
}
