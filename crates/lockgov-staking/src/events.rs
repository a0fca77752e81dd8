use lockgov_types::{Address, Amount, Timestamp};
use serde::{Deserialize, Serialize};

/// Observable changes emitted by the stake ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StakingEvent {
    /// The amount locked in `owner`'s `bucket` is now `amount`
    StakeChanged {
        owner: Address,
        bucket: Timestamp,
        amount: Amount,
    },
    /// An expired bucket was released back to its owner
    Withdrawn {
        owner: Address,
        bucket: Timestamp,
        amount: Amount,
    },
    /// `owner` now attributes its live stake to `to`
    DelegateChanged {
        owner: Address,
        from: Address,
        to: Address,
    },
}

impl StakingEvent {
    /// Account the event is about.
    pub fn owner(&self) -> &Address {
        match self {
            StakingEvent::StakeChanged { owner, .. }
            | StakingEvent::Withdrawn { owner, .. }
            | StakingEvent::DelegateChanged { owner, .. } => owner,
        }
    }
}
