//! Lockgov Governance - Timelocked proposal lifecycle.
//!
//! This crate provides:
//! - Typed proposal actions and their content hash
//! - The timelock holding queued actions until their eta
//! - The governor state machine (propose, vote, queue, execute, cancel)
//! - The versioned capability registry actions are dispatched through
//! - The `Protocol` facade owning the ledger, governor and timelock

pub mod action;
pub mod timelock;
pub mod proposal;
pub mod governor;
pub mod registry;
pub mod protocol;
pub mod events;
pub mod error;

pub use action::{Command, ProposalAction, ProposalRequest};
pub use timelock::{QueuedAction, Timelock, TimelockParams};
pub use proposal::{Proposal, ProposalState, VoteReceipt, VoteSupport};
pub use governor::{Governor, GovernorParams, ReleasedActions};
pub use registry::{ActionContext, ActionHandler, ActionOutput, CapabilityRegistry, TreasuryHandler};
pub use protocol::{
    ActionOutcome, ActionReceipt, ExecutionReport, Protocol, ProtocolConfig, ProtocolState,
};
pub use events::{GovernanceEvent, JournalEntry, ProtocolEvent};
pub use error::GovernanceError;
