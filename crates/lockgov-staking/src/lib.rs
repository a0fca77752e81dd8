//! Lockgov Staking - Time-locked stake ledger.
//!
//! This crate provides:
//! - The weight curve mapping remaining lock time to a voting multiplier
//! - Quantized lock buckets relative to a kickoff epoch
//! - Append-only checkpoint logs with point-in-time lookup
//! - The stake ledger and its delegation registry
//! - The token vault seam used to move tokens in and out of the ledger

pub mod curve;
pub mod checkpoint;
pub mod delegation;
pub mod ledger;
pub mod vault;
pub mod events;
pub mod error;

pub use curve::{WeightCurve, BPS};
pub use checkpoint::{Checkpoint, CheckpointLog, StakePoint};
pub use delegation::DelegationRegistry;
pub use ledger::{StakeLedger, StakePosition, StakeReceipt, StakingParams, VotingPower};
pub use vault::{InMemoryVault, TokenVault};
pub use events::StakingEvent;
pub use error::StakingError;
