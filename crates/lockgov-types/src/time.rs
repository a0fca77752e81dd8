//! Timestamps on the protocol's logical clock.
//!
//! Every reference point (checkpoint position, lock bucket, voting window,
//! timelock eta) is measured on the same clock, in seconds.

/// Seconds on the protocol's logical clock.
pub type Timestamp = u64;

pub const DAY: Timestamp = 86_400;
pub const YEAR: Timestamp = 365 * DAY;
