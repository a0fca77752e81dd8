//! Lockgov Types - Core type definitions shared by the ledger and governance crates.
//!
//! This crate provides:
//! - Addresses (20-byte, Bech32m or hex encoded)
//! - Hashes (32-byte, blake3 digests)
//! - Amount (96-bit checked token amount)
//! - Timestamps and the quantized lock calendar
//! - The protocol-wide error taxonomy

pub mod address;
pub mod hash;
pub mod amount;
pub mod time;
pub mod error;

#[cfg(any(feature = "serde", feature = "borsh"))]
mod serialization;

pub use address::Address;
pub use hash::Hash;
pub use amount::Amount;
pub use time::{Timestamp, DAY, YEAR};
pub use error::{ErrorKind, TypesError};
