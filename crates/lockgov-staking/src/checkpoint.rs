//! Append-only checkpoint logs.
//!
//! A log is an ordered sequence of `(point, value)` records, strictly
//! increasing in `point`. Historical lookups return the value of the last
//! record whose point is at or before the queried point.

use lockgov_types::{Address, Amount, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::StakingError;

/// A single record in a checkpoint log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint<V> {
    /// Reference point the value took effect at
    pub point: Timestamp,
    /// Recorded value
    pub value: V,
}

/// Ordered, append-only log of checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointLog<V> {
    entries: Vec<Checkpoint<V>>,
}

impl<V> Default for CheckpointLog<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V: Copy> CheckpointLog<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Checkpoint<V>] {
        &self.entries
    }

    /// Newest record.
    pub fn latest(&self) -> Option<&Checkpoint<V>> {
        self.entries.last()
    }

    /// Record `value` at `point`.
    ///
    /// A write at the newest record's point replaces that record's value;
    /// the point has not yet closed, so nothing could have observed it as
    /// history. A write before the newest point is rejected.
    pub fn write(&mut self, point: Timestamp, value: V) -> Result<(), StakingError> {
        match self.entries.last_mut() {
            Some(last) if point < last.point => Err(StakingError::TemporalViolation(format!(
                "checkpoint at {} precedes newest checkpoint at {}",
                point, last.point
            ))),
            Some(last) if point == last.point => {
                last.value = value;
                Ok(())
            }
            _ => {
                self.entries.push(Checkpoint { point, value });
                Ok(())
            }
        }
    }

    /// Value in effect at `point` (binary search).
    pub fn value_at(&self, point: Timestamp) -> Option<V> {
        let idx = self.entries.partition_point(|c| c.point <= point);
        idx.checked_sub(1).map(|i| self.entries[i].value)
    }

    /// Value in effect at `point` by linear scan.
    ///
    /// Reference lookup for audits; `value_at` must always agree with it.
    pub fn value_at_linear(&self, point: Timestamp) -> Option<V> {
        let mut found = None;
        for entry in &self.entries {
            if entry.point > point {
                break;
            }
            found = Some(entry.value);
        }
        found
    }
}

/// Value recorded in a stake checkpoint: the amount locked in the bucket and
/// the delegate the amount was attributed to when written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePoint {
    pub amount: Amount,
    pub delegate: Address,
}

impl Checkpoint<StakePoint> {
    /// Packed encoding length: point (8) + amount (12) + delegate (20).
    pub const ENCODED_LEN: usize = 8 + Amount::BYTES + Address::LEN;

    /// Bit-exact encoding: `point u64 BE | amount u96 BE | delegate`.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.point.to_be_bytes());
        out[8..20].copy_from_slice(&self.value.amount.to_be_bytes());
        out[20..].copy_from_slice(self.value.delegate.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::ENCODED_LEN]) -> Self {
        let mut point = [0u8; 8];
        point.copy_from_slice(&bytes[..8]);
        let mut amount = [0u8; Amount::BYTES];
        amount.copy_from_slice(&bytes[8..20]);
        let mut delegate = [0u8; Address::LEN];
        delegate.copy_from_slice(&bytes[20..]);

        Self {
            point: u64::from_be_bytes(point),
            value: StakePoint {
                amount: Amount::from_be_bytes(amount),
                delegate: Address::from_bytes(delegate),
            },
        }
    }
}

impl CheckpointLog<StakePoint> {
    /// Concatenated packed encoding of every record.
    pub fn to_packed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * Checkpoint::<StakePoint>::ENCODED_LEN);
        for entry in &self.entries {
            out.extend_from_slice(&entry.to_bytes());
        }
        out
    }

    /// Decode a packed log, re-checking the ordering invariant.
    pub fn from_packed(bytes: &[u8]) -> Result<Self, StakingError> {
        const LEN: usize = Checkpoint::<StakePoint>::ENCODED_LEN;
        if bytes.len() % LEN != 0 {
            return Err(StakingError::Corrupt(format!(
                "packed log length {} is not a multiple of {}",
                bytes.len(),
                LEN
            )));
        }

        let mut entries: Vec<Checkpoint<StakePoint>> = Vec::with_capacity(bytes.len() / LEN);
        for chunk in bytes.chunks_exact(LEN) {
            let mut record = [0u8; LEN];
            record.copy_from_slice(chunk);
            let entry = Checkpoint::<StakePoint>::from_bytes(&record);
            if let Some(prev) = entries.last() {
                if entry.point <= prev.point {
                    return Err(StakingError::Corrupt(format!(
                        "checkpoint at {} does not follow {}",
                        entry.point, prev.point
                    )));
                }
            }
            entries.push(entry);
        }
        Ok(Self { entries })
    }
}

/// Serde adapter persisting stake logs in their packed, hex-encoded form.
pub(crate) mod packed_logs {
    use super::*;
    use serde::{Deserializer, Serializer};
    use std::collections::{BTreeMap, HashMap};

    type Logs = HashMap<Address, BTreeMap<Timestamp, CheckpointLog<StakePoint>>>;

    pub fn serialize<S>(logs: &Logs, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: BTreeMap<&Address, BTreeMap<Timestamp, String>> = logs
            .iter()
            .map(|(owner, buckets)| {
                let buckets = buckets
                    .iter()
                    .map(|(bucket, log)| (*bucket, hex::encode(log.to_packed())))
                    .collect();
                (owner, buckets)
            })
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Logs, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: HashMap<Address, BTreeMap<Timestamp, String>> = HashMap::deserialize(deserializer)?;
        let mut logs = Logs::with_capacity(raw.len());
        for (owner, buckets) in raw {
            let mut decoded = BTreeMap::new();
            for (bucket, packed) in buckets {
                let bytes = hex::decode(&packed).map_err(serde::de::Error::custom)?;
                let log = CheckpointLog::from_packed(&bytes).map_err(serde::de::Error::custom)?;
                decoded.insert(bucket, log);
            }
            logs.insert(owner, decoded);
        }
        Ok(logs)
    }
}
