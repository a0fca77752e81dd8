//! Protocol snapshot and event journal.
//!
//! The snapshot holds the whole protocol state plus the vault balances and
//! is replaced on every commit. Journal entries are append-only, keyed by
//! their sequence number. Both go to disk in the same write.

use std::path::Path;
use std::sync::Arc;

use lockgov_governance::{JournalEntry, ProtocolState};
use lockgov_staking::InMemoryVault;
use lockgov_types::Hash;
use serde::{Deserialize, Serialize};

use crate::{Database, StorageError};

const META: &str = "meta";
const JOURNAL: &str = "journal";
const SNAPSHOT_KEY: &[u8] = b"snapshot";
const CHECKSUM_KEY: &[u8] = b"snapshot_checksum";

/// Everything needed to resume the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub state: ProtocolState,
    pub vault: InMemoryVault,
}

impl Snapshot {
    pub const VERSION: u32 = 1;

    pub fn new(state: ProtocolState, vault: InMemoryVault) -> Self {
        Self {
            version: Self::VERSION,
            state,
            vault,
        }
    }
}

/// Snapshot and journal store.
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = Database::new(path)?;
        tracing::debug!(path = %path.display(), "Opened state store");
        Ok(Self { db: Arc::new(db) })
    }

    pub fn path(&self) -> &Path {
        self.db.path()
    }

    /// Latest committed snapshot, `None` for a fresh store.
    pub fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        let Some(bytes) = self.db.get(META, SNAPSHOT_KEY)? else {
            return Ok(None);
        };

        let expected = self
            .db
            .get(META, CHECKSUM_KEY)?
            .ok_or_else(|| StorageError::NotFound("snapshot checksum".to_string()))?;
        let actual = Hash::compute(&bytes);
        if expected.as_slice() != actual.as_bytes() {
            return Err(StorageError::ChecksumMismatch {
                expected: hex::encode(&expected),
                actual: actual.to_hex(),
            });
        }

        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Deserialization(e.to_string()))?;
        if snapshot.version != Snapshot::VERSION {
            return Err(StorageError::Deserialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    /// Replace the snapshot and append `entries` to the journal.
    pub fn commit(&self, snapshot: &Snapshot, entries: &[JournalEntry]) -> Result<(), StorageError> {
        let bytes =
            serde_json::to_vec(snapshot).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let checksum = Hash::compute(&bytes);

        let mut ops: Vec<(&str, Vec<u8>, Option<Vec<u8>>)> = Vec::with_capacity(entries.len() + 2);
        ops.push((META, SNAPSHOT_KEY.to_vec(), Some(bytes)));
        ops.push((META, CHECKSUM_KEY.to_vec(), Some(checksum.as_bytes().to_vec())));
        for entry in entries {
            let value =
                serde_json::to_vec(entry).map_err(|e| StorageError::Serialization(e.to_string()))?;
            ops.push((JOURNAL, entry.seq.to_be_bytes().to_vec(), Some(value)));
        }

        self.db.write_batch(&ops)?;
        tracing::debug!(
            clock = snapshot.state.clock,
            journal = entries.len(),
            "Committed snapshot"
        );
        Ok(())
    }

    /// Remove the snapshot and the whole journal.
    pub fn clear(&self) -> Result<(), StorageError> {
        tracing::warn!(path = %self.path().display(), "Clearing state store");
        self.db.clear()
    }

    /// Journal entries with `seq >= from`, in order.
    pub fn journal_since(&self, from: u64) -> Result<Vec<JournalEntry>, StorageError> {
        let mut entries = Vec::new();
        for (key, value) in self.db.scan(JOURNAL)? {
            let seq = <[u8; 8]>::try_from(key.as_slice())
                .map(u64::from_be_bytes)
                .map_err(|_| StorageError::Deserialization("journal key is not a u64".to_string()))?;
            if seq < from {
                continue;
            }
            let entry: JournalEntry = serde_json::from_slice(&value)
                .map_err(|e| StorageError::Deserialization(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn journal(&self) -> Result<Vec<JournalEntry>, StorageError> {
        self.journal_since(0)
    }

    pub fn journal_len(&self) -> usize {
        self.db.count(JOURNAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockgov_governance::{Protocol, ProtocolConfig};
    use lockgov_staking::TokenVault;
    use lockgov_types::{Address, Amount, DAY, YEAR};
    use tempfile::TempDir;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn staked_protocol() -> Protocol {
        let mut vault = InMemoryVault::new();
        vault.mint(addr(1), Amount::from_u64(1_000)).unwrap();
        let mut protocol = Protocol::new(ProtocolConfig::default(), vault).unwrap();
        protocol
            .stake(addr(1), Amount::from_u64(400), 1_000 * DAY + YEAR, addr(1), 1_000 * DAY)
            .unwrap();
        protocol
    }

    #[test]
    fn test_fresh_store_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();
        assert!(store.load_snapshot().unwrap().is_none());
        assert!(store.journal().unwrap().is_empty());
    }

    #[test]
    fn test_commit_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let mut protocol = staked_protocol();
        let entries = protocol.drain_journal();
        assert!(!entries.is_empty());

        let (state, vault, _) = protocol.into_parts();
        let snapshot = Snapshot::new(state, vault);
        {
            let store = StateStore::open(temp_dir.path()).unwrap();
            store.commit(&snapshot, &entries).unwrap();
        }

        let store = StateStore::open(temp_dir.path()).unwrap();
        let loaded = store.load_snapshot().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.vault.held(), Amount::from_u64(400));
        assert_eq!(store.journal().unwrap(), entries);
        assert_eq!(store.journal_len(), entries.len());

        let tail = store.journal_since(entries.len() as u64 - 1).unwrap();
        assert_eq!(tail.len(), 1);

        store.clear().unwrap();
        assert!(store.load_snapshot().unwrap().is_none());
        assert_eq!(store.journal_len(), 0);
    }

    #[test]
    fn test_tampered_snapshot_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let (state, vault, _) = staked_protocol().into_parts();
        let store = StateStore::open(temp_dir.path()).unwrap();
        store.commit(&Snapshot::new(state, vault), &[]).unwrap();

        store.db.put(META, SNAPSHOT_KEY, b"{}").unwrap();
        let err = store.load_snapshot().unwrap_err();
        assert!(matches!(err, StorageError::ChecksumMismatch { .. }));
        assert_eq!(err.kind(), lockgov_types::ErrorKind::Storage);
    }
}
