//! Lockgov Storage - Snapshot and journal persistence in JSON files

pub mod error;
pub mod state_store;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

pub use error::StorageError;
pub use state_store::{Snapshot, StateStore};

const DATA_FILE: &str = "data.json";

/// Column-keyed byte store backed by a single JSON file.
///
/// Keys and values are hex encoded. Every write rewrites the file through a
/// temporary sibling and a rename, so a crash leaves either the old or the
/// new contents on disk.
pub struct Database {
    path: PathBuf,
    data: Arc<RwLock<Value>>,
}

impl Database {
    pub fn new(path: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(path)?;

        let data_file = path.join(DATA_FILE);
        let data = if data_file.exists() {
            let content = fs::read_to_string(&data_file)?;
            serde_json::from_str(&content).map_err(|e| {
                StorageError::Deserialization(format!("{}: {}", data_file.display(), e))
            })?
        } else {
            Value::Object(Map::new())
        };

        Ok(Self {
            path: path.to_path_buf(),
            data: Arc::new(RwLock::new(data)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, column: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read();
        match data.get(column).and_then(|c| c.get(hex::encode(key))) {
            Some(Value::String(value)) => Ok(Some(hex::decode(value)?)),
            Some(_) => Err(StorageError::Deserialization(format!(
                "non-string value in column {}",
                column
            ))),
            None => Ok(None),
        }
    }

    pub fn put(&self, column: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.write_batch(&[(column, key.to_vec(), Some(value.to_vec()))])
    }

    pub fn delete(&self, column: &str, key: &[u8]) -> Result<(), StorageError> {
        self.write_batch(&[(column, key.to_vec(), None)])
    }

    /// Apply puts (`Some`) and deletes (`None`) with a single file write.
    pub fn write_batch(
        &self,
        ops: &[(&str, Vec<u8>, Option<Vec<u8>>)],
    ) -> Result<(), StorageError> {
        // Writers are serialized; the map only changes once the file does
        let mut data = self.data.write();
        let mut next = if data.is_object() {
            data.clone()
        } else {
            Value::Object(Map::new())
        };
        let root = next
            .as_object_mut()
            .ok_or_else(|| StorageError::Serialization("root is not an object".to_string()))?;

        for (column, key, value) in ops {
            let entries = root
                .entry(column.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            let Some(entries) = entries.as_object_mut() else {
                return Err(StorageError::Serialization(format!(
                    "column {} is not an object",
                    column
                )));
            };
            match value {
                Some(value) => {
                    entries.insert(hex::encode(key), Value::String(hex::encode(value)));
                }
                None => {
                    entries.remove(&hex::encode(key));
                }
            }
        }

        self.persist(&next)?;
        *data = next;
        Ok(())
    }

    /// All entries of `column` in ascending key order.
    pub fn scan(&self, column: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let data = self.data.read();
        let Some(entries) = data.get(column).and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let value = value.as_str().ok_or_else(|| {
                StorageError::Deserialization(format!("non-string value in column {}", column))
            })?;
            out.push((hex::decode(key)?, hex::decode(value)?));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// Drop every column.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut data = self.data.write();
        let empty = Value::Object(Map::new());
        self.persist(&empty)?;
        *data = empty;
        Ok(())
    }

    /// Number of entries in `column`.
    pub fn count(&self, column: &str) -> usize {
        self.data
            .read()
            .get(column)
            .and_then(Value::as_object)
            .map_or(0, Map::len)
    }

    fn persist(&self, data: &Value) -> Result<(), StorageError> {
        let data_file = self.path.join(DATA_FILE);
        let tmp_file = self.path.join(format!("{}.tmp", DATA_FILE));
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        fs::write(&tmp_file, content)?;
        fs::rename(&tmp_file, &data_file)?;
        Ok(())
    }
}
