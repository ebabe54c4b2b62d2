//
// integer_table.rs
// Dicom-Editor-rs
//
// Persistent monotonic counters that map original values to stable integer pseudonyms.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::atomic;
use crate::error::{EditorError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TableData {
    /// Last integer handed out per key type.
    counters: BTreeMap<String, u64>,
    entries: BTreeMap<String, BTreeMap<String, u64>>,
}

/// `(keyType, originalValue) -> n`. Recorded mappings never change.
///
/// Exactly one anonymization run holds the table at a time; the batch driver owns it.
#[derive(Debug, Default)]
pub struct IntegerTable {
    path: Option<PathBuf>,
    data: TableData,
    dirty: bool,
}

impl IntegerTable {
    /// A table that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the table stored at `path`; a missing file starts an empty table there.
    pub fn open(path: &Path) -> Result<Self> {
        let data = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| EditorError::io(path, io::Error::new(io::ErrorKind::InvalidData, e)))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => TableData::default(),
            Err(e) => return Err(EditorError::io(path, e)),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            data,
            dirty: false,
        })
    }

    pub fn get(&self, key_type: &str, value: &str) -> Option<u64> {
        self.data
            .entries
            .get(key_type)
            .and_then(|values| values.get(value))
            .copied()
    }

    /// Existing pseudonym for the pair, or the next integer for `key_type` (starting at 1).
    pub fn get_or_assign(&mut self, key_type: &str, value: &str) -> u64 {
        if let Some(existing) = self.get(key_type, value) {
            return existing;
        }
        let counter = self.data.counters.entry(key_type.to_string()).or_insert(0);
        *counter += 1;
        let assigned = *counter;
        self.data
            .entries
            .entry(key_type.to_string())
            .or_default()
            .insert(value.to_string(), assigned);
        self.dirty = true;
        debug!("integer table: {key_type} -> {assigned}");
        assigned
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.data.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist pending assignments. In-memory tables only clear the dirty flag.
    pub fn save(&mut self) -> Result<()> {
        if let Some(path) = &self.path {
            let json = serde_json::to_vec_pretty(&self.data)
                .map_err(|e| EditorError::io(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
            atomic::write_bytes(path, &json)?;
        }
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn assignments_are_per_key_type_and_stable() {
        let mut table = IntegerTable::in_memory();
        assert_eq!(table.get_or_assign("ptid", "A"), 1);
        assert_eq!(table.get_or_assign("ptid", "B"), 2);
        assert_eq!(table.get_or_assign("acc", "A"), 1);
        assert_eq!(table.get_or_assign("ptid", "A"), 1);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn saved_table_continues_where_it_left_off() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("idtable.json");

        let mut first = IntegerTable::open(&path).expect("open new");
        first.get_or_assign("ptid", "12345");
        first.get_or_assign("ptid", "67890");
        assert!(first.is_dirty());
        first.save().expect("save");
        assert!(!first.is_dirty());

        let mut second = IntegerTable::open(&path).expect("reopen");
        assert_eq!(second.get_or_assign("ptid", "67890"), 2);
        assert_eq!(second.get_or_assign("ptid", "new"), 3);
    }
}
