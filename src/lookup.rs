//
// lookup.rs
// Dicom-Editor-rs
//
// Lookup table of operator-supplied pseudonyms consulted by the script engine.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::properties::Properties;

/// Operator-supplied `keyType/keyValue=replacement` pairs consulted by `@lookup`.
///
/// Read-only for the duration of a run, so it is shared by reference.
#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    entries: Properties,
}

impl LookupTable {
    pub fn new(entries: Properties) -> Self {
        Self { entries }
    }

    /// Load from a properties file; a missing file is an empty table.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = Properties::load(path)?;
        debug!("lookup table {}: {} entries", path.display(), entries.len());
        Ok(Self { entries })
    }

    pub fn get(&self, key_type: &str, key_value: &str) -> Option<&str> {
        self.entries.get(&Self::key(key_type, key_value))
    }

    pub fn key(key_type: &str, key_value: &str) -> String {
        format!("{key_type}/{key_value}")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
