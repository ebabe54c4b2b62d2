//
// error.rs
// Dicom-Editor-rs
//
// Error kinds shared by the script engine, the anonymizer, and the batch operations.
//
// Thales Matheus Mendonça Santos - November 2025

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shown to the operator whenever the anonymizer script could not be persisted.
pub const SCRIPT_SAVE_WARNING: &str = "An error has occurred while saving the changes to the \
anonymizer configuration. Stop the program now and consult IT to ensure that anonymization \
has not been damaged in such a way as to allow PHI to be transmitted.";

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("not a DICOM Part 10 file: {}", .0.display())]
    NotDicom(PathBuf),

    #[error("malformed anonymizer script: {0}")]
    ScriptParse(String),

    #[error("script evaluation failed: {0}")]
    ScriptEval(String),

    #[error("no lookup table entry for {key}")]
    LookupMiss { key: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("DICOM dataset error: {0}")]
    Dataset(String),

    #[error("unable to save anonymizer script {}: {source}. {}", path.display(), SCRIPT_SAVE_WARNING)]
    ScriptPersist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = EditorError> = std::result::Result<T, E>;

impl EditorError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        EditorError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn dataset(err: impl std::fmt::Display) -> Self {
        EditorError::Dataset(err.to_string())
    }
}
