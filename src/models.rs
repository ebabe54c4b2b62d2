//
// models.rs
// Dicom-Editor-rs
//
// Serializable per-file results and run summaries for the batch operations.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Ok,
    Skip,
    Failed,
    NotADirectory,
    Quarantine,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileStatus::Ok => "OK",
            FileStatus::Skip => "SKIP",
            FileStatus::Failed => "FAILED",
            FileStatus::NotADirectory => "NOT_A_DIRECTORY",
            FileStatus::Quarantine => "QUARANTINE",
        };
        f.write_str(label)
    }
}

/// Outcome for one visited path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    pub path: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FileResult {
    pub fn new(path: impl Into<PathBuf>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
            output: None,
            message: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for FileResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.path.display())?;
        if let Some(output) = &self.output {
            if *output != self.path {
                write!(f, " -> {}", output.display())?;
            }
        }
        if let Some(message) = &self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

/// Results of one run in visiting order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub operation: String,
    pub results: Vec<FileResult>,
}

impl BatchReport {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, result: FileResult) {
        self.results.push(result);
    }

    pub fn count(&self, status: FileStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn status_of(&self, path: &std::path::Path) -> Option<FileStatus> {
        self.results
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.status)
    }
}
