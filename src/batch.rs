//
// batch.rs
// Dicom-Editor-rs
//
// Expands a selected file or directory into an ordered list of files and applies one operation
// to each, collecting a per-file result without ever aborting the walk.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::anonymize::{AnonymizeStatus, Anonymizer};
use crate::error::EditorError;
use crate::fix_vr::{self, FixOutcome};
use crate::models::{BatchReport, FileResult, FileStatus};
use crate::patient_id::{self, PatientIdOutcome};
use crate::preamble;

pub const NO_PHI_SUFFIX: &str = "-no-phi";

static UID_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenamePolicy {
    InPlace,
    #[default]
    SuffixNoPhi,
    SopInstanceUid,
}

impl FromStr for RenamePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-place" => Ok(RenamePolicy::InPlace),
            "suffix-no-phi" => Ok(RenamePolicy::SuffixNoPhi),
            "sop-instance-uid" => Ok(RenamePolicy::SopInstanceUid),
            other => Err(format!("unknown rename policy {other:?}")),
        }
    }
}

/// Extension filter; an empty list accepts every file. Matching ignores case.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    extensions: Vec<String>,
}

impl FileFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

/// One of the per-file verbs a run applies.
pub enum Operation<'a> {
    Anonymize(Anonymizer<'a>),
    FixVrs,
    ClearPreamble,
    /// `base_depth` is the component count of the selected root directory.
    SetPatientId { base_depth: usize },
}

impl fmt::Display for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Anonymize(_) => "anonymize",
            Operation::FixVrs => "fix-vrs",
            Operation::ClearPreamble => "clear-preamble",
            Operation::SetPatientId { .. } => "set-patient-ids",
        };
        f.write_str(name)
    }
}

/// True when the file stem already carries the `-no-phi` marker.
pub fn is_no_phi(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.ends_with(NO_PHI_SUFFIX) {
        return true;
    }
    if is_uid_style(name) {
        return false;
    }
    let stem = name.rfind('.').map(|k| &name[..k]).unwrap_or(name);
    stem.ends_with(NO_PHI_SUFFIX)
}

fn is_uid_style(name: &str) -> bool {
    UID_NAME_REGEX
        .get_or_init(|| Regex::new(r"^[\d.]+$").expect("static regex"))
        .is_match(name)
}

/// `scan.dcm` becomes `scan-no-phi.dcm`; an all-digits-and-dots name gets the suffix appended.
pub fn no_phi_name(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let split = if is_uid_style(&name) {
        name.len()
    } else {
        name.rfind('.').unwrap_or(name.len())
    };
    path.with_file_name(format!("{}{}{}", &name[..split], NO_PHI_SUFFIX, &name[split..]))
}

/// Files under `root` in file-name order, filtered. Walk errors are returned as failures.
pub fn collect_files(
    root: &Path,
    filter: &FileFilter,
    recursive: bool,
) -> (Vec<PathBuf>, Vec<FileResult>) {
    let mut files = Vec::new();
    let mut failures = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() && filter.matches(entry.path()) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                warn!("cannot read {}: {e}", path.display());
                failures.push(FileResult::new(path, FileStatus::Failed).with_message(e.to_string()));
            }
        }
    }
    (files, failures)
}

/// Applies `op` to `root` (a file) or to the files beneath it (a directory).
pub fn run(
    root: &Path,
    op: &mut Operation<'_>,
    filter: &FileFilter,
    recursive: bool,
    rename: RenamePolicy,
) -> BatchReport {
    let mut report = BatchReport::new(op.to_string());
    if let Operation::Anonymize(anonymizer) = op {
        anonymizer.set_rename_to_sop_instance_uid(rename == RenamePolicy::SopInstanceUid);
    }

    if root.is_file() {
        if matches!(op, Operation::SetPatientId { .. }) {
            report.push(
                FileResult::new(root, FileStatus::NotADirectory)
                    .with_message(format!("{} is not a directory", root.display())),
            );
        } else if filter.matches(root) {
            report.push(process_file(root, op, rename));
        }
        return report;
    }
    if !root.is_dir() {
        report.push(
            FileResult::new(root, FileStatus::Failed).with_message("no such file or directory"),
        );
        return report;
    }

    let (files, failures) = collect_files(root, filter, recursive);
    info!("{op}: {} file(s) under {}", files.len(), root.display());
    for failure in failures {
        report.push(failure);
    }
    for path in files {
        report.push(process_file(&path, op, rename));
    }
    report
}

pub fn process_file(path: &Path, op: &mut Operation<'_>, rename: RenamePolicy) -> FileResult {
    let result = match op {
        Operation::Anonymize(anonymizer) => anonymize_one(anonymizer, path, rename),
        Operation::FixVrs => match fix_vr::fix_vrs(path) {
            Ok(FixOutcome::Fixed(n)) => {
                FileResult::new(path, FileStatus::Ok).with_message(format!("{n} element(s) fixed"))
            }
            Ok(FixOutcome::Unchanged) => FileResult::new(path, FileStatus::Ok),
            Ok(FixOutcome::Skip(reason)) => {
                FileResult::new(path, FileStatus::Skip).with_message(reason)
            }
            Err(e) => failed(path, e),
        },
        Operation::ClearPreamble => match preamble::clear_preamble(path) {
            Ok(()) => FileResult::new(path, FileStatus::Ok),
            Err(EditorError::NotDicom(_)) => {
                FileResult::new(path, FileStatus::Skip).with_message("not a DICOM Part 10 file")
            }
            Err(e) => failed(path, e),
        },
        Operation::SetPatientId { base_depth } => {
            match patient_id::set_patient_id(path, *base_depth) {
                Ok(PatientIdOutcome::Updated(id)) => {
                    FileResult::new(path, FileStatus::Ok).with_message(format!("PatientID {id}"))
                }
                Ok(PatientIdOutcome::Unchanged) => FileResult::new(path, FileStatus::Skip)
                    .with_message("PatientID already matches the directory"),
                Ok(PatientIdOutcome::NotDicom) => {
                    FileResult::new(path, FileStatus::Skip).with_message("not a DICOM Part 10 file")
                }
                Ok(PatientIdOutcome::BaseDirectory) => FileResult::new(path, FileStatus::Failed)
                    .with_message("cannot process files in base directory"),
                Err(e) => failed(path, e),
            }
        }
    };
    info!("{result}");
    result
}

fn anonymize_one(anonymizer: &mut Anonymizer<'_>, path: &Path, rename: RenamePolicy) -> FileResult {
    let output = match rename {
        RenamePolicy::SuffixNoPhi => {
            if is_no_phi(path) {
                return FileResult::new(path, FileStatus::Skip)
                    .with_message("already de-identified");
            }
            no_phi_name(path)
        }
        RenamePolicy::InPlace | RenamePolicy::SopInstanceUid => path.to_path_buf(),
    };

    let result = match anonymizer.anonymize(path, &output) {
        Ok(AnonymizeStatus::Ok { output }) => FileResult::new(path, FileStatus::Ok).with_output(output),
        Ok(AnonymizeStatus::Skip(reason)) => {
            FileResult::new(path, FileStatus::Skip).with_message(reason)
        }
        Ok(AnonymizeStatus::Quarantine(reason)) => {
            FileResult::new(path, FileStatus::Quarantine).with_message(reason)
        }
        Err(e) => return failed(path, e),
    };

    if let Some(table) = anonymizer.integer_table_mut() {
        if table.is_dirty() {
            if let Err(e) = table.save() {
                return failed(path, e);
            }
        }
    }
    result
}

fn failed(path: &Path, e: EditorError) -> FileResult {
    error!("{}: {e}", path.display());
    FileResult::new(path, FileStatus::Failed).with_message(e.to_string())
}
