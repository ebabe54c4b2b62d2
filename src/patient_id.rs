//
// patient_id.rs
// Dicom-Editor-rs
//
// Sets PatientID from the first directory level below the selected root.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::Path;

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::open_file;
use tracing::debug;

use crate::atomic;
use crate::batch::{self, FileFilter, Operation, RenamePolicy};
use crate::dicom_access::ElementAccess;
use crate::error::Result;
use crate::models::BatchReport;

pub const PATIENT_ID: Tag = Tag(0x0010, 0x0020);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatientIdOutcome {
    Updated(String),
    Unchanged,
    NotDicom,
    /// The file sits directly in the root, so there is no directory name to use.
    BaseDirectory,
}

/// Number of path components of the selected root.
pub fn base_depth(root: &Path) -> usize {
    root.components().count()
}

/// Directory name at `base_depth` for files at least two levels below the root.
pub fn directory_patient_id(path: &Path, base_depth: usize) -> Option<String> {
    let components: Vec<_> = path.components().collect();
    if components.len() < base_depth + 2 {
        return None;
    }
    Some(components[base_depth].as_os_str().to_string_lossy().into_owned())
}

pub fn set_patient_id(path: &Path, base_depth: usize) -> Result<PatientIdOutcome> {
    let Some(name) = directory_patient_id(path, base_depth) else {
        return Ok(PatientIdOutcome::BaseDirectory);
    };
    let mut obj = match open_file(path) {
        Ok(obj) => obj,
        Err(e) => {
            debug!("{} is not readable as DICOM: {e}", path.display());
            return Ok(PatientIdOutcome::NotDicom);
        }
    };
    if obj.element_str(PATIENT_ID).as_deref() == Some(name.as_str()) {
        return Ok(PatientIdOutcome::Unchanged);
    }

    obj.put(DataElement::new(
        PATIENT_ID,
        VR::LO,
        PrimitiveValue::from(name.as_str()),
    ));
    atomic::write_dicom(&obj, path)?;
    Ok(PatientIdOutcome::Updated(name))
}

/// Walks every file below `root`, recursively.
pub fn set_patient_ids(root: &Path, filter: &FileFilter) -> BatchReport {
    let mut op = Operation::SetPatientId {
        base_depth: base_depth(root),
    };
    batch::run(root, &mut op, filter, true, RenamePolicy::InPlace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_name_comes_from_the_first_level_below_root() {
        let root = Path::new("/data/trial");
        let depth = base_depth(root);
        assert_eq!(
            directory_patient_id(Path::new("/data/trial/PtA/s1/a.dcm"), depth).as_deref(),
            Some("PtA")
        );
        assert_eq!(
            directory_patient_id(Path::new("/data/trial/PtB/b.dcm"), depth).as_deref(),
            Some("PtB")
        );
        assert_eq!(directory_patient_id(Path::new("/data/trial/c.dcm"), depth), None);
    }
}
