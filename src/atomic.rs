//
// atomic.rs
// Dicom-Editor-rs
//
// Write-to-temp-then-rename helpers used for every file the tool produces.
//
// Thales Matheus Mendonça Santos - November 2025

use std::io::Write;
use std::path::Path;

use dicom::object::DefaultDicomObject;
use tempfile::NamedTempFile;

use crate::error::{EditorError, Result};

/// Creates an exclusive temp sibling of `target` so that the final rename stays on one filesystem.
fn temp_sibling(target: &Path) -> Result<NamedTempFile> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tempfile::Builder::new()
        .prefix(".dicom-editor-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| EditorError::io(dir, e))
}

fn commit(tmp: NamedTempFile, target: &Path) -> Result<()> {
    tmp.as_file()
        .sync_all()
        .map_err(|e| EditorError::io(tmp.path(), e))?;
    tmp.persist(target)
        .map_err(|e| EditorError::io(target, e.error))?;
    Ok(())
}

/// Write `bytes` to `target` via temp file, fsync and rename.
pub fn write_bytes(target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = temp_sibling(target)?;
    tmp.write_all(bytes)
        .map_err(|e| EditorError::io(tmp.path(), e))?;
    commit(tmp, target)
}

/// Write a Part-10 object to `target`; an interrupted write never leaves a partial file there.
pub fn write_dicom(obj: &DefaultDicomObject, target: &Path) -> Result<()> {
    let tmp = temp_sibling(target)?;
    obj.write_to_file(tmp.path()).map_err(EditorError::dataset)?;
    commit(tmp, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_bytes_replaces_existing_content() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("out.txt");
        std::fs::write(&target, b"old contents").expect("seed");

        write_bytes(&target, b"new").expect("atomic write");

        assert_eq!(std::fs::read(&target).expect("read back"), b"new");
        let leftovers = std::fs::read_dir(dir.path())
            .expect("list")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
