//
// preamble.rs
// Dicom-Editor-rs
//
// Zeroes the 128-byte preamble of a Part-10 file in place after checking the DICM magic.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{EditorError, Result};

pub const PREAMBLE_LEN: usize = 128;
pub const MAGIC: &[u8; 4] = b"DICM";

/// Overwrites bytes 0..128 with zeros. Length and every byte from offset 128 on are untouched.
pub fn clear_preamble(path: &Path) -> Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| EditorError::io(path, e))?;

    let mut magic = [0u8; 4];
    file.seek(SeekFrom::Start(PREAMBLE_LEN as u64))
        .map_err(|e| EditorError::io(path, e))?;
    match file.read_exact(&mut magic) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            return Err(EditorError::NotDicom(path.to_path_buf()))
        }
        Err(e) => return Err(EditorError::io(path, e)),
    }
    if &magic != MAGIC {
        return Err(EditorError::NotDicom(path.to_path_buf()));
    }

    file.seek(SeekFrom::Start(0))
        .map_err(|e| EditorError::io(path, e))?;
    file.write_all(&[0u8; PREAMBLE_LEN])
        .map_err(|e| EditorError::io(path, e))?;
    file.sync_all().map_err(|e| EditorError::io(path, e))?;
    debug!("cleared preamble of {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn part10_bytes(preamble_byte: u8, magic: &[u8; 4]) -> Vec<u8> {
        let mut bytes = vec![preamble_byte; PREAMBLE_LEN];
        bytes.extend_from_slice(magic);
        bytes.extend_from_slice(&[0x02, 0x00, 0x10, 0x00, b'U', b'I']);
        bytes
    }

    #[test]
    fn zeroes_preamble_and_keeps_the_rest() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.dcm");
        let original = part10_bytes(0xAB, MAGIC);
        std::fs::write(&path, &original).expect("seed");

        clear_preamble(&path).expect("clear");
        let first = std::fs::read(&path).expect("read");
        assert_eq!(first.len(), original.len());
        assert!(first[..PREAMBLE_LEN].iter().all(|b| *b == 0));
        assert_eq!(&first[PREAMBLE_LEN..], &original[PREAMBLE_LEN..]);

        clear_preamble(&path).expect("clear twice");
        assert_eq!(std::fs::read(&path).expect("read"), first);
    }

    #[test]
    fn wrong_magic_is_rejected_without_changes() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("junk.dcm");
        let original = part10_bytes(0x11, b"JUNK");
        std::fs::write(&path, &original).expect("seed");

        assert!(matches!(clear_preamble(&path), Err(EditorError::NotDicom(_))));
        assert_eq!(std::fs::read(&path).expect("read"), original);
    }

    #[test]
    fn short_file_is_not_dicom() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tiny.bin");
        std::fs::write(&path, b"tiny").expect("seed");
        assert!(matches!(clear_preamble(&path), Err(EditorError::NotDicom(_))));
    }
}
