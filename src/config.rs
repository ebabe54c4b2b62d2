//
// config.rs
// Dicom-Editor-rs
//
// Persistent settings record loaded from a properties file and passed explicitly to each command.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::batch::RenamePolicy;
use crate::error::Result;
use crate::properties::Properties;

pub const DEFAULT_CONFIG_FILE: &str = "dicomeditor.properties";
pub const DEFAULT_SCRIPT_FILE: &str = "dicom-anonymizer.script";
pub const DEFAULT_LOOKUP_FILE: &str = "lookup-table.properties";

pub const MIN_WIDTH: u32 = 550;
pub const MIN_HEIGHT: u32 = 600;

/// Window placement as stored in the `x`/`y`/`w`/`h` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct Configuration {
    path: PathBuf,
    props: Properties,
}

impl Configuration {
    /// Load settings; a missing file means every key takes its default.
    pub fn load(path: &Path) -> Result<Self> {
        let props = Properties::load(path)?;
        debug!("configuration {}: {} keys", path.display(), props.len());
        Ok(Self {
            path: path.to_path_buf(),
            props,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key)
    }

    pub fn put(&mut self, key: &str, value: impl Into<String>) {
        self.props.insert(key, value);
    }

    pub fn store(&self) -> Result<()> {
        self.props.store(&self.path)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(value) => value.trim().eq_ignore_ascii_case("yes"),
            None => default,
        }
    }

    pub fn change_name(&self) -> bool {
        self.flag("change-name", true)
    }

    pub fn use_sop_instance_uid(&self) -> bool {
        self.flag("use-sopiuid", false)
    }

    pub fn set_change_name(&mut self, value: bool) {
        self.put("change-name", if value { "yes" } else { "no" });
    }

    pub fn set_use_sop_instance_uid(&mut self, value: bool) {
        self.put("use-sopiuid", if value { "yes" } else { "no" });
    }

    /// Naming policy implied by the two checkboxes; the SOP Instance UID option wins.
    pub fn rename_policy(&self) -> RenamePolicy {
        if self.use_sop_instance_uid() {
            RenamePolicy::SopInstanceUid
        } else if self.change_name() {
            RenamePolicy::SuffixNoPhi
        } else {
            RenamePolicy::InPlace
        }
    }

    fn path_setting(&self, key: &str, default: &str) -> PathBuf {
        PathBuf::from(self.get(key).filter(|v| !v.trim().is_empty()).unwrap_or(default))
    }

    pub fn script_file(&self) -> PathBuf {
        self.path_setting("dicom-script", DEFAULT_SCRIPT_FILE)
    }

    pub fn lookup_table_file(&self) -> PathBuf {
        self.path_setting("lookup-table", DEFAULT_LOOKUP_FILE)
    }

    pub fn integer_table_file(&self) -> Option<PathBuf> {
        self.get("integer-table")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }

    /// Stored geometry clamped to the minimum window size, if all four keys parse.
    pub fn geometry(&self) -> Option<Geometry> {
        let int = |key: &str| self.get(key).and_then(|v| v.trim().parse::<i64>().ok());
        let (x, y, w, h) = (int("x")?, int("y")?, int("w")?, int("h")?);
        Some(Geometry {
            x: x.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            y: y.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            width: w.clamp(MIN_WIDTH as i64, u32::MAX as i64) as u32,
            height: h.clamp(MIN_HEIGHT as i64, u32::MAX as i64) as u32,
        })
    }

    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.put("x", geometry.x.to_string());
        self.put("y", geometry.y.to_string());
        self.put("w", geometry.width.max(MIN_WIDTH).to_string());
        self.put("h", geometry.height.max(MIN_HEIGHT).to_string());
    }
}
