//
// elements.rs
// Dicom-Editor-rs
//
// Editor view of a dataset: element rows (including sequence items) with value previews, and
// manual single-element edits written back atomically.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;
use std::path::Path;

use dicom::core::value::Value;
use dicom::core::{PrimitiveValue, Tag, VR};
use dicom::object::{open_file, InMemDicomObject};
use serde::Serialize;
use tracing::info;

use crate::anonymize::typed_element;
use crate::atomic;
use crate::dicom_access::{dictionary_vr, tag_keyword, ElementAccess};
use crate::error::{EditorError, Result};
use crate::script::expr::{element_ref, ElementRef};
use crate::transcode::{rebuild_file_object, transfer_syntax_of};

const BINARY_PREVIEW_BYTES: usize = 16;

/// One line of the element table. Sequence items appear as rows with an `Item N` preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementRow {
    pub depth: usize,
    pub tag: String,
    pub keyword: String,
    pub vr: String,
    pub preview: String,
}

impl fmt::Display for ElementRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {} {} {}",
            "  ".repeat(self.depth),
            self.tag,
            self.keyword,
            self.vr,
            self.preview
        )
    }
}

pub fn list_elements(path: &Path, max_depth: usize, max_value_len: usize) -> Result<Vec<ElementRow>> {
    let obj = open_file(path).map_err(|_| EditorError::NotDicom(path.to_path_buf()))?;
    let mut rows = Vec::new();
    collect_rows(&obj, 0, max_depth, max_value_len, &mut rows);
    Ok(rows)
}

fn collect_rows(
    obj: &InMemDicomObject,
    depth: usize,
    max_depth: usize,
    max_value_len: usize,
    rows: &mut Vec<ElementRow>,
) {
    for elem in obj.iter() {
        let tag = elem.header().tag;
        let vr = elem.header().vr;
        let mut row = ElementRow {
            depth,
            tag: format_tag(tag),
            keyword: tag_keyword(tag).unwrap_or("UnknownTag").to_string(),
            vr: vr.to_string().to_owned(),
            preview: String::new(),
        };

        match elem.value() {
            Value::Primitive(p) => {
                row.preview = preview_primitive(p, max_value_len);
                rows.push(row);
            }
            Value::Sequence(seq) => {
                row.preview = format!("[sequence: {} item(s)]", seq.items().len());
                rows.push(row);
                if depth < max_depth {
                    for (idx, item) in seq.items().iter().enumerate() {
                        rows.push(ElementRow {
                            depth: depth + 1,
                            tag: format_tag(Tag(0xFFFE, 0xE000)),
                            keyword: "Item".into(),
                            vr: String::new(),
                            preview: format!("Item {}", idx + 1),
                        });
                        collect_rows(item, depth + 2, max_depth, max_value_len, rows);
                    }
                }
            }
            Value::PixelSequence(p) => {
                row.preview = format!("[encapsulated: {} fragment(s)]", p.fragments().len());
                rows.push(row);
            }
        }
    }
}

fn preview_primitive(value: &PrimitiveValue, max_value_len: usize) -> String {
    match value {
        PrimitiveValue::U8(bytes) => {
            let shown = bytes.len().min(BINARY_PREVIEW_BYTES);
            let mut preview = format!("{} bytes {}", bytes.len(), hex::encode(&bytes[..shown]));
            if shown < bytes.len() {
                preview.push('…');
            }
            preview
        }
        _ => {
            let text = value.to_str();
            if text.is_empty() {
                String::new()
            } else {
                truncate(&text, max_value_len)
            }
        }
    }
}

fn truncate(input: &str, limit: usize) -> String {
    if input.chars().count() <= limit {
        input.to_string()
    } else {
        let mut truncated: String = input.chars().take(limit).collect();
        truncated.push('…');
        truncated
    }
}

fn format_tag(tag: Tag) -> String {
    format!("({:04X},{:04X})", tag.group(), tag.element())
}

/// Accepts `(gggg,eeee)`, `[gggg,eeee]`, `ggggeeee` or a dictionary keyword.
pub fn parse_tag(text: &str) -> Result<Tag> {
    match element_ref(text) {
        Ok(ElementRef::Tag(tag)) => Ok(tag),
        Ok(ElementRef::This) => Err(EditorError::Dataset(
            "`this` does not name an element here".into(),
        )),
        Err(e) => Err(EditorError::Dataset(e)),
    }
}

/// Sets one element and rewrites the file in place. The element keeps its current VR, or takes
/// the dictionary VR when it is new.
pub fn set_element(path: &Path, tag: Tag, value: &str) -> Result<()> {
    let obj = open_file(path).map_err(|_| EditorError::NotDicom(path.to_path_buf()))?;
    let transfer_syntax = transfer_syntax_of(&obj);
    let sop_class = obj.meta().media_storage_sop_class_uid.clone();
    let sop_instance = obj.meta().media_storage_sop_instance_uid.clone();
    let mut dataset = obj.into_inner();

    let vr = dataset
        .element_vr(tag)
        .or_else(|| dictionary_vr(tag))
        .unwrap_or(VR::LO);
    dataset.put(typed_element(tag, vr, value.to_string())?);

    let file_obj = rebuild_file_object(dataset, &transfer_syntax, &sop_class, &sop_instance)?;
    atomic::write_dicom(&file_obj, path)?;
    info!("{} {} set in {}", format_tag(tag), vr, path.display());
    Ok(())
}
