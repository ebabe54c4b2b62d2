//
// anonymize.rs
// Dicom-Editor-rs
//
// Applies a compiled de-identification script to one Part-10 file: per-element edits, group
// policies, optional Implicit VR LE output, optional SOP Instance UID naming, atomic write.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom::object::mem::InMemElement;
use dicom::object::{open_file, InMemDicomObject};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::atomic;
use crate::dicom_access::{dictionary_vr, ElementAccess};
use crate::error::{EditorError, Result};
use crate::integer_table::IntegerTable;
use crate::lookup::LookupTable;
use crate::script::expr::{EvalContext, Outcome};
use crate::script::CompiledScript;
use crate::transcode::{
    implicit_vr_little_endian, native_pixel_data, rebuild_file_object, transfer_syntax_of,
    PIXEL_DATA, SOP_INSTANCE_UID,
};

static UID_FILE_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnonymizeOptions {
    pub force_ivrle: bool,
    pub rename_to_sop_instance_uid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnonymizeStatus {
    Ok { output: PathBuf },
    Skip(String),
    Quarantine(String),
}

enum Edit {
    Set(String),
    Remove,
}

/// Per-run anonymizer: the script, lookup table and integer table stay fixed across files.
pub struct Anonymizer<'a> {
    script: &'a CompiledScript,
    lookup: &'a LookupTable,
    integers: Option<&'a mut IntegerTable>,
    options: AnonymizeOptions,
}

impl<'a> Anonymizer<'a> {
    pub fn new(
        script: &'a CompiledScript,
        lookup: &'a LookupTable,
        integers: Option<&'a mut IntegerTable>,
        options: AnonymizeOptions,
    ) -> Self {
        Self {
            script,
            lookup,
            integers,
            options,
        }
    }

    pub fn set_rename_to_sop_instance_uid(&mut self, value: bool) {
        self.options.rename_to_sop_instance_uid = value;
    }

    pub fn integer_table_mut(&mut self) -> Option<&mut IntegerTable> {
        self.integers.as_deref_mut()
    }

    /// Anonymize `input` into `output`. The input is never modified unless both paths are equal,
    /// and a quarantined file produces no output at all.
    pub fn anonymize(&mut self, input: &Path, output: &Path) -> Result<AnonymizeStatus> {
        let obj = match open_file(input) {
            Ok(obj) => obj,
            Err(e) => {
                debug!("{} is not readable as DICOM: {e}", input.display());
                return Ok(AnonymizeStatus::Skip("not a DICOM Part 10 file".into()));
            }
        };

        let source_ts = transfer_syntax_of(&obj);
        let source_sop_class = obj.meta().media_storage_sop_class_uid.clone();
        let source_sop_instance = obj.meta().media_storage_sop_instance_uid.clone();
        let native_pixels = if self.options.force_ivrle {
            native_pixel_data(&obj)?
        } else {
            None
        };
        let mut dataset = obj.into_inner();

        let edits = match self.evaluate(&dataset) {
            Ok(edits) => edits,
            Err(reason) => {
                info!("quarantined {}: {reason}", input.display());
                return Ok(AnonymizeStatus::Quarantine(reason));
            }
        };
        for (tag, edit) in edits {
            match edit {
                Edit::Remove => {
                    dataset.remove_element(tag);
                }
                Edit::Set(text) => {
                    let vr = dataset
                        .element_vr(tag)
                        .or_else(|| dictionary_vr(tag))
                        .unwrap_or(VR::LO);
                    dataset.put(typed_element(tag, vr, text)?);
                }
            }
        }
        apply_group_policies(&mut dataset, self.script, true);

        let transfer_syntax = if self.options.force_ivrle {
            restore_native_pixels(&mut dataset, native_pixels);
            implicit_vr_little_endian().to_string()
        } else {
            source_ts
        };

        let target = self.output_path(&dataset, output);
        let file_obj = rebuild_file_object(
            dataset,
            &transfer_syntax,
            &source_sop_class,
            &source_sop_instance,
        )?;
        atomic::write_dicom(&file_obj, &target)?;
        debug!("anonymized {} -> {}", input.display(), target.display());
        Ok(AnonymizeStatus::Ok { output: target })
    }

    /// Runs every rule against the dataset as read. The error is a quarantine reason.
    fn evaluate(&mut self, dataset: &InMemDicomObject) -> Result<Vec<(Tag, Edit)>, String> {
        let mut ctx = EvalContext {
            dataset,
            lookup: self.lookup,
            integers: self.integers.as_deref_mut(),
        };
        let mut edits = Vec::new();
        for rule in &self.script.rules {
            if !rule.expression.always && !dataset.has_element(rule.tag) {
                continue;
            }
            match rule.expression.evaluate(rule.tag, &mut ctx) {
                Outcome::Keep => {}
                Outcome::Remove => edits.push((rule.tag, Edit::Remove)),
                Outcome::Value(text) => edits.push((rule.tag, Edit::Set(text))),
                Outcome::Quarantine(reason) => {
                    let name = if rule.label.is_empty() {
                        format!("({:04X},{:04X})", rule.tag.group(), rule.tag.element())
                    } else {
                        rule.label.clone()
                    };
                    return Err(format!("{name}: {reason}"));
                }
            }
        }
        Ok(edits)
    }

    fn output_path(&self, dataset: &InMemDicomObject, output: &Path) -> PathBuf {
        if !self.options.rename_to_sop_instance_uid {
            return output.to_path_buf();
        }
        match dataset.element_str(SOP_INSTANCE_UID).filter(|uid| !uid.is_empty()) {
            Some(uid) if is_uid_file_name(&uid) => output.with_file_name(format!("{uid}.dcm")),
            Some(uid) => {
                warn!(
                    "SOP Instance UID {uid:?} is not usable as a file name; keeping output name {}",
                    output.display()
                );
                output.to_path_buf()
            }
            None => {
                warn!(
                    "no SOP Instance UID; keeping output name {}",
                    output.display()
                );
                output.to_path_buf()
            }
        }
    }
}

/// Digits and dots only, so the name cannot leave the output directory.
fn is_uid_file_name(uid: &str) -> bool {
    UID_FILE_NAME_REGEX
        .get_or_init(|| Regex::new(r"^[0-9]+(\.[0-9]+)*$").expect("static regex"))
        .is_match(uid)
}

/// Puts decoded pixels back, unless the script or a group policy removed the pixel data.
fn restore_native_pixels(dataset: &mut InMemDicomObject, pixels: Option<InMemElement>) {
    match pixels {
        Some(pixels) if dataset.has_element(PIXEL_DATA) => {
            dataset.put(pixels);
        }
        Some(_) => debug!("pixel data was removed; nothing to transcode"),
        None => {}
    }
}

/// One-shot convenience wrapper around [`Anonymizer`].
pub fn anonymize(
    input: &Path,
    output: &Path,
    script: &CompiledScript,
    lookup: &LookupTable,
    integers: Option<&mut IntegerTable>,
    options: AnonymizeOptions,
) -> Result<AnonymizeStatus> {
    Anonymizer::new(script, lookup, integers, options).anonymize(input, output)
}

/// Removes whatever the group policies select, recursing into sequence items.
pub fn apply_group_policies(dataset: &mut InMemDicomObject, script: &CompiledScript, top_level: bool) {
    let tags: Vec<Tag> = dataset.iter().map(|e| e.header().tag).collect();
    for tag in tags {
        if script.removes(tag, top_level) {
            dataset.remove_element(tag);
            continue;
        }
        let items = match dataset.element(tag).map(|e| e.value()) {
            Ok(Value::Sequence(seq)) => seq.items().to_vec(),
            _ => continue,
        };
        let items: Vec<InMemDicomObject> = items
            .into_iter()
            .map(|mut item| {
                apply_group_policies(&mut item, script, false);
                item
            })
            .collect();
        dataset.put(DataElement::new(
            tag,
            VR::SQ,
            Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
        ));
    }
}

/// Encodes a script result with the element's VR.
pub(crate) fn typed_element(
    tag: Tag,
    vr: VR,
    text: String,
) -> Result<InMemElement> {
    fn parse_all<T: std::str::FromStr>(tag: Tag, vr: VR, text: &str) -> Result<Vec<T>> {
        text.split('\\')
            .map(|v| {
                v.trim().parse::<T>().map_err(|_| {
                    EditorError::ScriptEval(format!(
                        "({:04X},{:04X}) value {text:?} is not valid for VR {vr:?}",
                        tag.group(),
                        tag.element()
                    ))
                })
            })
            .collect()
    }

    if text.is_empty() {
        if vr == VR::SQ {
            return Ok(DataElement::new(
                tag,
                vr,
                Value::Sequence(DataSetSequence::new(Vec::new(), Length::UNDEFINED)),
            ));
        }
        return Ok(DataElement::new(tag, vr, PrimitiveValue::Empty));
    }

    let value = match vr {
        VR::US => PrimitiveValue::U16(parse_all::<u16>(tag, vr, &text)?.into()),
        VR::SS => PrimitiveValue::I16(parse_all::<i16>(tag, vr, &text)?.into()),
        VR::UL => PrimitiveValue::U32(parse_all::<u32>(tag, vr, &text)?.into()),
        VR::SL => PrimitiveValue::I32(parse_all::<i32>(tag, vr, &text)?.into()),
        VR::FL => PrimitiveValue::F32(parse_all::<f32>(tag, vr, &text)?.into()),
        VR::FD => PrimitiveValue::F64(parse_all::<f64>(tag, vr, &text)?.into()),
        VR::OB | VR::OW | VR::UN => PrimitiveValue::from(text.into_bytes()),
        VR::SQ => {
            return Err(EditorError::ScriptEval(format!(
                "({:04X},{:04X}) is a sequence and only accepts an empty value",
                tag.group(),
                tag.element()
            )))
        }
        _ => PrimitiveValue::from(text),
    };
    Ok(DataElement::new(tag, vr, value))
}
