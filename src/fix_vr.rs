//
// fix_vr.rs
// Dicom-Editor-rs
//
// Re-types elements that were stored as UN (or with the wrong text VR) using the standard
// dictionary, then writes the file back atomically if anything changed.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::Path;

use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, VR};
use dicom::object::{open_file, InMemDicomObject};
use tracing::debug;

use crate::atomic;
use crate::dicom_access::dictionary_vr;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    Fixed(usize),
    Unchanged,
    Skip(String),
}

fn is_text_vr(vr: VR) -> bool {
    matches!(
        vr,
        VR::AE
            | VR::AS
            | VR::CS
            | VR::DA
            | VR::DS
            | VR::DT
            | VR::IS
            | VR::LO
            | VR::LT
            | VR::PN
            | VR::SH
            | VR::ST
            | VR::TM
            | VR::UC
            | VR::UI
            | VR::UR
            | VR::UT
    )
}

pub fn fix_vrs(path: &Path) -> Result<FixOutcome> {
    let mut obj = match open_file(path) {
        Ok(obj) => obj,
        Err(e) => {
            debug!("{} is not readable as DICOM: {e}", path.display());
            return Ok(FixOutcome::Skip("not a DICOM Part 10 file".into()));
        }
    };

    let changed = fix_dataset(&mut obj);
    if changed == 0 {
        return Ok(FixOutcome::Unchanged);
    }
    atomic::write_dicom(&obj, path)?;
    debug!("{}: {changed} element(s) re-typed", path.display());
    Ok(FixOutcome::Fixed(changed))
}

/// Returns the number of elements whose VR changed, counting nested items.
pub fn fix_dataset(dataset: &mut InMemDicomObject) -> usize {
    let mut changed = 0;
    let mut replacements = Vec::new();

    for elem in dataset.iter() {
        let tag = elem.header().tag;
        let vr = elem.header().vr;
        match elem.value() {
            Value::Primitive(value) => {
                let Some(target) = dictionary_vr(tag) else {
                    continue;
                };
                if target == vr {
                    continue;
                }
                let retyped = if vr == VR::UN {
                    decode_unknown(target, &value.to_bytes())
                } else if is_text_vr(vr) && is_text_vr(target) {
                    Some(value.clone())
                } else {
                    None
                };
                if let Some(value) = retyped {
                    changed += 1;
                    replacements.push(DataElement::new(tag, target, value));
                }
            }
            Value::Sequence(seq) => {
                let mut items = seq.items().to_vec();
                let nested: usize = items.iter_mut().map(fix_dataset).sum();
                if nested > 0 {
                    changed += nested;
                    replacements.push(DataElement::new(
                        tag,
                        VR::SQ,
                        Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
                    ));
                }
            }
            Value::PixelSequence(_) => {}
        }
    }

    for elem in replacements {
        dataset.put(elem);
    }
    changed
}

/// Decodes little-endian UN bytes as `vr`. `None` leaves the element alone.
fn decode_unknown(vr: VR, bytes: &[u8]) -> Option<PrimitiveValue> {
    if is_text_vr(vr) {
        let text = String::from_utf8_lossy(bytes);
        return Some(PrimitiveValue::from(
            text.trim_end_matches(['\0', ' ']).to_string(),
        ));
    }
    macro_rules! numbers {
        ($ty:ty, $width:expr, $variant:ident) => {{
            if bytes.len() % $width != 0 {
                return None;
            }
            let values: Vec<$ty> = bytes
                .chunks_exact($width)
                .map(|c| {
                    let mut buf = [0u8; $width];
                    buf.copy_from_slice(c);
                    <$ty>::from_le_bytes(buf)
                })
                .collect();
            Some(PrimitiveValue::$variant(values.into()))
        }};
    }
    match vr {
        VR::US => numbers!(u16, 2, U16),
        VR::SS => numbers!(i16, 2, I16),
        VR::UL => numbers!(u32, 4, U32),
        VR::SL => numbers!(i32, 4, I32),
        VR::FL => numbers!(f32, 4, F32),
        VR::FD => numbers!(f64, 8, F64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom_access::ElementAccess;
    use dicom::core::Tag;

    #[test]
    fn un_elements_take_dictionary_vrs() {
        let mut dataset = InMemDicomObject::new_empty();
        dataset.put(DataElement::new(
            Tag(0x0010, 0x0020),
            VR::UN,
            PrimitiveValue::from(b"12345 ".to_vec()),
        ));
        dataset.put(DataElement::new(
            Tag(0x0028, 0x0010),
            VR::UN,
            PrimitiveValue::from(vec![0x00u8, 0x02]),
        ));

        assert_eq!(fix_dataset(&mut dataset), 2);
        assert_eq!(dataset.element_vr(Tag(0x0010, 0x0020)), Some(VR::LO));
        assert_eq!(dataset.element_str(Tag(0x0010, 0x0020)).as_deref(), Some("12345"));
        let rows = dataset.element(Tag(0x0028, 0x0010)).unwrap();
        assert_eq!(rows.header().vr, VR::US);
        assert_eq!(rows.to_int::<u16>().unwrap(), 512);
    }

    #[test]
    fn mislabelled_text_is_relabelled() {
        let mut dataset = InMemDicomObject::new_empty();
        dataset.put(DataElement::new(
            Tag(0x0008, 0x0060),
            VR::LO,
            PrimitiveValue::from("CT"),
        ));
        assert_eq!(fix_dataset(&mut dataset), 1);
        assert_eq!(dataset.element_vr(Tag(0x0008, 0x0060)), Some(VR::CS));
        assert_eq!(fix_dataset(&mut dataset), 0);
    }

    #[test]
    fn nested_items_are_fixed() {
        let mut item = InMemDicomObject::new_empty();
        item.put(DataElement::new(
            Tag(0x0008, 0x1150),
            VR::UN,
            PrimitiveValue::from(b"1.2.3\0".to_vec()),
        ));
        let mut dataset = InMemDicomObject::new_empty();
        dataset.put(DataElement::new(
            Tag(0x0008, 0x1140),
            VR::SQ,
            Value::Sequence(DataSetSequence::new(vec![item], Length::UNDEFINED)),
        ));
        assert_eq!(fix_dataset(&mut dataset), 1);
        let seq = dataset.element(Tag(0x0008, 0x1140)).unwrap();
        let items = seq.items().unwrap();
        assert_eq!(items[0].element_vr(Tag(0x0008, 0x1150)), Some(VR::UI));
    }
}
