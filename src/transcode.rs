//
// transcode.rs
// Dicom-Editor-rs
//
// Transfer syntax handling for rewritten objects: file meta regeneration and native pixel data
// for objects that must leave in Implicit VR Little Endian.
//
// Thales Matheus Mendonça Santos - November 2025

use dicom::core::value::Value;
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::mem::InMemElement;
use dicom::object::{DefaultDicomObject, FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom::pixeldata::PixelDecoder;
use dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, VoiLutOption};
use tracing::debug;

use crate::dicom_access::ElementAccess;
use crate::error::{EditorError, Result};

pub const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);
pub const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
pub const SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);

pub fn implicit_vr_little_endian() -> &'static str {
    IMPLICIT_VR_LITTLE_ENDIAN.uid()
}

/// Transfer syntax UID recorded in the file meta group, without padding.
pub fn transfer_syntax_of(obj: &DefaultDicomObject) -> String {
    obj.meta()
        .transfer_syntax()
        .trim_end_matches(['\0', ' '])
        .to_string()
}

pub fn has_encapsulated_pixels(obj: &InMemDicomObject) -> bool {
    matches!(
        obj.element(PIXEL_DATA).map(|e| e.value()),
        Ok(Value::PixelSequence(_))
    )
}

/// Decodes encapsulated pixel data into a native OB/OW element. Returns `None` when the
/// pixel data is already native or absent.
pub fn native_pixel_data(
    obj: &DefaultDicomObject,
) -> Result<Option<InMemElement>> {
    if !has_encapsulated_pixels(obj) {
        return Ok(None);
    }

    // Raw stored values: no modality or VOI LUT, so pixel meaning is unchanged.
    let decoded = obj.decode_pixel_data().map_err(EditorError::dataset)?;
    let options = ConvertOptions::new()
        .with_modality_lut(ModalityLutOption::None)
        .with_voi_lut(VoiLutOption::Identity);
    let bits_allocated = decoded.bits_allocated();
    let (vr, bytes) = if bits_allocated > 8 {
        let words = decoded
            .to_vec_with_options::<u16>(&options)
            .map_err(EditorError::dataset)?;
        (
            VR::OW,
            words.into_iter().flat_map(|v| v.to_le_bytes()).collect(),
        )
    } else {
        let bytes = decoded
            .to_vec_with_options::<u8>(&options)
            .map_err(EditorError::dataset)?;
        (VR::OB, bytes)
    };
    debug!(
        "decoded {} bytes of encapsulated pixel data ({} bits allocated)",
        bytes.len(),
        bits_allocated
    );

    Ok(Some(DataElement::new(
        PIXEL_DATA,
        vr,
        PrimitiveValue::from(bytes),
    )))
}

/// Wraps a dataset in a freshly built file meta group. SOP class and instance come from the
/// dataset itself, falling back to the values of the source meta group.
pub fn rebuild_file_object(
    dataset: InMemDicomObject,
    transfer_syntax: &str,
    fallback_sop_class: &str,
    fallback_sop_instance: &str,
) -> Result<DefaultDicomObject> {
    let sop_class = dataset
        .element_str(SOP_CLASS_UID)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback_sop_class.trim_end_matches('\0').to_string());
    let sop_instance = dataset
        .element_str(SOP_INSTANCE_UID)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback_sop_instance.trim_end_matches('\0').to_string());

    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(transfer_syntax)
        .media_storage_sop_class_uid(sop_class.as_str())
        .media_storage_sop_instance_uid(sop_instance.as_str())
        .build()
        .map_err(EditorError::dataset)?;

    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for elem in dataset {
        file_obj.put(elem);
    }
    Ok(file_obj)
}
