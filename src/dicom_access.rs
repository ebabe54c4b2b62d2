use dicom::core::dictionary::{DataDictionary, VirtualVr};
use dicom::core::{Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{DefaultDicomObject, InMemDicomObject};

/// Small helper trait to pull string values and VRs from different DICOM object shapes.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;
    fn has_element(&self, tag: Tag) -> bool;
    fn element_vr(&self, tag: Tag) -> Option<VR>;
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }

    fn element_vr(&self, tag: Tag) -> Option<VR> {
        self.element(tag).ok().map(|e| e.header().vr)
    }
}

impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        (**self).element_str(tag)
    }

    fn has_element(&self, tag: Tag) -> bool {
        (**self).has_element(tag)
    }

    fn element_vr(&self, tag: Tag) -> Option<VR> {
        (**self).element_vr(tag)
    }
}

/// VR declared by the standard dictionary when it names exactly one.
pub fn dictionary_vr(tag: Tag) -> Option<VR> {
    match StandardDataDictionary.by_tag(tag)?.vr {
        VirtualVr::Exact(vr) => Some(vr),
        _ => None,
    }
}

/// Dictionary keyword for a tag, if it has one.
pub fn tag_keyword(tag: Tag) -> Option<&'static str> {
    StandardDataDictionary.by_tag(tag).map(|e| e.alias)
}

/// Tag for a dictionary keyword such as `PatientID`.
pub fn keyword_tag(keyword: &str) -> Option<Tag> {
    StandardDataDictionary.by_name(keyword).map(|e| e.tag.inner())
}
