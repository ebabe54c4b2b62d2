//
// mod.rs
// Dicom-Editor-rs
//
// In-memory de-identification profile: an ordered list of parameter, element, remove, and keep directives.
//
// Thales Matheus Mendonça Santos - November 2025

pub mod codec;
pub mod expr;

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use dicom::core::Tag;
use regex::Regex;

use crate::error::{EditorError, Result};

pub use codec::{from_properties, load, save, to_properties};
pub use expr::CompiledScript;

static ELEMENT_TAG_REGEX: OnceLock<Regex> = OnceLock::new();

/// Directive variant; the letter is also the element name in the script file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Param,
    Element,
    Remove,
    Keep,
}

impl DirectiveKind {
    pub fn letter(self) -> &'static str {
        match self {
            DirectiveKind::Param => "p",
            DirectiveKind::Element => "e",
            DirectiveKind::Remove => "r",
            DirectiveKind::Keep => "k",
        }
    }
}

impl FromStr for DirectiveKind {
    type Err = EditorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "p" => Ok(DirectiveKind::Param),
            "e" => Ok(DirectiveKind::Element),
            "r" => Ok(DirectiveKind::Remove),
            "k" => Ok(DirectiveKind::Keep),
            other => Err(EditorError::ScriptParse(format!(
                "unknown directive kind {other:?}"
            ))),
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

/// Identity of a directive within a script: `(variant, tag-or-selector)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectiveKey {
    pub kind: DirectiveKind,
    pub key: String,
}

impl DirectiveKey {
    pub fn new(kind: DirectiveKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl fmt::Display for DirectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.key)
    }
}

/// Eight hex digits, group then element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementTag(pub Tag);

impl ElementTag {
    pub fn tag(self) -> Tag {
        self.0
    }
}

impl FromStr for ElementTag {
    type Err = EditorError;

    fn from_str(s: &str) -> Result<Self> {
        let regex = ELEMENT_TAG_REGEX
            .get_or_init(|| Regex::new(r"^[0-9A-Fa-f]{8}$").expect("static regex"));
        let s = s.trim();
        if !regex.is_match(s) {
            return Err(EditorError::ScriptParse(format!(
                "element tag {s:?} is not 8 hexadecimal digits"
            )));
        }
        let group = u16::from_str_radix(&s[..4], 16).map_err(|e| EditorError::ScriptParse(e.to_string()))?;
        let element = u16::from_str_radix(&s[4..], 16).map_err(|e| EditorError::ScriptParse(e.to_string()))?;
        Ok(ElementTag(Tag(group, element)))
    }
}

impl fmt::Display for ElementTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}{:04x}", self.0.group(), self.0.element())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Named macro, always active.
    Param { name: String, body: String },
    Element {
        enabled: bool,
        tag: ElementTag,
        label: String,
        body: String,
    },
    Remove {
        enabled: bool,
        selector: String,
        text: String,
    },
    Keep {
        enabled: bool,
        selector: String,
        text: String,
    },
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Directive::Param { .. } => DirectiveKind::Param,
            Directive::Element { .. } => DirectiveKind::Element,
            Directive::Remove { .. } => DirectiveKind::Remove,
            Directive::Keep { .. } => DirectiveKind::Keep,
        }
    }

    pub fn key(&self) -> DirectiveKey {
        let key = match self {
            Directive::Param { name, .. } => name.clone(),
            Directive::Element { tag, .. } => tag.to_string(),
            Directive::Remove { selector, .. } | Directive::Keep { selector, .. } => {
                selector.clone()
            }
        };
        DirectiveKey::new(self.kind(), key)
    }

    /// Parameters carry no flag and are always enabled.
    pub fn is_enabled(&self) -> bool {
        match self {
            Directive::Param { .. } => true,
            Directive::Element { enabled, .. }
            | Directive::Remove { enabled, .. }
            | Directive::Keep { enabled, .. } => *enabled,
        }
    }

    pub fn set_enabled(&mut self, value: bool) {
        match self {
            Directive::Param { .. } => {}
            Directive::Element { enabled, .. }
            | Directive::Remove { enabled, .. }
            | Directive::Keep { enabled, .. } => *enabled = value,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Directive::Param { body, .. } | Directive::Element { body, .. } => body,
            Directive::Remove { text, .. } | Directive::Keep { text, .. } => text,
        }
    }

    pub fn set_body(&mut self, value: impl Into<String>) {
        match self {
            Directive::Param { body, .. } | Directive::Element { body, .. } => *body = value.into(),
            Directive::Remove { text, .. } | Directive::Keep { text, .. } => *text = value.into(),
        }
    }

    /// Label shown next to the checkbox in the editor.
    pub fn display_label(&self) -> String {
        match self {
            Directive::Param { name, .. } => name.clone(),
            Directive::Element { tag, label, .. } => {
                let t = tag.to_string();
                format!("[{},{}] {}", &t[..4], &t[4..], label)
            }
            Directive::Remove { selector, text, .. } => match selector.as_str() {
                "privategroups" => "Remove private groups [recommended]".into(),
                "unspecifiedelements" => "Remove unchecked elements".into(),
                "overlays" => "Remove overlays (groups 60xx)".into(),
                _ => text.clone(),
            },
            Directive::Keep { selector, text, .. } => match selector.as_str() {
                "group18" => "Keep group 18 [recommended]".into(),
                "group20" => "Keep group 20 [recommended]".into(),
                "group28" => "Keep group 28 [recommended]".into(),
                _ => text.clone(),
            },
        }
    }
}

/// Ordered sequence of directives with unique identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    directives: Vec<Directive>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    fn position(&self, key: &DirectiveKey) -> Option<usize> {
        self.directives.iter().position(|d| d.key() == *key)
    }

    pub fn get(&self, key: &DirectiveKey) -> Option<&Directive> {
        self.position(key).map(|idx| &self.directives[idx])
    }

    /// Appends a directive; an identity already present is an error.
    pub fn push(&mut self, directive: Directive) -> Result<()> {
        let key = directive.key();
        if self.position(&key).is_some() {
            return Err(EditorError::ScriptParse(format!(
                "duplicate directive {key}"
            )));
        }
        self.directives.push(directive);
        Ok(())
    }

    /// Inserts or replaces in place, keeping the earlier position. Returns true on replacement.
    pub fn upsert(&mut self, directive: Directive) -> bool {
        match self.position(&directive.key()) {
            Some(idx) => {
                self.directives[idx] = directive;
                true
            }
            None => {
                self.directives.push(directive);
                false
            }
        }
    }

    pub fn set_enabled(&mut self, key: &DirectiveKey, enabled: bool) -> Result<()> {
        let idx = self.require(key)?;
        self.directives[idx].set_enabled(enabled);
        Ok(())
    }

    pub fn set_body(&mut self, key: &DirectiveKey, body: impl Into<String>) -> Result<()> {
        let idx = self.require(key)?;
        self.directives[idx].set_body(body);
        Ok(())
    }

    pub fn uncheck_all(&mut self) {
        for directive in &mut self.directives {
            directive.set_enabled(false);
        }
    }

    /// Directives left visible by "show checked elements only".
    pub fn checked(&self) -> impl Iterator<Item = &Directive> {
        self.directives.iter().filter(|d| d.is_enabled())
    }

    /// Parameter body by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.directives.iter().find_map(|d| match d {
            Directive::Param { name: n, body } if n == name => Some(body.as_str()),
            _ => None,
        })
    }

    fn require(&self, key: &DirectiveKey) -> Result<usize> {
        self.position(key)
            .ok_or_else(|| EditorError::ScriptEval(format!("no directive {key} in script")))
    }
}

impl FromIterator<Directive> for Script {
    fn from_iter<T: IntoIterator<Item = Directive>>(iter: T) -> Self {
        let mut script = Script::new();
        for directive in iter {
            script.upsert(directive);
        }
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str, body: &str) -> Directive {
        Directive::Element {
            enabled: true,
            tag: tag.parse().expect("tag"),
            label: "PatientName".into(),
            body: body.into(),
        }
    }

    #[test]
    fn element_tags_must_be_eight_hex_digits() {
        assert!("00100010".parse::<ElementTag>().is_ok());
        assert!("7FE00010".parse::<ElementTag>().is_ok());
        assert!("0010001".parse::<ElementTag>().is_err());
        assert!("0010001G".parse::<ElementTag>().is_err());
        assert_eq!(
            "7FE00010".parse::<ElementTag>().unwrap().to_string(),
            "7fe00010"
        );
    }

    #[test]
    fn push_rejects_duplicate_identity() {
        let mut script = Script::new();
        script.push(element("00100010", "@empty()")).expect("first");
        assert!(script.push(element("00100010", "@remove()")).is_err());
        assert_eq!(script.len(), 1);
    }

    #[test]
    fn same_key_in_different_variants_is_distinct() {
        let mut script = Script::new();
        script
            .push(Directive::Remove {
                enabled: true,
                selector: "overlays".into(),
                text: String::new(),
            })
            .expect("remove");
        script
            .push(Directive::Keep {
                enabled: true,
                selector: "overlays".into(),
                text: String::new(),
            })
            .expect("keep");
        assert_eq!(script.len(), 2);
    }

    #[test]
    fn uncheck_all_leaves_params_visible() {
        let mut script = Script::new();
        script
            .push(Directive::Param {
                name: "PROFILENAME".into(),
                body: "Default".into(),
            })
            .unwrap();
        script.push(element("00100010", "@empty()")).unwrap();
        script.uncheck_all();
        let visible: Vec<_> = script.checked().map(|d| d.kind()).collect();
        assert_eq!(visible, vec![DirectiveKind::Param]);
    }

    #[test]
    fn edits_address_directives_by_key() {
        let mut script = Script::new();
        script.push(element("00100010", "@empty()")).unwrap();
        let key = DirectiveKey::new(DirectiveKind::Element, "00100010");
        script.set_body(&key, "@remove()").unwrap();
        script.set_enabled(&key, false).unwrap();
        let d = script.get(&key).unwrap();
        assert_eq!(d.body(), "@remove()");
        assert!(!d.is_enabled());
        assert!(script
            .set_enabled(&DirectiveKey::new(DirectiveKind::Keep, "group18"), true)
            .is_err());
    }

    #[test]
    fn element_label_shows_group_and_element() {
        assert_eq!(
            element("00100010", "").display_label(),
            "[0010,0010] PatientName"
        );
    }
}
