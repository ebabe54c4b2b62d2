//
// codec.rs
// Dicom-Editor-rs
//
// Converts scripts between the on-disk XML text, the flat properties form, and the in-memory model.
//
// Thales Matheus Mendonça Santos - November 2025

use std::borrow::Cow;
use std::path::Path;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use super::{Directive, DirectiveKind, ElementTag, Script};
use crate::atomic;
use crate::error::{EditorError, Result};
use crate::properties::Properties;

const ROOT: &str = "script";

/// Read a script file. A missing or empty file yields an empty script.
pub fn load(path: &Path) -> Result<Script> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("anonymizer script {} not found, using an empty script", path.display());
            return Ok(Script::new());
        }
        Err(e) => return Err(EditorError::io(path, e)),
    };
    let script = parse(&text)?;
    debug!("loaded {} directives from {}", script.len(), path.display());
    Ok(script)
}

/// Write the canonical text atomically, in the script's own order.
pub fn save(script: &Script, path: &Path) -> Result<()> {
    atomic::write_bytes(path, to_text(script).as_bytes()).map_err(|err| match err {
        EditorError::Io { source, .. } => EditorError::ScriptPersist {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Directive under construction while its element is open.
struct Pending {
    kind: DirectiveKind,
    enabled: bool,
    t: String,
    n: String,
    text: String,
}

pub fn parse(text: &str) -> Result<Script> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(false);

    let mut script = Script::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut pending: Option<Pending> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            EditorError::ScriptParse(format!(
                "at byte {}: {e}",
                reader.buffer_position()
            ))
        })?;
        match event {
            Event::Start(start) => {
                depth += 1;
                match depth {
                    1 => open_root(&start, &mut seen_root)?,
                    2 => pending = open_directive(&start)?,
                    _ => {}
                }
            }
            Event::Empty(start) => match depth {
                0 => open_root(&start, &mut seen_root)?,
                1 => {
                    if let Some(p) = open_directive(&start)? {
                        finish(&mut script, p);
                    }
                }
                _ => {}
            },
            Event::End(_) => {
                if depth == 2 {
                    if let Some(p) = pending.take() {
                        finish(&mut script, p);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Text(t) => {
                if depth == 2 {
                    if let Some(p) = pending.as_mut() {
                        let value = t
                            .unescape()
                            .unwrap_or_else(|_| Cow::Owned(String::from_utf8_lossy(&t).into_owned()));
                        p.text.push_str(&value);
                    }
                }
            }
            Event::CData(c) => {
                if depth == 2 {
                    if let Some(p) = pending.as_mut() {
                        p.text.push_str(&String::from_utf8_lossy(&c));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(EditorError::ScriptParse(format!(
            "unexpected end of document with {depth} element(s) still open"
        )));
    }
    Ok(script)
}

fn open_root(start: &BytesStart<'_>, seen_root: &mut bool) -> Result<()> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    if name != ROOT {
        return Err(EditorError::ScriptParse(format!(
            "root element is <{name}>, expected <{ROOT}>"
        )));
    }
    if *seen_root {
        return Err(EditorError::ScriptParse("more than one root element".into()));
    }
    *seen_root = true;
    Ok(())
}

fn open_directive(start: &BytesStart<'_>) -> Result<Option<Pending>> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let kind = match name.parse::<DirectiveKind>() {
        Ok(kind) => kind,
        Err(_) => {
            debug!("ignoring unknown script element <{name}>");
            return Ok(None);
        }
    };

    let mut pending = Pending {
        kind,
        enabled: false,
        t: String::new(),
        n: String::new(),
        text: String::new(),
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| EditorError::ScriptParse(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        match attr.key.as_ref() {
            b"en" => pending.enabled = value.trim() == "T",
            b"t" => pending.t = value.trim().to_string(),
            b"n" => pending.n = value,
            _ => {}
        }
    }
    Ok(Some(pending))
}

fn finish(script: &mut Script, p: Pending) {
    // Indentation-only content is layout; anything else is kept verbatim.
    let body = if p.text.trim().is_empty() {
        String::new()
    } else {
        p.text
    };
    let directive = match p.kind {
        DirectiveKind::Param => Directive::Param { name: p.t, body },
        DirectiveKind::Element => match p.t.parse::<ElementTag>() {
            Ok(tag) => Directive::Element {
                enabled: p.enabled,
                tag,
                label: p.n,
                body,
            },
            Err(e) => {
                warn!("dropping element directive: {e}");
                return;
            }
        },
        DirectiveKind::Remove => Directive::Remove {
            enabled: p.enabled,
            selector: p.t,
            text: body,
        },
        DirectiveKind::Keep => Directive::Keep {
            enabled: p.enabled,
            selector: p.t,
            text: body,
        },
    };
    let key = directive.key();
    if script.upsert(directive) {
        warn!("duplicate directive {key}; the later definition replaces the earlier one");
    }
}

/// Canonical on-disk text.
pub fn to_text(script: &Script) -> String {
    let mut out = String::new();
    out.push_str("<script>\n");
    for directive in script.directives() {
        let letter = directive.kind().letter();
        out.push_str(&format!(" <{letter}"));
        match directive {
            Directive::Param { name, .. } => {
                out.push_str(&format!(" t=\"{}\"", escape(name.as_str())));
            }
            Directive::Element {
                enabled, tag, label, ..
            } => {
                out.push_str(&format!(" en=\"{}\" t=\"{}\"", flag(*enabled), tag));
                if !label.is_empty() {
                    out.push_str(&format!(" n=\"{}\"", escape(label.as_str())));
                }
            }
            Directive::Remove {
                enabled, selector, ..
            }
            | Directive::Keep {
                enabled, selector, ..
            } => {
                out.push_str(&format!(
                    " en=\"{}\" t=\"{}\"",
                    flag(*enabled),
                    escape(selector.as_str())
                ));
            }
        }
        out.push_str(&format!(">{}</{letter}>\n", escape(directive.body())));
    }
    out.push_str("</script>\n");
    out
}

fn flag(enabled: bool) -> &'static str {
    if enabled {
        "T"
    } else {
        "F"
    }
}

/// Flattens the script for the element rewriter, preserving directive order.
pub fn to_properties(script: &Script) -> Properties {
    let mut props = Properties::new();
    for directive in script.directives() {
        let key = directive.key().to_string();
        props.insert(key.clone(), directive.body());
        if let Directive::Param { .. } = directive {
            continue;
        }
        props.insert(format!("enabled.{key}"), flag(directive.is_enabled()));
        if let Directive::Element { label, .. } = directive {
            if !label.is_empty() {
                props.insert(format!("name.{key}"), label.as_str());
            }
        }
    }
    props
}

/// Inverse of [`to_properties`]. A directive without an `enabled.` line is enabled.
pub fn from_properties(props: &Properties) -> Result<Script> {
    let mut script = Script::new();
    for (key, body) in props.iter() {
        if key.starts_with("enabled.") || key.starts_with("name.") {
            continue;
        }
        let Some((letter, id)) = key.split_once('.') else {
            warn!("ignoring property {key:?}");
            continue;
        };
        let kind: DirectiveKind = letter.parse()?;
        let enabled = props
            .get(&format!("enabled.{key}"))
            .map_or(true, |v| v.trim() == "T");
        let directive = match kind {
            DirectiveKind::Param => Directive::Param {
                name: id.to_string(),
                body: body.to_string(),
            },
            DirectiveKind::Element => Directive::Element {
                enabled,
                tag: id.parse()?,
                label: props
                    .get(&format!("name.{key}"))
                    .unwrap_or_default()
                    .to_string(),
                body: body.to_string(),
            },
            DirectiveKind::Remove => Directive::Remove {
                enabled,
                selector: id.to_string(),
                text: body.to_string(),
            },
            DirectiveKind::Keep => Directive::Keep {
                enabled,
                selector: id.to_string(),
                text: body.to_string(),
            },
        };
        script.push(directive)?;
    }
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"<script>
 <p t="PROFILENAME">CTP Clinical Trial Default</p>
 <e en="T" t="00100010" n="PatientName">@empty()</e>
 <e en="F" t="00100030" n="PatientBirthDate">@remove()</e>
 <e en="T" t="00100020" n="PatientID">@lookup(this,ptid)</e>
 <r en="T" t="privategroups">Remove private groups</r>
 <k en="T" t="group18">Keep group 18</k>
</script>
"#;

    #[test]
    fn parses_directives_in_document_order() {
        let script = parse(SAMPLE).expect("parse");
        let keys: Vec<String> = script
            .directives()
            .iter()
            .map(|d| d.key().to_string())
            .collect();
        assert_eq!(
            keys,
            vec![
                "p.PROFILENAME",
                "e.00100010",
                "e.00100030",
                "e.00100020",
                "r.privategroups",
                "k.group18"
            ]
        );
        assert_eq!(script.param("PROFILENAME"), Some("CTP Clinical Trial Default"));
        assert!(!script.directives()[2].is_enabled());
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("dicom-anonymizer.script");
        let mut script = parse(SAMPLE).expect("parse");
        script.upsert(Directive::Element {
            enabled: true,
            tag: "00081030".parse().unwrap(),
            label: "Study \"Description\" & <more>".into(),
            body: "@if(this,contains,\"<x>\"){A & B}{'q'}".into(),
        });

        save(&script, &path).expect("save");
        let restored = load(&path).expect("load");
        assert_eq!(restored, script);
    }

    #[test]
    fn padded_bodies_and_labels_survive_save_and_load() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("padded.script");
        let mut script = Script::new();
        script
            .push(Directive::Param {
                name: "SITE".into(),
                body: " S01 ".into(),
            })
            .expect("param");
        script
            .push(Directive::Element {
                enabled: true,
                tag: "00100020".parse().expect("tag"),
                label: " Patient ID ".into(),
                body: "@SITE-@hash(this,6) ".into(),
            })
            .expect("element");

        save(&script, &path).expect("save");
        let restored = load(&path).expect("load");
        assert_eq!(restored, script);
        assert_eq!(restored.param("SITE"), Some(" S01 "));
    }

    #[test]
    fn indentation_only_bodies_load_as_empty() {
        let script = parse("<script>\n <r en=\"T\" t=\"curves\">\n   </r>\n</script>").expect("parse");
        assert_eq!(script.directives()[0].body(), "");
    }

    #[test]
    fn missing_or_empty_file_is_an_empty_script() {
        let dir = tempdir().expect("tempdir");
        assert!(load(&dir.path().join("absent.script")).unwrap().is_empty());
        assert!(parse("").unwrap().is_empty());
        assert!(parse("   \n").unwrap().is_empty());
    }

    #[test]
    fn structural_corruption_is_a_parse_error() {
        assert!(matches!(
            parse("<script><e en=\"T\" t=\"00100010\">x</k></script>"),
            Err(EditorError::ScriptParse(_))
        ));
        assert!(matches!(
            parse("<script><e en=\"T\" t=\"00100010\">x</e>"),
            Err(EditorError::ScriptParse(_))
        ));
        assert!(matches!(
            parse("<profile></profile>"),
            Err(EditorError::ScriptParse(_))
        ));
    }

    #[test]
    fn tolerates_escaped_text_and_bad_tags() {
        let script = parse(
            "<script>\n <e en=\"T\" t=\"0010\" n=\"Bad\">x</e>\n <p t=\"P\">a &amp; b</p>\n <e en=\"T\" t=\"00100010\">one</e>\n <e en=\"F\" t=\"00100010\">two</e>\n <x t=\"y\"/>\n</script>",
        )
        .expect("parse");
        assert_eq!(script.len(), 2);
        assert_eq!(script.param("P"), Some("a & b"));
        let element = &script.directives()[1];
        assert_eq!(element.body(), "two");
        assert!(!element.is_enabled());
    }

    #[test]
    fn properties_round_trip_preserves_order_and_flags() {
        let script = parse(SAMPLE).expect("parse");
        let props = to_properties(&script);
        assert_eq!(props.get("e.00100010"), Some("@empty()"));
        assert_eq!(props.get("enabled.e.00100030"), Some("F"));
        assert_eq!(props.get("name.e.00100020"), Some("PatientID"));
        assert_eq!(props.get("enabled.p.PROFILENAME"), None);

        let restored = from_properties(&props).expect("from properties");
        assert_eq!(restored, script);
        assert_eq!(to_properties(&restored), props);
    }

    #[test]
    fn properties_without_enabled_lines_are_enabled() {
        let props = Properties::parse("e.00100010=@empty()\nr.privategroups=Remove\n");
        let script = from_properties(&props).expect("from properties");
        assert!(script.directives().iter().all(|d| d.is_enabled()));
    }
}
