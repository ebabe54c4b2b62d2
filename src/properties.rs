//
// properties.rs
// Dicom-Editor-rs
//
// Order-preserving key/value store with a reader and writer for the line-oriented properties format.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::Path;

use crate::atomic;
use crate::error::{EditorError, Result};

/// Key/value pairs in first-insertion order. Re-inserting a key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse properties text. Later duplicates win.
    pub fn parse(text: &str) -> Self {
        let mut props = Properties::new();
        let mut pending = String::new();

        for raw in text.lines() {
            let line = raw.trim_start();
            if pending.is_empty()
                && (line.is_empty() || line.starts_with('#') || line.starts_with('!'))
            {
                continue;
            }
            if ends_with_continuation(line) {
                pending.push_str(&line[..line.len() - 1]);
                continue;
            }
            pending.push_str(line);
            let logical = std::mem::take(&mut pending);
            let (key, value) = split_entry(&logical);
            props.insert(unescape(&key), unescape(value.trim_start()));
        }
        if !pending.is_empty() {
            let (key, value) = split_entry(&pending);
            props.insert(unescape(&key), unescape(value.trim_start()));
        }
        props
    }

    /// Read a properties file; a missing file yields an empty set.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(EditorError::io(path, e)),
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.iter() {
            out.push_str(&format!("{}={}\n", escape(key, true), escape(value, false)));
        }
        out
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        atomic::write_bytes(path, self.to_text().as_bytes())
    }
}

impl FromIterator<(String, String)> for Properties {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

// An odd number of trailing backslashes continues the logical line.
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Splits at the first unescaped `=`, `:` or whitespace.
fn split_entry(line: &str) -> (String, &str) {
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => return (line[..idx].to_string(), &line[idx + 1..]),
            c if c.is_whitespace() => {
                let rest = line[idx..].trim_start();
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (line[..idx].to_string(), rest);
            }
            _ => {}
        }
    }
    (line.to_string(), "")
}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape(input: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for (idx, c) in input.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '=' | ':' if is_key => {
                out.push('\\');
                out.push(c);
            }
            ' ' if is_key || idx == 0 => out.push_str("\\ "),
            '#' | '!' if idx == 0 => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let props = Properties::parse("# comment\n! also\n\nptid/12345=ANON-1\n");
        assert_eq!(props.len(), 1);
        assert_eq!(props.get("ptid/12345"), Some("ANON-1"));
    }

    #[test]
    fn duplicates_resolve_to_last_value_at_first_position() {
        let props = Properties::parse("a=1\nb=2\na=3\n");
        let pairs: Vec<_> = props.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let props = Properties::parse("Key=upper\nkey=lower\n");
        assert_eq!(props.get("Key"), Some("upper"));
        assert_eq!(props.get("key"), Some("lower"));
    }

    #[test]
    fn separators_and_escapes() {
        let props = Properties::parse("colon:value\nspaced   value here\nesc\\=key=a\\tb\\u0041\n");
        assert_eq!(props.get("colon"), Some("value"));
        assert_eq!(props.get("spaced"), Some("value here"));
        assert_eq!(props.get("esc=key"), Some("a\tbA"));
    }

    #[test]
    fn continuation_lines_are_joined() {
        let props = Properties::parse("long=first \\\n    second\n");
        assert_eq!(props.get("long"), Some("first second"));
    }

    #[test]
    fn text_output_reads_back_identically() {
        let mut props = Properties::new();
        props.insert("e.00100010", "@empty()");
        props.insert("odd key=x", " leading space");
        props.insert("#hash", "!bang");
        let restored = Properties::parse(&props.to_text());
        assert_eq!(restored, props);
    }
}
