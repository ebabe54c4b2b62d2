//
// expr.rs
// Dicom-Editor-rs
//
// Compiles element scripts (@remove(), @hash(...), @lookup(...), ...) into an AST once per run
// and evaluates them against a dataset.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, Duration, Local, NaiveDate, Timelike};
use dicom::core::Tag;
use dicom::object::InMemDicomObject;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::{codec, Directive, Script};
use crate::dicom_access::{keyword_tag, ElementAccess};
use crate::error::{EditorError, Result};
use crate::integer_table::IntegerTable;
use crate::lookup::LookupTable;
use crate::properties::Properties;

/// Salt mixed into every pseudonym hash. Changing it changes every `@hash` output.
pub const HASH_SALT: &str = "";

const MAX_UID_LENGTH: usize = 64;
const HASH_DIGITS: usize = 39;

/// Element argument: `this` or a concrete tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRef {
    This,
    Tag(Tag),
}

impl ElementRef {
    fn resolve(self, this: Tag) -> Tag {
        match self {
            ElementRef::This => this,
            ElementRef::Tag(tag) => tag,
        }
    }
}

/// What `@lookup` does when the key is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupFallback {
    Quarantine,
    Keep,
    Remove,
    Empty,
    Default(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Exists,
    IsBlank,
    Equals(String),
    Contains(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Remove,
    Empty,
    Keep,
    Quarantine,
    Blank(usize),
    Contents(ElementRef),
    Hash {
        element: ElementRef,
        length: usize,
    },
    HashUid {
        root: String,
        element: ElementRef,
    },
    Integer {
        element: ElementRef,
        key_type: Option<String>,
        width: usize,
    },
    IncrementDate {
        element: ElementRef,
        days: i64,
    },
    Date(String),
    Time(String),
    Truncate {
        element: ElementRef,
        length: i64,
    },
    Initials(ElementRef),
    Lookup {
        element: ElementRef,
        key_type: String,
        fallback: LookupFallback,
    },
    If {
        element: ElementRef,
        condition: Condition,
        then: Expression,
        otherwise: Expression,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Call(Call),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expression {
    /// Set by `@always()`: apply even when the element is absent.
    pub always: bool,
    pub segments: Vec<Segment>,
}

/// Result of evaluating one element script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Value(String),
    Keep,
    Remove,
    Quarantine(String),
}

/// Everything an expression may read or extend while it runs.
pub struct EvalContext<'a> {
    pub dataset: &'a InMemDicomObject,
    pub lookup: &'a LookupTable,
    pub integers: Option<&'a mut IntegerTable>,
}

enum Action {
    Keep,
    Remove,
    Quarantine(String),
}

impl Expression {
    pub fn evaluate(&self, this: Tag, ctx: &mut EvalContext<'_>) -> Outcome {
        let mut out = String::new();
        match self.eval_into(this, ctx, &mut out) {
            Some(Action::Keep) => Outcome::Keep,
            Some(Action::Remove) => Outcome::Remove,
            Some(Action::Quarantine(reason)) => Outcome::Quarantine(reason),
            None => Outcome::Value(out),
        }
    }

    // The first action reached ends evaluation.
    fn eval_into(&self, this: Tag, ctx: &mut EvalContext<'_>, out: &mut String) -> Option<Action> {
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Call(call) => {
                    if let Some(action) = call.eval_into(this, ctx, out) {
                        return Some(action);
                    }
                }
            }
        }
        None
    }
}

fn value_of(ctx: &EvalContext<'_>, tag: Tag) -> String {
    ctx.dataset
        .element_str(tag)
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

impl Call {
    fn eval_into(&self, this: Tag, ctx: &mut EvalContext<'_>, out: &mut String) -> Option<Action> {
        match self {
            Call::Remove => return Some(Action::Remove),
            Call::Keep => return Some(Action::Keep),
            Call::Quarantine => {
                return Some(Action::Quarantine("script requested quarantine".into()))
            }
            Call::Empty => {}
            Call::Blank(n) => out.push_str(&" ".repeat(*n)),
            Call::Contents(element) => out.push_str(&value_of(ctx, element.resolve(this))),
            Call::Hash { element, length } => {
                let value = value_of(ctx, element.resolve(this));
                if !value.is_empty() {
                    out.push_str(&hash_value(&value, *length));
                }
            }
            Call::HashUid { root, element } => {
                let value = value_of(ctx, element.resolve(this));
                if !value.is_empty() {
                    out.push_str(&hash_uid(root, &value));
                }
            }
            Call::Integer {
                element,
                key_type,
                width,
            } => {
                let tag = element.resolve(this);
                let value = value_of(ctx, tag);
                let key_type = key_type
                    .clone()
                    .unwrap_or_else(|| format!("{:04x}{:04x}", tag.group(), tag.element()));
                let text = match ctx.integers.as_deref_mut() {
                    Some(table) => pad(&table.get_or_assign(&key_type, &value).to_string(), *width),
                    None => hashed_integer(&value, *width),
                };
                out.push_str(&text);
            }
            Call::IncrementDate { element, days } => {
                let value = value_of(ctx, element.resolve(this));
                out.push_str(&increment_date(&value, *days));
            }
            Call::Date(sep) => {
                let now = Local::now();
                out.push_str(&format!(
                    "{:04}{sep}{:02}{sep}{:02}",
                    now.year(),
                    now.month(),
                    now.day()
                ));
            }
            Call::Time(sep) => {
                let now = Local::now();
                out.push_str(&format!(
                    "{:02}{sep}{:02}{sep}{:02}",
                    now.hour(),
                    now.minute(),
                    now.second()
                ));
            }
            Call::Truncate { element, length } => {
                let value = value_of(ctx, element.resolve(this));
                out.push_str(&truncate(&value, *length));
            }
            Call::Initials(element) => {
                let value = value_of(ctx, element.resolve(this));
                out.push_str(&initials(&value));
            }
            Call::Lookup {
                element,
                key_type,
                fallback,
            } => {
                let value = value_of(ctx, element.resolve(this));
                match ctx.lookup.get(key_type, &value) {
                    Some(replacement) => out.push_str(replacement),
                    None => match fallback {
                        LookupFallback::Quarantine => {
                            let miss = EditorError::LookupMiss {
                                key: LookupTable::key(key_type, &value),
                            };
                            return Some(Action::Quarantine(miss.to_string()));
                        }
                        LookupFallback::Keep => return Some(Action::Keep),
                        LookupFallback::Remove => return Some(Action::Remove),
                        LookupFallback::Empty => {}
                        LookupFallback::Default(text) => out.push_str(text),
                    },
                }
            }
            Call::If {
                element,
                condition,
                then,
                otherwise,
            } => {
                let tag = element.resolve(this);
                let holds = match condition {
                    Condition::Exists => ctx.dataset.has_element(tag),
                    Condition::IsBlank => value_of(ctx, tag).is_empty(),
                    Condition::Equals(expected) => value_of(ctx, tag) == *expected,
                    Condition::Contains(needle) => value_of(ctx, tag).contains(needle.as_str()),
                };
                let branch = if holds { then } else { otherwise };
                return branch.eval_into(this, ctx, out);
            }
        }
        None
    }
}

/// SHA-256 of the salted value, first 16 bytes as a big-endian integer, 39 decimal digits.
pub fn hash_digits(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(HASH_SALT.as_bytes());
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 16];
    prefix.copy_from_slice(&digest[..16]);
    format!("{:0width$}", u128::from_be_bytes(prefix), width = HASH_DIGITS)
}

pub fn hash_value(value: &str, length: usize) -> String {
    let digits = hash_digits(value);
    digits[..length.min(digits.len())].to_string()
}

pub fn hash_uid(root: &str, value: &str) -> String {
    let digits = hash_digits(value);
    let digits = match digits.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };
    let root = root.trim().trim_end_matches('.');
    let mut uid = if root.is_empty() {
        digits.to_string()
    } else {
        format!("{root}.{digits}")
    };
    uid.truncate(MAX_UID_LENGTH);
    uid
}

fn hashed_integer(value: &str, width: usize) -> String {
    let digits = hash_digits(value);
    if width == 0 {
        return match digits.trim_start_matches('0') {
            "" => "0".to_string(),
            trimmed => trimmed.to_string(),
        };
    }
    let tail = &digits[digits.len() - width.min(digits.len())..];
    pad(tail, width)
}

fn pad(value: &str, width: usize) -> String {
    format!("{value:0>width$}")
}

/// Shifts every `YYYYMMDD` component; unparseable components become empty.
fn increment_date(value: &str, days: i64) -> String {
    value
        .split('\\')
        .map(|component| {
            let component = component.trim();
            if component.len() < 8 || !component.is_char_boundary(8) {
                return String::new();
            }
            match NaiveDate::parse_from_str(&component[..8], "%Y%m%d") {
                Ok(date) => match date.checked_add_signed(Duration::days(days)) {
                    Some(shifted) => format!("{}{}", shifted.format("%Y%m%d"), &component[8..]),
                    None => String::new(),
                },
                Err(_) => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("\\")
}

fn truncate(value: &str, length: i64) -> String {
    let chars: Vec<char> = value.chars().collect();
    let n = (length.unsigned_abs() as usize).min(chars.len());
    if length >= 0 {
        chars[..n].iter().collect()
    } else {
        chars[chars.len() - n..].iter().collect()
    }
}

/// Person name `Family^Given^Middle` to initials in given, middle, family order.
fn initials(value: &str) -> String {
    let parts: Vec<&str> = value.split('^').collect();
    [1usize, 2, 0]
        .iter()
        .filter_map(|idx| parts.get(*idx))
        .filter_map(|part| part.trim().chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

/// One enabled element directive ready to run.
#[derive(Debug, Clone)]
pub struct ElementRule {
    pub tag: Tag,
    pub label: String,
    pub expression: Expression,
}

/// A script compiled for a run: element rules in script order, then group policies.
#[derive(Debug, Clone, Default)]
pub struct CompiledScript {
    pub rules: Vec<ElementRule>,
    pub remove_private_groups: bool,
    pub remove_unspecified_elements: bool,
    pub remove_overlays: bool,
    pub remove_curves: bool,
    pub kept_groups: BTreeSet<u16>,
    covered: BTreeSet<Tag>,
}

impl CompiledScript {
    /// Compile the enabled directives. Disabled directives are not compiled.
    pub fn compile(script: &Script) -> Result<Self> {
        let params: HashMap<&str, &str> = script
            .directives()
            .iter()
            .filter_map(|d| match d {
                Directive::Param { name, body } => Some((name.as_str(), body.as_str())),
                _ => None,
            })
            .collect();

        let mut compiled = CompiledScript::default();
        for directive in script.directives().iter().filter(|d| d.is_enabled()) {
            match directive {
                Directive::Param { .. } => {}
                Directive::Element {
                    tag, label, body, ..
                } => {
                    let expression = parse_expression(body, &params).map_err(|e| {
                        EditorError::ScriptEval(format!("[{tag}] {label}: {e}"))
                    })?;
                    compiled.covered.insert(tag.tag());
                    compiled.rules.push(ElementRule {
                        tag: tag.tag(),
                        label: label.clone(),
                        expression,
                    });
                }
                Directive::Remove { selector, .. } => match selector.as_str() {
                    "privategroups" => compiled.remove_private_groups = true,
                    "unspecifiedelements" => compiled.remove_unspecified_elements = true,
                    "overlays" => compiled.remove_overlays = true,
                    "curves" => compiled.remove_curves = true,
                    other => warn!("ignoring unknown remove selector {other:?}"),
                },
                Directive::Keep { selector, .. } => match keep_group(selector) {
                    Some(group) => {
                        compiled.kept_groups.insert(group);
                    }
                    None => warn!("ignoring unknown keep selector {selector:?}"),
                },
            }
        }
        Ok(compiled)
    }

    pub fn from_properties(props: &Properties) -> Result<Self> {
        Self::compile(&codec::from_properties(props)?)
    }

    /// True when an enabled element directive names this tag.
    pub fn covers(&self, tag: Tag) -> bool {
        self.covered.contains(&tag)
    }

    pub fn keeps_group(&self, group: u16) -> bool {
        self.kept_groups.contains(&group)
    }

    /// Group-level verdict for one element. A group keep beats every remove.
    pub fn removes(&self, tag: Tag, top_level: bool) -> bool {
        let group = tag.group();
        if self.keeps_group(group) {
            return false;
        }
        (self.remove_private_groups && group % 2 == 1)
            || (self.remove_overlays && (0x6000..=0x60FF).contains(&group))
            || (self.remove_curves && (0x5000..=0x50FF).contains(&group))
            || (top_level && self.remove_unspecified_elements && !self.covers(tag))
    }
}

/// `group18`, `group0018` or a bare hex group number.
fn keep_group(selector: &str) -> Option<u16> {
    let selector = selector.trim();
    let digits = selector
        .strip_prefix("group")
        .or_else(|| selector.strip_prefix("Group"))
        .unwrap_or(selector);
    if digits.is_empty() || digits.len() > 4 {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    params: &'a HashMap<&'a str, &'a str>,
}

pub fn parse_expression(text: &str, params: &HashMap<&str, &str>) -> Result<Expression, String> {
    let mut parser = Parser {
        chars: text.trim().chars().collect(),
        pos: 0,
        params,
    };
    parser.expression(false)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn ident_at(&self, start: usize) -> String {
        self.chars[start..]
            .iter()
            .take_while(|c| is_ident_char(**c))
            .collect()
    }

    fn param(&self, name: &str) -> Result<String, String> {
        self.params
            .get(name)
            .map(|v| v.to_string())
            .ok_or_else(|| format!("unbound parameter @{name}"))
    }

    /// Parses until end of input, or until `}` when inside a block.
    fn expression(&mut self, in_block: bool) -> Result<Expression, String> {
        let mut expr = Expression::default();
        let mut text = String::new();

        loop {
            let Some(c) = self.peek() else {
                if in_block {
                    return Err("unterminated { block".into());
                }
                break;
            };
            if in_block && c == '}' {
                self.pos += 1;
                break;
            }
            if c != '@' {
                text.push(c);
                self.pos += 1;
                continue;
            }

            let name = self.ident_at(self.pos + 1);
            if name.is_empty() {
                text.push('@');
                self.pos += 1;
                continue;
            }
            self.pos += 1 + name.chars().count();

            if self.peek() != Some('(') {
                text.push_str(&self.param(&name)?);
                continue;
            }
            let args = self.arguments()?;
            if name == "always" {
                expr.always = true;
                continue;
            }
            let call = self.call(&name, args)?;
            if !text.is_empty() {
                expr.segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            expr.segments.push(Segment::Call(call));
        }

        if !text.is_empty() {
            expr.segments.push(Segment::Text(text));
        }
        Ok(expr)
    }

    /// Reads `( ... )`, splitting on top-level commas; quoted arguments are literal.
    fn arguments(&mut self) -> Result<Vec<String>, String> {
        self.pos += 1;
        let mut args = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut was_quoted = false;
        let mut depth = 0usize;

        loop {
            let Some(c) = self.peek() else {
                return Err("unterminated argument list".into());
            };
            self.pos += 1;
            match c {
                '"' if quoted => quoted = false,
                '\\' if quoted => {
                    if let Some(next) = self.peek() {
                        current.push(next);
                        self.pos += 1;
                    }
                }
                _ if quoted => current.push(c),
                '"' => {
                    quoted = true;
                    was_quoted = true;
                }
                '(' => {
                    depth += 1;
                    current.push(c);
                }
                ')' if depth > 0 => {
                    depth -= 1;
                    current.push(c);
                }
                ')' => {
                    let last = self.argument(std::mem::take(&mut current), was_quoted)?;
                    if !(args.is_empty() && last.is_empty() && !was_quoted) {
                        args.push(last);
                    }
                    return Ok(args);
                }
                ',' if depth == 0 => {
                    args.push(self.argument(std::mem::take(&mut current), was_quoted)?);
                    was_quoted = false;
                }
                _ => current.push(c),
            }
        }
    }

    fn argument(&self, raw: String, was_quoted: bool) -> Result<String, String> {
        if was_quoted {
            return Ok(raw);
        }
        let trimmed = raw.trim();
        match trimmed.strip_prefix('@') {
            Some(name) if !name.is_empty() && name.chars().all(is_ident_char) => self.param(name),
            _ => Ok(trimmed.to_string()),
        }
    }

    fn block(&mut self) -> Result<Expression, String> {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
        if self.peek() != Some('{') {
            return Ok(Expression::default());
        }
        self.pos += 1;
        self.expression(true)
    }

    fn call(&mut self, name: &str, args: Vec<String>) -> Result<Call, String> {
        let arity = |min: usize, max: usize| -> Result<(), String> {
            if args.len() < min || args.len() > max {
                Err(format!(
                    "@{name} takes {min}..={max} argument(s), got {}",
                    args.len()
                ))
            } else {
                Ok(())
            }
        };

        let call = match name {
            "remove" => {
                arity(0, 0)?;
                Call::Remove
            }
            "empty" => {
                arity(0, 0)?;
                Call::Empty
            }
            "keep" => {
                arity(0, 0)?;
                Call::Keep
            }
            "quarantine" => {
                arity(0, 0)?;
                Call::Quarantine
            }
            "blank" => {
                arity(1, 1)?;
                Call::Blank(number(&args[0])?)
            }
            "contents" => {
                arity(1, 1)?;
                Call::Contents(element_ref(&args[0])?)
            }
            "hash" => {
                arity(1, 2)?;
                Call::Hash {
                    element: element_ref(&args[0])?,
                    length: match args.get(1) {
                        Some(len) => number(len)?,
                        None => HASH_DIGITS,
                    },
                }
            }
            "hashuid" => {
                arity(2, 2)?;
                Call::HashUid {
                    root: args[0].clone(),
                    element: element_ref(&args[1])?,
                }
            }
            "integer" => {
                arity(2, 3)?;
                let (key_type, width) = if args.len() == 3 {
                    (Some(args[1].clone()), &args[2])
                } else {
                    (None, &args[1])
                };
                Call::Integer {
                    element: element_ref(&args[0])?,
                    key_type,
                    width: number(width)?,
                }
            }
            "incrementdate" => {
                arity(2, 2)?;
                Call::IncrementDate {
                    element: element_ref(&args[0])?,
                    days: signed(&args[1])?,
                }
            }
            "date" => {
                arity(0, 1)?;
                Call::Date(args.first().cloned().unwrap_or_default())
            }
            "time" => {
                arity(0, 1)?;
                Call::Time(args.first().cloned().unwrap_or_default())
            }
            "truncate" => {
                arity(2, 2)?;
                Call::Truncate {
                    element: element_ref(&args[0])?,
                    length: signed(&args[1])?,
                }
            }
            "initials" => {
                arity(1, 1)?;
                Call::Initials(element_ref(&args[0])?)
            }
            "lookup" => {
                arity(2, 4)?;
                let action = args.get(2).map(|a| a.to_ascii_lowercase());
                let fallback = match (action.as_deref(), args.get(3)) {
                    (None, _) => LookupFallback::Quarantine,
                    (Some("default"), Some(value)) => LookupFallback::Default(value.clone()),
                    (Some(action), Some(_)) => {
                        return Err(format!("@lookup action {action:?} takes no value"))
                    }
                    (Some("keep"), None) => LookupFallback::Keep,
                    (Some("remove"), None) => LookupFallback::Remove,
                    (Some("empty"), None) => LookupFallback::Empty,
                    (Some("quarantine"), None) => LookupFallback::Quarantine,
                    (Some(other), None) => return Err(format!("unknown @lookup action {other:?}")),
                };
                Call::Lookup {
                    element: element_ref(&args[0])?,
                    key_type: args[1].clone(),
                    fallback,
                }
            }
            "if" => {
                arity(2, 3)?;
                let condition = match (args[1].to_ascii_lowercase().as_str(), args.get(2)) {
                    ("exists", None) => Condition::Exists,
                    ("isblank", None) => Condition::IsBlank,
                    ("equals", Some(value)) => Condition::Equals(value.clone()),
                    ("contains", Some(value)) => Condition::Contains(value.clone()),
                    (other, _) => return Err(format!("unknown @if condition {other:?}")),
                };
                let element = element_ref(&args[0])?;
                let then = self.block()?;
                let otherwise = self.block()?;
                Call::If {
                    element,
                    condition,
                    then,
                    otherwise,
                }
            }
            other => return Err(format!("unknown function @{other}()")),
        };
        Ok(call)
    }
}

fn number(arg: &str) -> Result<usize, String> {
    arg.trim()
        .parse()
        .map_err(|_| format!("expected a non-negative number, got {arg:?}"))
}

fn signed(arg: &str) -> Result<i64, String> {
    arg.trim()
        .trim_start_matches('+')
        .parse()
        .map_err(|_| format!("expected a number, got {arg:?}"))
}

/// `this`, `(gggg,eeee)`, `[gggg,eeee]`, `ggggeeee`, or a dictionary keyword.
pub fn element_ref(arg: &str) -> Result<ElementRef, String> {
    let arg = arg.trim();
    if arg.eq_ignore_ascii_case("this") {
        return Ok(ElementRef::This);
    }
    let inner = arg
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .or_else(|| arg.strip_prefix('[').and_then(|s| s.strip_suffix(']')));
    if let Some(inner) = inner {
        let (group, element) = inner
            .split_once(',')
            .ok_or_else(|| format!("malformed tag {arg:?}"))?;
        let group = u16::from_str_radix(group.trim(), 16).map_err(|_| format!("malformed tag {arg:?}"))?;
        let element =
            u16::from_str_radix(element.trim(), 16).map_err(|_| format!("malformed tag {arg:?}"))?;
        return Ok(ElementRef::Tag(Tag(group, element)));
    }
    if arg.len() == 8 && arg.chars().all(|c| c.is_ascii_hexdigit()) {
        let group = u16::from_str_radix(&arg[..4], 16).map_err(|e| e.to_string())?;
        let element = u16::from_str_radix(&arg[4..], 16).map_err(|e| e.to_string())?;
        return Ok(ElementRef::Tag(Tag(group, element)));
    }
    keyword_tag(arg)
        .map(ElementRef::Tag)
        .ok_or_else(|| format!("unknown element {arg:?}"))
}
