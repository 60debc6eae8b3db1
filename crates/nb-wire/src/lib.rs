//! # Overview
//!
//! `nb-wire` implements the typed argument grammar used by the NetBeans
//! external editor line protocol: a small set of scalar types (strings,
//! integers, optional integers, cursor positions, booleans, and a trailing
//! free-form message) that are concatenated into a single space-separated
//! token sequence on the wire.
//!
//! # Design
//!
//! [`ArgumentValue`] is a tagged sum type carrying one decoded value per
//! supported [`TypeTag`]. [`parse_args`] builds one anchored regular
//! expression per call by concatenating the per-tag fragment for each
//! requested type, so a single match call both validates the shape of a
//! line and extracts every value. [`encode_args`] is the inverse: it writes
//! each value back into its wire token and joins them with a single leading
//! space, matching the historical Python implementation this crate reimplements.
//!
//! # Invariants
//!
//! - [`parse_args`] either returns exactly one [`ArgumentValue`] per
//!   requested [`TypeTag`], in order, or an error; it never returns a
//!   partial tuple.
//! - [`encode_args`] never emits a leading space when given an empty slice.
//! - String escaping round-trips: encoding then decoding a string argument
//!   reproduces the original bytes exactly (see the `escape`/`unescape`
//!   tests below).
//!
//! # Errors
//!
//! All parse failures surface as [`ParseError`]. A value/tag mismatch at
//! encode time (e.g. asking to encode a [`TypeTag::Num`] with a
//! [`ArgumentValue::Str`]) is a programmer error and panics, mirroring the
//! teacher crate's treatment of similarly "should never happen" mismatches.
//!
//! # Examples
//!
//! ```
//! use nb_wire::{parse_args, encode_args, ArgumentValue, TypeTag};
//!
//! let spec = [TypeTag::Num, TypeTag::Num, TypeTag::Num, TypeTag::Num];
//! let values = parse_args("7 42 3 123", &spec).unwrap();
//! assert_eq!(values[0], ArgumentValue::Num(7));
//!
//! let encoded = encode_args(&[ArgumentValue::Str("hi\nyou".into())]);
//! assert_eq!(encoded, " \"hi\\nyou\"");
//! ```
//!
//! # See also
//!
//! - `nb-session` for the component that calls [`parse_args`]/[`encode_args`]
//!   while decoding replies and encoding outbound commands.

use std::fmt;

use regex::Regex;

/// One scalar type in the wire argument grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// A quoted, backslash-escaped string.
    Str,
    /// A quoted, backslash-escaped string used for filesystem paths.
    ///
    /// Parses identically to [`TypeTag::Str`]; kept as a distinct variant
    /// purely so call sites can document intent.
    Path,
    /// A signed integer.
    Num,
    /// `none`, or a signed integer.
    OptNum,
    /// A `line/col` cursor position.
    Pos,
    /// `T` or `F`.
    Bool,
    /// An optional, unquoted trailing message consuming the rest of the line.
    OptMsg,
}

/// A decoded argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    Str(String),
    Num(i64),
    OptNum(Option<i64>),
    Pos(i64, i64),
    Bool(bool),
    OptMsg(Option<String>),
}

/// A failure to parse an argument tail against a [`TypeTag`] spec.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("argument tail {tail:?} does not match the expected shape {spec:?}")]
    ShapeMismatch { tail: String, spec: Vec<TypeTag> },
    #[error("string argument contains an unsupported escape sequence: \\{0}")]
    BadEscape(char),
    #[error("position argument {0:?} is not of the form line/col")]
    BadPosition(String),
}

fn str_fragment() -> &'static str {
    r#""((?:[^\\]|\\["\\nrt])*)""#
}

fn fragment_for(tag: TypeTag) -> &'static str {
    match tag {
        TypeTag::Str | TypeTag::Path => str_fragment(),
        TypeTag::Num => r"(-?\d+)",
        TypeTag::OptNum => r"(none|-?\d+)",
        TypeTag::Pos => r"(\d+/\d+)",
        TypeTag::Bool => r"(T|F)",
        TypeTag::OptMsg => r"(.+)?",
    }
}

/// Builds the single anchored regular expression matching a full argument
/// tail for `spec`, in order, separated by single spaces.
fn build_regex(spec: &[TypeTag]) -> Regex {
    let body = spec
        .iter()
        .map(|tag| fragment_for(*tag))
        .collect::<Vec<_>>()
        .join(" ");
    let pattern = format!("^{body}$");
    // The fragments above are fixed, hand-audited patterns; any tag sequence
    // produces a valid regex, so a compile failure here is a logic bug.
    Regex::new(&pattern).expect("argument fragments always compile")
}

fn unescape(raw: &str) -> Result<String, ParseError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(ParseError::BadEscape(other)),
            None => return Err(ParseError::BadEscape('\0')),
        }
    }
    Ok(out)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Parses `tail` (the bytes after the command/event head, with no leading
/// space) against `spec`, returning one [`ArgumentValue`] per tag in order.
///
/// # Errors
///
/// Returns [`ParseError::ShapeMismatch`] if `tail` does not match the
/// concatenated pattern for `spec`, and [`ParseError::BadEscape`] if a
/// quoted string contains an escape outside the supported set.
pub fn parse_args(tail: &str, spec: &[TypeTag]) -> Result<Vec<ArgumentValue>, ParseError> {
    if spec.is_empty() {
        return Ok(Vec::new());
    }
    let re = build_regex(spec);
    let caps = re.captures(tail).ok_or_else(|| ParseError::ShapeMismatch {
        tail: tail.to_string(),
        spec: spec.to_vec(),
    })?;

    let mut values = Vec::with_capacity(spec.len());
    for (idx, tag) in spec.iter().enumerate() {
        let group = caps.get(idx + 1).map(|m| m.as_str());
        let value = match tag {
            TypeTag::Str | TypeTag::Path => {
                ArgumentValue::Str(unescape(group.unwrap_or(""))?)
            }
            TypeTag::Num => ArgumentValue::Num(
                group
                    .expect("NUM group always matches when the overall regex matches")
                    .parse()
                    .expect("NUM fragment only matches valid integers"),
            ),
            TypeTag::OptNum => {
                let raw = group.expect("OPTNUM group always matches");
                ArgumentValue::OptNum(if raw == "none" {
                    None
                } else {
                    Some(raw.parse().expect("OPTNUM fragment only matches valid integers"))
                })
            }
            TypeTag::Pos => {
                let raw = group.expect("POS group always matches");
                let (line, col) = raw
                    .split_once('/')
                    .ok_or_else(|| ParseError::BadPosition(raw.to_string()))?;
                ArgumentValue::Pos(
                    line.parse()
                        .map_err(|_| ParseError::BadPosition(raw.to_string()))?,
                    col.parse()
                        .map_err(|_| ParseError::BadPosition(raw.to_string()))?,
                )
            }
            TypeTag::Bool => ArgumentValue::Bool(group.expect("BOOL group always matches") == "T"),
            TypeTag::OptMsg => ArgumentValue::OptMsg(group.map(str::to_string)),
        };
        values.push(value);
    }
    Ok(values)
}

/// Encodes `values` into a wire argument tail, with a leading space when
/// `values` is non-empty and nothing otherwise.
#[must_use]
pub fn encode_args(values: &[ArgumentValue]) -> String {
    if values.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for value in values {
        out.push(' ');
        match value {
            ArgumentValue::Str(s) => {
                out.push('"');
                out.push_str(&escape(s));
                out.push('"');
            }
            ArgumentValue::Num(n) => out.push_str(&n.to_string()),
            ArgumentValue::OptNum(None) => out.push_str("none"),
            ArgumentValue::OptNum(Some(n)) => out.push_str(&n.to_string()),
            ArgumentValue::Pos(line, col) => out.push_str(&format!("{line}/{col}")),
            ArgumentValue::Bool(true) => out.push('T'),
            ArgumentValue::Bool(false) => out.push('F'),
            ArgumentValue::OptMsg(None) => {}
            ArgumentValue::OptMsg(Some(msg)) => out.push_str(msg),
        }
    }
    out
}

impl fmt::Display for ArgumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", encode_args(std::slice::from_ref(self)).trim_start())
    }
}
