//! Extraction of invocations and expectations from directive text.
//!
//! The script grammar lets the parameter list and the expectation clause of
//! an assertion be absent independently, so each assertion kind accepts a
//! fixed set of [`Shape`]s. A head pattern finds the invoked function; the
//! rest of the invoke list and the expectation clause are then split into
//! balanced items, and the shape they form must be one the kind accepts.
//! Comments inside a form are blanked out first.
//!
//! Module-level directives (`assert_invalid`, `assert_malformed`, ...) and
//! `register` are regular enough to be taken apart with
//! [`split_top_level`] directly.

use super::form::{DirectiveKind, Form};
use super::values::{TypedValue, ValueError};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::HashMap;
use thiserror::Error;

const PREVIEW_LEN: usize = 120;

/// A directive whose text fits none of its shapes.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unparsed {kind}: {reason}: '{preview}'")]
pub struct DirectiveParseError {
    pub kind: DirectiveKind,
    pub reason: String,
    pub preview: String,
}

impl DirectiveParseError {
    pub(crate) fn new(form: &Form, reason: impl Into<String>) -> Self {
        Self {
            kind: form.kind,
            reason: reason.into(),
            preview: form.preview(PREVIEW_LEN),
        }
    }

    fn value(form: &Form, err: ValueError) -> Self {
        Self::new(form, err.to_string())
    }
}

/// One call of an exported function.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// `$name` of the module the call is addressed to, without the `$`.
    pub module: Option<String>,
    /// Export name as written between the quotes.
    pub function: String,
    pub args: Vec<TypedValue>,
}

impl Invocation {
    /// The function name as a single transport token: spaces become `\`.
    pub fn escaped_function(&self) -> String {
        self.function.replace(' ', "\\")
    }

    /// The REPL command line for this call.
    pub fn command(&self) -> String {
        let mut command = self.escaped_function();
        for arg in &self.args {
            command.push(' ');
            command.push_str(&arg.transport());
        }
        command
    }

    /// Argument transport tokens joined for progress output.
    pub fn display_args(&self) -> String {
        self.args.iter().map(TypedValue::transport).collect::<Vec<_>>().join(", ")
    }
}

/// What an invocation is expected to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    /// Return values, possibly none.
    Results(Vec<TypedValue>),
    /// A trap whose message contains (or is contained in) this text.
    Trap(String),
}

impl Expectation {
    /// Canonical expected text: comma-joined tokens, or the trap message.
    pub fn expected_text(&self) -> String {
        match self {
            Expectation::Results(values) => values.iter().map(TypedValue::token).collect::<Vec<_>>().join(","),
            Expectation::Trap(message) => message.clone(),
        }
    }
}

/// An invocation directive taken apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub kind: DirectiveKind,
    pub invocation: Invocation,
    /// `None` for a bare `invoke`.
    pub expectation: Option<Expectation>,
}

/// Body of a `(module ...)` form.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleSource {
    /// Text format; the whole `(module ...)` form.
    Text(String),
    /// `(module binary "...")` decoded to raw bytes.
    Binary(Vec<u8>),
    /// `(module quote "...")`.
    Quote,
}

/// A `(module ...)` form: its optional `$name` and its body.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleForm {
    pub name: Option<String>,
    pub source: ModuleSource,
}

/// A directive asserting that a module fails to build or instantiate.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleAssertion {
    pub kind: DirectiveKind,
    pub module: ModuleForm,
    /// Expected failure text.
    pub message: String,
}

/// `(register "name" $module?)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub name: String,
    pub module: Option<String>,
}

/// Which optional parts of an invocation directive are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    ParamsAndTail,
    ParamsOnly,
    TailOnly,
    Neither,
}

impl Shape {
    fn has_params(self) -> bool {
        matches!(self, Shape::ParamsAndTail | Shape::ParamsOnly)
    }

    fn has_tail(self) -> bool {
        matches!(self, Shape::ParamsAndTail | Shape::TailOnly)
    }
}

/// The shapes tried for `kind`, in priority order.
pub fn shapes(kind: DirectiveKind) -> &'static [Shape] {
    match kind {
        DirectiveKind::AssertReturn => &[Shape::ParamsAndTail, Shape::ParamsOnly, Shape::TailOnly, Shape::Neither],
        // the trap message is mandatory
        DirectiveKind::AssertTrap | DirectiveKind::AssertExhaustion => &[Shape::ParamsAndTail, Shape::TailOnly],
        DirectiveKind::AssertException | DirectiveKind::Invoke => &[Shape::ParamsOnly, Shape::Neither],
        _ => &[],
    }
}

const INVOCATION_KINDS: [DirectiveKind; 5] = [
    DirectiveKind::AssertReturn,
    DirectiveKind::AssertTrap,
    DirectiveKind::AssertExhaustion,
    DirectiveKind::AssertException,
    DirectiveKind::Invoke,
];

/// Matches a directive up to and including the invoked function name. The
/// `invoke` group is the opening parenthesis of the invoke list.
fn head_pattern(kind: DirectiveKind) -> String {
    const TARGET: &str = r#"(?:\$(?P<module>[^\s"()]+)\s+)?"(?P<func>(?:[^"\\]|\\.)*)""#;
    match kind {
        DirectiveKind::Invoke => format!(r"^(?P<invoke>\()\s*invoke\s+{TARGET}"),
        _ => format!(r"^\(\s*{}\s+(?P<invoke>\()\s*invoke\s+{TARGET}", kind.keyword()),
    }
}

static HEAD_PATTERNS: Lazy<HashMap<DirectiveKind, Regex>> = Lazy::new(|| {
    INVOCATION_KINDS
        .iter()
        .filter_map(|&kind| Regex::new(&head_pattern(kind)).ok().map(|re| (kind, re)))
        .collect()
});

static GET_ACTION: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^\(\s*assert_return\s+\(get\b").ok());

/// Whether an `assert_return` checks a global (`(get ...)`) rather than a call.
pub fn is_get_action(form: &Form) -> bool {
    let text = strip_comments(form.text.trim());
    GET_ACTION.as_ref().is_some_and(|re| re.is_match(text.trim()))
}

/// Take apart an invocation directive: `assert_return`, `assert_trap` on an
/// invoke, `assert_exhaustion`, `assert_exception` or bare `invoke`.
pub fn parse_assertion(form: &Form) -> Result<Assertion, DirectiveParseError> {
    let stripped = strip_comments(form.text.trim());
    let text = stripped.trim();
    let caps = HEAD_PATTERNS
        .get(&form.kind)
        .and_then(|re| re.captures(text))
        .ok_or_else(|| DirectiveParseError::new(form, "no matching shape"))?;
    let (Some(head), Some(open)) = (caps.get(0), caps.name("invoke")) else {
        return Err(DirectiveParseError::new(form, "no matching shape"));
    };
    let close = list_end(text.as_bytes(), open.start()).ok_or_else(|| DirectiveParseError::new(form, "unbalanced invoke"))?;
    let params = list_bodies(&text[head.end()..close])
        .ok_or_else(|| DirectiveParseError::new(form, "arguments are not parenthesised values"))?;

    let tail = match form.kind {
        DirectiveKind::Invoke => text.get(close + 1..),
        _ => text.strip_suffix(')').and_then(|body| body.get(close + 1..)),
    };
    let tail = tail
        .and_then(split_top_level)
        .ok_or_else(|| DirectiveParseError::new(form, "unbalanced form"))?;

    let shape = match (params.is_empty(), tail.is_empty()) {
        (false, false) => Shape::ParamsAndTail,
        (false, true) => Shape::ParamsOnly,
        (true, false) => Shape::TailOnly,
        (true, true) => Shape::Neither,
    };
    if !shapes(form.kind).contains(&shape) {
        return Err(DirectiveParseError::new(form, "no matching shape"));
    }
    build_assertion(form, &caps, &params, &tail)
}

/// Bodies of the items of `text`, or `None` unless every item is a
/// balanced list.
fn list_bodies(text: &str) -> Option<Vec<String>> {
    split_top_level(text)?
        .into_iter()
        .map(|item| match item {
            Item::List(list) => Some(list_body(list).to_string()),
            _ => None,
        })
        .collect()
}

fn build_assertion(
    form: &Form,
    caps: &Captures<'_>,
    params: &[String],
    tail: &[Item<'_>],
) -> Result<Assertion, DirectiveParseError> {
    let literals = |texts: &[String]| {
        texts
            .iter()
            .map(|t| TypedValue::parse_literal(t))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DirectiveParseError::value(form, e))
    };
    let invocation = Invocation {
        module: caps.name("module").map(|m| m.as_str().to_string()),
        function: caps.name("func").map(|m| m.as_str().to_string()).unwrap_or_default(),
        args: literals(params)?,
    };
    let message = || match tail {
        [Item::Str(text)] => Ok(text.to_string()),
        _ => Err(DirectiveParseError::new(form, "expected a message")),
    };
    let expectation = match form.kind {
        DirectiveKind::AssertReturn => {
            let results = tail
                .iter()
                .map(|item| match item {
                    Item::List(list) => Ok(list_body(list).to_string()),
                    _ => Err(DirectiveParseError::new(form, "results are not parenthesised values")),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Some(Expectation::Results(literals(results.as_slice())?))
        }
        DirectiveKind::AssertTrap => Some(Expectation::Trap(message()?)),
        DirectiveKind::AssertExhaustion => {
            message()?;
            Some(Expectation::Trap(super::compare::EXHAUSTION_MESSAGE.to_string()))
        }
        DirectiveKind::AssertException => Some(Expectation::Trap(super::compare::EXCEPTION_MESSAGE.to_string())),
        _ => None,
    };
    Ok(Assertion {
        kind: form.kind,
        invocation,
        expectation,
    })
}

/// `text` with every comment outside a string literal replaced by a space.
fn strip_comments(text: &str) -> Cow<'_, str> {
    if !text.contains(";;") && !text.contains("(;") {
        return Cow::Borrowed(text);
    }
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let (mut i, mut copied) = (0, 0);
    while i < bytes.len() {
        let comment_end = match bytes[i] {
            b'"' => {
                i = string_end(bytes, i).map_or(bytes.len(), |end| end + 1);
                continue;
            }
            b';' if bytes.get(i + 1) == Some(&b';') => text[i..].find('\n').map_or(bytes.len(), |n| i + n),
            b'(' if bytes.get(i + 1) == Some(&b';') => block_comment_end(bytes, i),
            _ => {
                i += 1;
                continue;
            }
        };
        out.push_str(&text[copied..i]);
        out.push(' ');
        i = comment_end;
        copied = i;
    }
    out.push_str(&text[copied..]);
    Cow::Owned(out)
}

/// Index just past the `;)` closing the block comment at `start`.
fn block_comment_end(bytes: &[u8], start: usize) -> usize {
    let (mut i, mut nesting) = (start, 0usize);
    while i < bytes.len() {
        if bytes[i..].starts_with(b"(;") {
            nesting += 1;
            i += 2;
        } else if bytes[i..].starts_with(b";)") {
            nesting -= 1;
            i += 2;
            if nesting == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// A top-level item of a parenthesised sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Item<'a> {
    /// `( ... )` including the parentheses.
    List(&'a str),
    /// String literal contents, escapes still encoded.
    Str(&'a str),
    /// Any other token, such as `$name` or `binary`.
    Atom(&'a str),
}

/// Split text into top-level items, or `None` if the parentheses do not
/// balance or a string is unterminated.
pub fn split_top_level(text: &str) -> Option<Vec<Item<'_>>> {
    let bytes = text.as_bytes();
    let mut items = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'(' => {
                let end = list_end(bytes, i)?;
                items.push(Item::List(&text[i..=end]));
                i = end + 1;
            }
            b')' => return None,
            b'"' => {
                let end = string_end(bytes, i)?;
                items.push(Item::Str(&text[i + 1..end]));
                i = end + 1;
            }
            _ => {
                let start = i;
                while i < bytes.len() && !matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\n' | b'(' | b')' | b'"') {
                    i += 1;
                }
                items.push(Item::Atom(&text[start..i]));
            }
        }
    }
    Some(items)
}

/// Index of the `)` closing the list that opens at `start`.
fn list_end(bytes: &[u8], start: usize) -> Option<usize> {
    let (mut i, mut depth) = (start, 0usize);
    loop {
        match *bytes.get(i)? {
            b'"' => i = string_end(bytes, i)?,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
}

/// Index of the closing quote of the string starting at `start`.
fn string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    loop {
        match *bytes.get(i)? {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
}

/// Text between the outer parentheses of a list item, trimmed.
fn list_body(list: &str) -> &str {
    list.strip_prefix('(').and_then(|l| l.strip_suffix(')')).unwrap_or(list).trim()
}

/// Items of a form's comment-free `text` after its leading keyword.
fn form_items<'a>(form: &Form, text: &'a str) -> Result<Vec<Item<'a>>, DirectiveParseError> {
    let body = list_body(text.trim());
    let keyword_len = body.find(|c: char| c.is_whitespace() || c == '(' || c == '"').unwrap_or(body.len());
    split_top_level(&body[keyword_len..]).ok_or_else(|| DirectiveParseError::new(form, "unbalanced form"))
}

/// Take apart a `(module ...)` form.
pub fn parse_module_form(text: &str) -> Option<ModuleForm> {
    let text = text.trim();
    let stripped = strip_comments(text);
    let body = list_body(stripped.trim());
    let rest = body.strip_prefix("module")?;
    let items = split_top_level(rest)?;
    let mut items = items.as_slice();
    let name = match items.first() {
        Some(Item::Atom(atom)) if atom.starts_with('$') => {
            items = &items[1..];
            Some(atom[1..].to_string())
        }
        _ => None,
    };
    let source = match items.first() {
        Some(Item::Atom("binary")) => {
            let mut bytes = Vec::new();
            for item in &items[1..] {
                let Item::Str(s) = item else {
                    return None;
                };
                bytes.extend(decode_string(s)?);
            }
            ModuleSource::Binary(bytes)
        }
        Some(Item::Atom("quote")) => ModuleSource::Quote,
        _ => ModuleSource::Text(text.to_string()),
    };
    Some(ModuleForm { name, source })
}

/// Whether an `assert_trap` applies to a module instantiation rather than
/// an invocation.
pub fn is_module_trap(form: &Form) -> bool {
    let text = strip_comments(&form.text);
    matches!(
        form_items(form, &text).as_deref(),
        Ok([Item::List(first), ..]) if list_body(first).starts_with("module")
    )
}

/// Take apart `assert_invalid`, `assert_malformed`, `assert_unlinkable`,
/// or a module-level `assert_trap`.
pub fn parse_module_assertion(form: &Form) -> Result<ModuleAssertion, DirectiveParseError> {
    let text = strip_comments(&form.text);
    let items = form_items(form, &text)?;
    let [Item::List(module), Item::Str(message), ..] = items.as_slice() else {
        return Err(DirectiveParseError::new(form, "expected a module and a message"));
    };
    let module = parse_module_form(module).ok_or_else(|| DirectiveParseError::new(form, "malformed module form"))?;
    Ok(ModuleAssertion {
        kind: form.kind,
        module,
        message: message.to_string(),
    })
}

/// Take apart `(register "name" $module?)`.
pub fn parse_register(form: &Form) -> Result<Registration, DirectiveParseError> {
    let text = strip_comments(&form.text);
    match form_items(form, &text)?.as_slice() {
        [Item::Str(name)] => Ok(Registration {
            name: name.to_string(),
            module: None,
        }),
        [Item::Str(name), Item::Atom(module)] if module.starts_with('$') => Ok(Registration {
            name: name.to_string(),
            module: Some(module[1..].to_string()),
        }),
        _ => Err(DirectiveParseError::new(form, "expected a name and an optional $module")),
    }
}

/// Decode the contents of a string literal into bytes.
///
/// Understands `\hh` hex escapes, `\t \n \r \" \' \\`, and `\u{...}`.
pub fn decode_string(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let (_, esc) = chars.next()?;
        match esc {
            't' => out.push(b'\t'),
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            '"' => out.push(b'"'),
            '\'' => out.push(b'\''),
            '\\' => out.push(b'\\'),
            'u' => {
                let rest = s.get(i + 2..)?.strip_prefix('{')?;
                let close = rest.find('}')?;
                let code = u32::from_str_radix(&rest[..close].replace('_', ""), 16).ok()?;
                let c = char::from_u32(code)?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                // `{`, the digits and `}`
                for _ in 0..close + 2 {
                    chars.next();
                }
            }
            _ => {
                let (_, lo) = chars.next()?;
                let pair: String = [esc, lo].iter().collect();
                out.extend(hex::decode(pair).ok()?);
            }
        }
    }
    Some(out)
}
