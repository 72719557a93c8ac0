//! Splits script text into top-level forms.
//!
//! The reader only understands enough of the text format to find form
//! boundaries: parentheses, string literals, and both comment styles. At
//! depth zero a `;;` line comment becomes a [`DirectiveKind::Comment`] form
//! and a `(; ... ;)` block comment is dropped. Inside a form everything is
//! kept verbatim; strings and comments are tracked only so that a paren
//! inside them does not change the depth.
//!
//! [`DirectiveKind::Comment`]: super::DirectiveKind::Comment

use super::form::{preview, Form};
use thiserror::Error;

const PREVIEW_LEN: usize = 80;

/// The script text is not a sequence of forms.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} on line {line}: '{preview}'")]
pub struct ScriptParseError {
    pub message: &'static str,
    pub line: usize,
    pub preview: String,
}

/// Iterator over the top-level forms of a script.
///
/// Yields forms in source order. After the first error the iterator is
/// exhausted.
pub struct FormReader<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    failed: bool,
}

impl<'a> FormReader<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            failed: false,
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn starts_with(&self, pat: &[u8]) -> bool {
        self.bytes[self.pos..].starts_with(pat)
    }

    fn advance(&mut self) {
        if self.bytes[self.pos] == b'\n' {
            self.line += 1;
        }
        self.pos += 1;
    }

    fn error(&mut self, message: &'static str, line: usize, at: usize) -> ScriptParseError {
        self.failed = true;
        ScriptParseError {
            message,
            line,
            preview: preview(&self.source[at..], PREVIEW_LEN),
        }
    }

    /// Skip a line comment, stopping before the newline.
    fn skip_line_comment(&mut self) {
        while let Some(b) = self.peek(0) {
            if b == b'\n' {
                break;
            }
            self.advance();
        }
    }

    /// Skip a (possibly nested) block comment starting at `(;`.
    fn skip_block_comment(&mut self) -> Result<(), ScriptParseError> {
        let (start, line) = (self.pos, self.line);
        let mut nesting = 0usize;
        while self.pos < self.bytes.len() {
            if self.starts_with(b"(;") {
                nesting += 1;
                self.advance();
                self.advance();
            } else if self.starts_with(b";)") {
                nesting -= 1;
                self.advance();
                self.advance();
                if nesting == 0 {
                    return Ok(());
                }
            } else {
                self.advance();
            }
        }
        Err(self.error("mismatch multiline comment", line, start))
    }

    /// Skip a string literal starting at the opening quote.
    fn skip_string(&mut self) -> bool {
        self.advance();
        while let Some(b) = self.peek(0) {
            match b {
                b'\\' => {
                    self.advance();
                    if self.peek(0).is_some() {
                        self.advance();
                    }
                }
                b'"' => {
                    self.advance();
                    return true;
                }
                _ => self.advance(),
            }
        }
        false
    }

    /// Read one parenthesised form starting at `(`.
    fn read_form(&mut self) -> Result<Form, ScriptParseError> {
        let (start, line) = (self.pos, self.line);
        let mut depth = 0usize;
        while let Some(b) = self.peek(0) {
            match b {
                b'"' => {
                    if !self.skip_string() {
                        break;
                    }
                    continue;
                }
                b';' if self.peek(1) == Some(b';') => {
                    self.skip_line_comment();
                    continue;
                }
                b'(' if self.peek(1) == Some(b';') => {
                    if self.skip_block_comment().is_err() {
                        break;
                    }
                    continue;
                }
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ => {}
            }
            self.advance();
            if depth == 0 {
                return Ok(Form::new(&self.source[start..self.pos], line));
            }
        }
        Err(self.error("unterminated form", line, start))
    }
}

impl Iterator for FormReader<'_> {
    type Item = Result<Form, ScriptParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while let Some(b) = self.peek(0) {
            match b {
                b' ' | b'\t' | b'\r' | b'\n' => self.advance(),
                b';' if self.peek(1) == Some(b';') => {
                    let (start, line) = (self.pos, self.line);
                    self.skip_line_comment();
                    let text = self.source[start..self.pos].trim_end_matches('\r');
                    return Some(Ok(Form::new(text, line)));
                }
                b'(' if self.peek(1) == Some(b';') => {
                    if let Err(e) = self.skip_block_comment() {
                        return Some(Err(e));
                    }
                }
                b'(' => return Some(self.read_form()),
                _ => {
                    let (at, line) = (self.pos, self.line);
                    return Some(Err(self.error("garbage", line, at)));
                }
            }
        }
        None
    }
}

/// Read every form of a script, failing on the first malformed one.
pub fn read_forms(source: &str) -> Result<Vec<Form>, ScriptParseError> {
    FormReader::new(source).collect()
}
