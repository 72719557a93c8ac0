//! Top-level forms of a `.wast` script.
//!
//! A script is a sequence of parenthesised forms, each one a module
//! definition, an action, or an assertion about a module or action. The
//! driver never builds a full AST: each form keeps its raw source text and
//! is classified by its leading keyword, and the handler for that keyword
//! extracts only what it needs.

use std::fmt;

/// The keyword classification of a top-level form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    /// `(module ...)`, optionally named.
    Module,
    /// `(assert_return (invoke ...) results...)`.
    AssertReturn,
    /// `(assert_trap (invoke ...) "msg")` or `(assert_trap (module ...) "msg")`.
    AssertTrap,
    /// `(assert_invalid (module ...) "msg")`.
    AssertInvalid,
    /// `(assert_malformed (module ...) "msg")`.
    AssertMalformed,
    /// `(assert_unlinkable (module ...) "msg")`.
    AssertUnlinkable,
    /// `(assert_exhaustion (invoke ...) "msg")`.
    AssertExhaustion,
    /// `(assert_exception (invoke ...))`.
    AssertException,
    /// Legacy `(assert_return_canonical_nan ...)` and friends.
    AssertReturnNan,
    /// Bare `(invoke ...)`.
    Invoke,
    /// `(register "name" $module?)`.
    Register,
    /// A top-level `;;` line comment.
    Comment,
    /// Anything else; rejected by the dispatcher.
    Unknown,
}

impl DirectiveKind {
    /// Classify a form keyword such as `assert_return`.
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "module" => DirectiveKind::Module,
            "assert_return" => DirectiveKind::AssertReturn,
            "assert_trap" => DirectiveKind::AssertTrap,
            "assert_invalid" => DirectiveKind::AssertInvalid,
            "assert_malformed" => DirectiveKind::AssertMalformed,
            "assert_unlinkable" => DirectiveKind::AssertUnlinkable,
            "assert_exhaustion" => DirectiveKind::AssertExhaustion,
            "assert_exception" => DirectiveKind::AssertException,
            "invoke" => DirectiveKind::Invoke,
            "register" => DirectiveKind::Register,
            kw if kw.starts_with("assert_return_") && kw.ends_with("_nan") => DirectiveKind::AssertReturnNan,
            _ => DirectiveKind::Unknown,
        }
    }

    /// The keyword as it appears in source, for messages and for building
    /// the matching shape patterns.
    pub fn keyword(self) -> &'static str {
        match self {
            DirectiveKind::Module => "module",
            DirectiveKind::AssertReturn => "assert_return",
            DirectiveKind::AssertTrap => "assert_trap",
            DirectiveKind::AssertInvalid => "assert_invalid",
            DirectiveKind::AssertMalformed => "assert_malformed",
            DirectiveKind::AssertUnlinkable => "assert_unlinkable",
            DirectiveKind::AssertExhaustion => "assert_exhaustion",
            DirectiveKind::AssertException => "assert_exception",
            DirectiveKind::AssertReturnNan => "assert_return_*_nan",
            DirectiveKind::Invoke => "invoke",
            DirectiveKind::Register => "register",
            DirectiveKind::Comment => ";;",
            DirectiveKind::Unknown => "<unknown>",
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One top-level form with its source text and position.
#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    /// The exact source text, from the opening `(` to the matching `)`, or
    /// the full comment line for [`DirectiveKind::Comment`].
    pub text: String,
    pub kind: DirectiveKind,
    /// Line (1-indexed) on which the form starts.
    pub line: usize,
}

impl Form {
    pub fn new(text: impl Into<String>, line: usize) -> Self {
        let text = text.into();
        let kind = classify(&text);
        Self { text, kind, line }
    }

    /// The first `len` characters of the form, for error messages.
    pub fn preview(&self, len: usize) -> String {
        preview(&self.text, len)
    }
}

/// Bounded prefix of `text`, on a character boundary.
pub(crate) fn preview(text: &str, len: usize) -> String {
    text.chars().take(len).collect()
}

fn classify(text: &str) -> DirectiveKind {
    if text.starts_with(";;") {
        return DirectiveKind::Comment;
    }
    let Some(rest) = text.strip_prefix('(') else {
        return DirectiveKind::Unknown;
    };
    let keyword: String = rest
        .trim_start()
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '(' && *c != ')')
        .collect();
    DirectiveKind::from_keyword(&keyword)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("(module (func))", DirectiveKind::Module)]
    #[case("(module $M (func))", DirectiveKind::Module)]
    #[case("(assert_return (invoke \"f\"))", DirectiveKind::AssertReturn)]
    #[case("(assert_trap (invoke \"f\") \"x\")", DirectiveKind::AssertTrap)]
    #[case("(assert_return_canonical_nan (invoke \"f\"))", DirectiveKind::AssertReturnNan)]
    #[case("(assert_return_arithmetic_nan (invoke \"f\"))", DirectiveKind::AssertReturnNan)]
    #[case("(register \"M\")", DirectiveKind::Register)]
    #[case(";; a comment", DirectiveKind::Comment)]
    #[case("(assert_uninstantiable (module) \"x\")", DirectiveKind::Unknown)]
    #[case("(invoke\"f\")", DirectiveKind::Unknown)]
    fn classifies_by_keyword(#[case] text: &str, #[case] expected: DirectiveKind) {
        assert_eq!(Form::new(text, 1).kind, expected);
    }

    #[test]
    fn preview_is_bounded() {
        let form = Form::new("(assert_return (invoke \"ünïcode\"))", 3);
        assert_eq!(form.preview(20), "(assert_return (invo");
        assert_eq!(form.preview(1000), form.text);
    }
}
