//! Error types for a test script run.
//!
//! Every failure that can abort a run is one of the variants of [`RunError`].
//! Expected-failure directives inspect [`CompileError`] and
//! [`SessionError`] output before deciding whether a failure is a pass.

use crate::session::SessionError;
use crate::wast::{DirectiveParseError, ScriptParseError, ValueError};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Which collaborator step failed to produce an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStage {
    /// Text format to binary module.
    Text,
    /// Binary module to AOT image.
    Aot,
    /// Loading the module in the runtime under test.
    Load,
    /// Dumping an object file for diagnostics.
    Inspect,
}

impl fmt::Display for CompileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileStage::Text => write!(f, "compile wast to wasm"),
            CompileStage::Aot => write!(f, "compile wasm to aot"),
            CompileStage::Load => write!(f, "load module"),
            CompileStage::Inspect => write!(f, "dump object"),
        }
    }
}

/// A collaborator rejected a module, or could not be run at all.
#[derive(Error, Debug)]
#[error("{stage} failed: {message}")]
pub struct CompileError {
    pub stage: CompileStage,
    pub message: String,
    /// Everything the collaborator printed, kept for expected-failure matching.
    pub output: String,
}

impl CompileError {
    pub fn new(stage: CompileStage, message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            output: output.into(),
        }
    }
}

/// Produced results disagree with the expectation of an assertion.
#[derive(Error, Debug, PartialEq)]
pub enum ResultMismatchError {
    #[error("Results count incorrect:\n expected: '{expected}'\n  got: '{produced}'")]
    Count { expected: String, produced: String },

    #[error("Result {index} incorrect:\n expected: '{expected}'\n  got: '{produced}'")]
    Value {
        index: usize,
        expected: String,
        produced: String,
    },

    #[error("trap mismatch:\n expected: '{expected}'\n  got: '{produced}'")]
    Trap { expected: String, produced: String },

    #[error("module was expected to fail with '{expected}' but loaded:\n  got: '{produced}'")]
    UnexpectedLoad { expected: String, produced: String },

    #[error("expected failure '{expected}' not found:\n  got: '{produced}'")]
    FailureText { expected: String, produced: String },
}

/// A form whose keyword the dispatcher does not handle.
#[derive(Error, Debug)]
#[error("unrecognized form '{prefix}...'")]
pub struct UnrecognizedDirectiveError {
    pub prefix: String,
}

/// Invalid combination of configuration options.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("QEMU firmware missing")]
    MissingFirmware,

    #[error("Unknown target for QEMU: {0}")]
    UnknownEmulatorTarget(String),

    #[error("invalid message substitution '{0}', expected EXPECTED=ACTUAL")]
    InvalidSubstitution(String),

    #[error("invalid skip pattern '{pattern}': {reason}")]
    InvalidSkipPattern { pattern: String, reason: String },
}

/// Any failure that aborts a script run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    ScriptParse(#[from] ScriptParseError),

    #[error(transparent)]
    DirectiveParse(#[from] DirectiveParseError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed:\n {0}")]
    Mismatch(#[from] ResultMismatchError),

    #[error(transparent)]
    Unrecognized(#[from] UnrecognizedDirectiveError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no module is loaded for '{0}'")]
    NoSession(String),

    #[error("module ${0} is not defined")]
    UnknownModule(String),

    #[error("no module available to register as '{0}'")]
    NothingToRegister(String),

    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RunError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> RunError {
        let path = path.into();
        move |source| RunError::Io { context, path, source }
    }
}
