//! Run configuration.
//!
//! [`Config`] carries every option of a run. The binary builds it from the
//! command line; tests build it directly from [`Config::default`].

use crate::error::ConfigError;
use crate::session::Transport;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

/// Prompt printed by the runtime's REPL when it is ready for a command.
pub const DEFAULT_PROMPT: &str = "webassembly> ";

/// Prompt printed by the AOT compiler on success.
pub const AOT_SUCCESS_PROMPT: &str = "Compile success";

/// Language and engine features the run is configured for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    pub sgx: bool,
    pub simd: bool,
    pub xip: bool,
    pub eh: bool,
    pub multi_module: bool,
    pub multi_thread: bool,
    pub gc: bool,
    pub extended_const: bool,
    pub memory64: bool,
    pub multi_memory: bool,
}

/// Emulator wrapping for the runtime under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emulator {
    pub firmware: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub wast2wasm: String,
    pub interpreter: String,
    pub aot_compiler: String,
    /// Keep temporary artifacts after the run.
    pub no_cleanup: bool,
    pub start_timeout: Duration,
    /// Start-up timeout when the module is expected to fail.
    pub start_fail_timeout: Duration,
    /// Timeout for each invocation.
    pub test_timeout: Duration,
    pub transport: Transport,
    /// Where artifacts of a failing form are preserved.
    pub log_dir: Option<PathBuf>,
    /// Raw transcript of every session.
    pub debug_file: Option<PathBuf>,
    pub aot: bool,
    pub target: String,
    pub features: Features,
    /// Run the runtime inside an emulator; `None` runs it directly.
    pub qemu: Option<Emulator>,
    pub verbose: bool,
    /// Directory holding temporary and registered artifacts.
    pub work_dir: PathBuf,
    pub skip: SkipList,
    pub messages: MessageTable,
    pub prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wast2wasm: "wast2wasm".to_string(),
            interpreter: "iwasm".to_string(),
            aot_compiler: "wamrc".to_string(),
            no_cleanup: false,
            start_timeout: Duration::from_secs(30),
            start_fail_timeout: Duration::from_secs(2),
            test_timeout: Duration::from_secs(20),
            transport: Transport::Pty,
            log_dir: None,
            debug_file: None,
            aot: false,
            target: "x86_64".to_string(),
            features: Features::default(),
            qemu: None,
            verbose: false,
            work_dir: std::env::temp_dir(),
            skip: SkipList::default(),
            messages: MessageTable::default(),
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl Config {
    /// Whether the runtime under test is the Python reference interpreter,
    /// which needs extra skip patterns.
    pub fn is_reference_interpreter(&self) -> bool {
        self.interpreter.ends_with(".py")
    }
}

/// Forms the reference interpreter is known to mishandle.
pub const REFERENCE_INTERPRETER_SKIPS: [&str; 6] = [
    // names.wast
    "invoke \"~!",
    // conversions.wast
    "18446742974197923840.0",
    "18446744073709549568.0",
    "9223372036854775808",
    "reinterpret_f.*nan",
    // endianness
    ".const 0x1.fff",
];

/// Patterns of forms to skip.
#[derive(Debug, Clone, Default)]
pub struct SkipList {
    patterns: Vec<Regex>,
}

impl SkipList {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let mut list = Self::default();
        for p in patterns {
            list.add(p.as_ref())?;
        }
        Ok(list)
    }

    pub fn add(&mut self, pattern: &str) -> Result<(), ConfigError> {
        let re = Regex::new(pattern).map_err(|e| ConfigError::InvalidSkipPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.patterns.push(re);
        Ok(())
    }

    /// Whether any pattern matches anywhere in `form`.
    pub fn matches(&self, form: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(form))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Failure wordings accepted in place of the expected one.
///
/// Rewrites apply to the expected text before matching; pairs accept
/// a specific produced wording for a specific expected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTable {
    rewrites: Vec<(String, String)>,
    pairs: Vec<(String, String)>,
}

const DEFAULT_REWRITES: [(&str, &str); 1] = [("malformed", "invalid")];

const DEFAULT_PAIRS: [(&str, &str); 8] = [
    ("unexpected end of section or function", "unexpected end"),
    ("invalid value type", "unexpected end"),
    ("integer too large", "tables cannot be shared"),
    ("zero byte expected", "unknown table"),
    ("invalid section id", "unexpected end of section or function"),
    ("illegal opcode", "unexpected end of section or function"),
    ("length out of bounds", "unexpected end"),
    ("integer representation too long", "invalid section id"),
];

impl Default for MessageTable {
    fn default() -> Self {
        let owned = |pairs: &[(&str, &str)]| pairs.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect();
        Self {
            rewrites: owned(&DEFAULT_REWRITES),
            pairs: owned(&DEFAULT_PAIRS),
        }
    }
}

impl MessageTable {
    /// A table with no rewrites and no pairs: only containment is accepted.
    pub fn empty() -> Self {
        Self {
            rewrites: Vec::new(),
            pairs: Vec::new(),
        }
    }

    /// Add a pair written as `EXPECTED=ACTUAL`.
    pub fn add_pair(&mut self, pair: &str) -> Result<(), ConfigError> {
        match pair.split_once('=') {
            Some((expected, actual)) if !expected.is_empty() && !actual.is_empty() => {
                self.pairs.push((expected.to_string(), actual.to_string()));
                Ok(())
            }
            _ => Err(ConfigError::InvalidSubstitution(pair.to_string())),
        }
    }

    /// Spellings of `expected` to look for: as written, then each rewrite.
    pub fn candidates(&self, expected: &str) -> Vec<String> {
        let mut out = vec![expected.to_string()];
        for (from, to) in &self.rewrites {
            let rewritten = expected.replace(from.as_str(), to);
            if !out.contains(&rewritten) {
                out.push(rewritten);
            }
        }
        out
    }

    /// Whether `output` reports the failure described by `expected`.
    pub fn accepts(&self, expected: &str, output: &str) -> bool {
        let produced = output.trim();
        self.candidates(expected).iter().any(|candidate| {
            produced.contains(candidate.as_str())
                || (!produced.is_empty() && candidate.contains(produced))
                || self
                    .pairs
                    .iter()
                    .any(|(exp, actual)| exp == candidate && produced.contains(actual.as_str()))
        })
    }
}
