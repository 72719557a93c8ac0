//! A conformance driver for WebAssembly runtimes.
//!
//! wastrun runs the official specification test scripts (`.wast`) against a
//! runtime that offers an interactive REPL. Each module form is compiled to
//! a binary with an external text-to-binary compiler (and optionally to an
//! AOT image), loaded into a runtime session, and every assertion is turned
//! into one REPL command whose printed result is compared with the expected
//! typed values.
//!
//! # Modules
//!
//! - [`wast`] -- Script reading, directive parsing, typed values and result comparison.
//! - [`session`] -- Interactive sessions with a collaborator process over a pty or pipes.
//! - [`tools`] -- Command lines for the compiler, AOT compiler, runtime and emulator.
//! - [`registry`] -- Compiled module artifacts and temporary files.
//! - [`runner`] -- The directive state machine that runs one script.
//! - [`config`] -- Run configuration.
//! - [`error`] -- Error types.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use wastrun::config::Config;
//! use wastrun::runner::{run_script, Disposition};
//!
//! let config = Config {
//!     interpreter: "/opt/wamr/iwasm".to_string(),
//!     ..Config::default()
//! };
//! let report = run_script(Path::new("i32.wast"), &config);
//! assert_eq!(report.disposition, Disposition::Passed);
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod runner;
pub mod session;
pub mod tools;
pub mod wast;
