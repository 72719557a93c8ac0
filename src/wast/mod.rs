//! WebAssembly Script Test (.wast) handling.
//!
//! The driver does not parse module bodies: forms are kept as raw text and
//! only the invocation directives are taken apart, far enough to produce a
//! REPL command line and an expected result.
//!
//! # Example
//!
//! ```
//! use wastrun::wast::{parse_assertion, read_forms};
//!
//! let source = r#"
//!     (module (func (export "f") (result i32) (i32.const 42)))
//!     (assert_return (invoke "f") (i32.const 42))
//! "#;
//! let forms = read_forms(source).unwrap();
//! assert_eq!(forms.len(), 2);
//! let assertion = parse_assertion(&forms[1]).unwrap();
//! assert_eq!(assertion.invocation.command(), "f");
//! ```

mod assertion;
mod compare;
mod form;
mod reader;
mod values;

pub use assertion::{
    decode_string, is_get_action, is_module_trap, parse_assertion, parse_module_assertion, parse_module_form,
    parse_register, shapes, split_top_level, Assertion, DirectiveParseError, Expectation, Invocation, Item,
    ModuleAssertion, ModuleForm, ModuleSource, Registration, Shape,
};
pub use compare::{
    check_trap, expected_lane_type, lanes_match, match_results, trap_matches, value_matches, EXCEPTION_MESSAGE,
    EXHAUSTION_MESSAGE,
};
pub use form::{DirectiveKind, Form};
pub use reader::{read_forms, FormReader, ScriptParseError};
pub use values::{format_g7, FloatValue, LaneType, RefMarker, TypedValue, ValueError, V128};
