//! Comparison of produced results against expected tokens.
//!
//! Produced text comes from the runtime under test; expected text is the
//! canonical token of the assertion's literals (see [`TypedValue::token`]).
//! Both sides are comma-joined lists for multi-value results.

use super::values::{format_g7, LaneType, TypedValue, V128};
use crate::error::ResultMismatchError;

/// Expected trap text for `assert_exhaustion`.
pub const EXHAUSTION_MESSAGE: &str = "stack overflow";

/// Expected trap text for `assert_exception`.
pub const EXCEPTION_MESSAGE: &str = "uncaught wasm exception";

const TRAP_PREFIX: &str = "Exception: ";

/// Pairs (expected, produced) accepted as equal despite differing. Both are
/// rounding artifacts of the reference tooling at the f32/f64 limits.
const KNOWN_ROUNDING_PAIRS: [(&str, &str); 2] =
    [("2.360523e+13:f32", "2.360522e+13:f32"), ("1.797693e+308:f64", "inf:f64")];

/// Compare a comma-joined produced list against a comma-joined expected list.
///
/// Returns the first mismatch; a different number of results is always an
/// error.
pub fn match_results(produced: &str, expected: &str) -> Result<(), ResultMismatchError> {
    let produced_list: Vec<&str> = produced.split(',').collect();
    let expected_list: Vec<&str> = expected.split(',').collect();
    if produced_list.len() != expected_list.len() {
        return Err(ResultMismatchError::Count {
            expected: expected.to_string(),
            produced: produced.to_string(),
        });
    }
    for (index, (out, exp)) in produced_list.iter().zip(&expected_list).enumerate() {
        if !value_matches(out, exp) {
            return Err(ResultMismatchError::Value {
                index,
                expected: exp.to_string(),
                produced: out.to_string(),
            });
        }
    }
    Ok(())
}

/// Whether one produced token denotes the same value as one expected token.
pub fn value_matches(produced: &str, expected: &str) -> bool {
    if produced == expected {
        return true;
    }
    if expected.is_empty() {
        return false;
    }
    if KNOWN_ROUNDING_PAIRS.contains(&(expected, produced)) {
        return true;
    }
    if produced.contains("v128") {
        return vector_matches(produced, expected);
    }
    scalar_matches(produced, expected)
}

fn scalar_matches(produced: &str, expected: &str) -> bool {
    let (Some((_, out_type)), Some((_, exp_type))) = (produced.rsplit_once(':'), expected.rsplit_once(':')) else {
        return false;
    };
    if out_type != exp_type {
        return false;
    }
    let (Ok(out), Ok(exp)) = (TypedValue::from_token(produced), TypedValue::from_token(expected)) else {
        return false;
    };
    match (&out, &exp) {
        (TypedValue::I32(a), TypedValue::I32(b)) => a == b || (a & 0xffff_ffff) == (b & 0xffff_ffff),
        (TypedValue::I64(a), TypedValue::I64(b)) => {
            let mask = (1i128 << 64) - 1;
            a == b || (a & mask) == (b & mask)
        }
        (TypedValue::F32(a), TypedValue::F32(b)) => {
            float_matches(a.value, b.value) || (a.value as f32).to_bits() == (b.value as f32).to_bits()
        }
        (TypedValue::F64(a), TypedValue::F64(b)) => float_matches(a.value, b.value),
        (TypedValue::RefExtern(a), TypedValue::RefExtern(b)) | (TypedValue::RefHost(a), TypedValue::RefHost(b)) => {
            a == b
        }
        _ => false,
    }
}

/// Equal, both NaN, or equal at seven significant digits.
fn float_matches(out: f64, exp: f64) -> bool {
    out == exp || (out.is_nan() && exp.is_nan()) || out.to_bits() == exp.to_bits() || format_g7(out) == format_g7(exp)
}

/// Compare `<w0 w1>:v128` against `[w0 w1]:lanes:v128`.
fn vector_matches(produced: &str, expected: &str) -> bool {
    let Ok(TypedValue::V128(exp)) = TypedValue::from_token(expected) else {
        return false;
    };
    let Ok(TypedValue::V128(out)) = TypedValue::from_produced_vector(produced, exp.lanes) else {
        return false;
    };
    lanes_match(&out, &exp)
}

/// Integer lanes compare as raw words; float lanes compare lane by lane.
pub fn lanes_match(out: &V128, exp: &V128) -> bool {
    if !exp.lanes.is_float() {
        return out.words == exp.words;
    }
    let out_lanes = out.float_lanes();
    let exp_lanes = exp.float_lanes();
    out_lanes
        .iter()
        .zip(&exp_lanes)
        .all(|(o, e)| o == e || (o.is_nan() && e.is_nan()) || format_g7(*o) == format_g7(*e))
}

/// Whether the produced text reports the expected trap.
///
/// A leading `Exception: ` is ignored on both sides and either text may
/// contain the other. An empty produced text never matches.
pub fn trap_matches(produced: &str, expected: &str) -> bool {
    let out = produced.strip_prefix(TRAP_PREFIX).unwrap_or(produced).trim_end();
    let exp = expected.strip_prefix(TRAP_PREFIX).unwrap_or(expected).trim_end();
    !out.is_empty() && (out.contains(exp) || exp.contains(out))
}

/// [`trap_matches`] as a result, for propagation with `?`.
pub fn check_trap(produced: &str, expected: &str) -> Result<(), ResultMismatchError> {
    if trap_matches(produced, expected) {
        Ok(())
    } else {
        Err(ResultMismatchError::Trap {
            expected: expected.to_string(),
            produced: produced.to_string(),
        })
    }
}

/// Lane type carried by an expected vector token, if it is one.
pub fn expected_lane_type(expected: &str) -> Option<LaneType> {
    match TypedValue::from_token(expected) {
        Ok(TypedValue::V128(v)) => Some(v.lanes),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0x3:i32", "0x3:i32")]
    #[case("0xffffffff:i32", "-0x1:i32")]
    #[case("-0x1:i64", "0xffffffffffffffff:i64")]
    #[case("1.5:f32", "1.5:f32")]
    #[case("nan:f32", "nan:f32")]
    #[case("-nan:f64", "nan:f64")]
    #[case("0.3333333:f32", "0.33333334:f32")]
    #[case("0x7:ref.extern", "0x7:ref.extern")]
    #[case("7:ref.host", "0x7:ref.host")]
    #[case("ref.func", "ref.func")]
    #[case("func:ref.null", "func:ref.null")]
    #[case("<0x1 0x2>:v128", "[0x1 0x2]:i64x2:v128")]
    #[case("<0x7fc00000 0x0>:v128", "[0x7fc00001 0x0]:f32x4:v128")]
    fn matching_values(#[case] produced: &str, #[case] expected: &str) {
        assert!(value_matches(produced, expected), "{produced} vs {expected}");
    }

    #[rstest]
    #[case("0x3:i32", "0x4:i32")]
    #[case("0x3:i64", "0x3:i32")]
    #[case("1.5:f32", "1.25:f32")]
    #[case("nan:f32", "0:f32")]
    #[case("", "0x1:i32")]
    #[case("0x1:i32", "")]
    #[case("0x1:ref.extern", "0x2:ref.extern")]
    #[case("ref.func", "ref.array")]
    #[case("<0x1 0x2>:v128", "[0x1 0x3]:i32x4:v128")]
    #[case("<0x3f800000 0x0>:v128", "[0x40000000 0x0]:f32x4:v128")]
    #[case("garbage", "0x1:i32")]
    fn mismatching_values(#[case] produced: &str, #[case] expected: &str) {
        assert!(!value_matches(produced, expected), "{produced} vs {expected}");
    }

    #[test]
    fn known_rounding_pairs_do_not_generalize() {
        assert!(value_matches("2.360522e+13:f32", "2.360523e+13:f32"));
        assert!(value_matches("inf:f64", "1.797693e+308:f64"));
        assert!(!value_matches("2.360521e+13:f32", "2.360523e+13:f32"));
        assert!(!value_matches("2.360523e+13:f32", "2.360522e+13:f32"));
        assert!(!value_matches("-inf:f64", "1.797693e+308:f64"));
        assert!(!value_matches("inf:f64", "1.797692e+308:f64"));
    }

    #[test]
    fn result_count_mismatch_is_an_error() {
        let err = match_results("0x1:i32", "0x1:i32,0x2:i32").unwrap_err();
        assert_eq!(
            err,
            ResultMismatchError::Count {
                expected: "0x1:i32,0x2:i32".to_string(),
                produced: "0x1:i32".to_string(),
            }
        );
        assert!(match_results("0x1:i32,0x2:i32", "0x1:i32").is_err());
    }

    #[test]
    fn result_index_is_reported() {
        let err = match_results("0x1:i32,0x5:i64", "0x1:i32,0x2:i64").unwrap_err();
        assert!(matches!(err, ResultMismatchError::Value { index: 1, .. }));
        assert!(match_results("0x1:i32,-0x1:i64", "0x1:i32,0xffffffffffffffff:i64").is_ok());
    }

    #[test]
    fn empty_results_match_empty() {
        assert!(match_results("", "").is_ok());
        assert!(match_results("0x1:i32", "").is_err());
    }

    #[rstest]
    #[case("Exception: integer divide by zero", "integer divide by zero", true)]
    #[case("Exception: integer divide by zero", "Exception: integer divide by zero", true)]
    #[case("Exception: out of bounds memory access", "out of bounds", true)]
    #[case("Exception: unreachable", "unreachable executed", true)]
    #[case("Exception: stack overflow\r", EXHAUSTION_MESSAGE, true)]
    #[case("", "integer divide by zero", false)]
    #[case("Exception: unreachable", "integer overflow", false)]
    fn trap_containment(#[case] produced: &str, #[case] expected: &str, #[case] matched: bool) {
        assert_eq!(trap_matches(produced, expected), matched);
    }

    #[test]
    fn check_trap_names_both_sides() {
        let err = check_trap("0x1:i32", "integer overflow").unwrap_err();
        assert_eq!(
            err,
            ResultMismatchError::Trap {
                expected: "integer overflow".to_string(),
                produced: "0x1:i32".to_string(),
            }
        );
    }

    #[test]
    fn lane_type_from_expected() {
        assert_eq!(expected_lane_type("[0x0 0x0]:f64x2:v128"), Some(LaneType::F64x2));
        assert_eq!(expected_lane_type("0x0:i32"), None);
    }
}
