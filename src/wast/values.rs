//! Typed values: literal parsing, canonical tokens, and transport encoding.
//!
//! A [`TypedValue`] is decoded from three spellings:
//!
//! - a script literal such as `i32.const -1` or `v128.const f32x4 1 2 3 4`
//!   ([`TypedValue::parse_literal`]),
//! - a canonical token such as `-0x1:i32` or `[0x1 0x0]:i64x2:v128`
//!   ([`TypedValue::from_token`]), which is also what the runtime under test
//!   prints for scalar results,
//! - a produced vector result `<0x1 0x0>:v128`.
//!
//! The canonical token ([`TypedValue::token`]) renders floats with seven
//! significant digits, so two implementations that round the last digit
//! differently still produce the same token.

use byteorder::{ByteOrder, LittleEndian};
use fhex::FromHex;
use std::fmt;
use thiserror::Error;

/// A literal or token that does not denote a value.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid value '{text}': {reason}")]
pub struct ValueError {
    pub text: String,
    pub reason: String,
}

impl ValueError {
    pub fn new(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reason: reason.into(),
        }
    }
}

/// Lane interpretation of a `v128` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneType {
    I8x16,
    I16x8,
    I32x4,
    I64x2,
    F32x4,
    F64x2,
}

impl LaneType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "i8x16" => Some(LaneType::I8x16),
            "i16x8" => Some(LaneType::I16x8),
            "i32x4" => Some(LaneType::I32x4),
            "i64x2" => Some(LaneType::I64x2),
            "f32x4" => Some(LaneType::F32x4),
            "f64x2" => Some(LaneType::F64x2),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LaneType::I8x16 => "i8x16",
            LaneType::I16x8 => "i16x8",
            LaneType::I32x4 => "i32x4",
            LaneType::I64x2 => "i64x2",
            LaneType::F32x4 => "f32x4",
            LaneType::F64x2 => "f64x2",
        }
    }

    pub fn lane_count(self) -> usize {
        16 / self.lane_bytes()
    }

    /// Width of one lane in bytes.
    pub fn lane_bytes(self) -> usize {
        match self {
            LaneType::I8x16 => 1,
            LaneType::I16x8 => 2,
            LaneType::I32x4 | LaneType::F32x4 => 4,
            LaneType::I64x2 | LaneType::F64x2 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, LaneType::F32x4 | LaneType::F64x2)
    }
}

/// A 128-bit vector as two little-endian 64-bit words, low word first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V128 {
    pub lanes: LaneType,
    pub words: [u64; 2],
}

impl V128 {
    /// Pack lane literals in declaration order.
    pub fn pack(lanes: LaneType, literals: &[&str]) -> Result<Self, ValueError> {
        if literals.len() != lanes.lane_count() {
            return Err(ValueError::new(
                literals.join(" "),
                format!("{} needs {} lanes, got {}", lanes.name(), lanes.lane_count(), literals.len()),
            ));
        }
        let mut bytes = [0u8; 16];
        let width = lanes.lane_bytes();
        for (i, literal) in literals.iter().enumerate() {
            let lane = &mut bytes[i * width..(i + 1) * width];
            match lanes {
                LaneType::F32x4 => LittleEndian::write_u32(lane, f32_bits(literal)?),
                LaneType::F64x2 => LittleEndian::write_u64(lane, f64_bits(literal)?),
                _ => {
                    let bits = parse_int(literal)?;
                    let max = (1i128 << (width * 8)) - 1;
                    if bits > max || bits < -(1i128 << (width * 8 - 1)) {
                        return Err(ValueError::new(*literal, format!("out of range for {}", lanes.name())));
                    }
                    LittleEndian::write_uint128(lane, (bits & max) as u128, width);
                }
            }
        }
        Ok(Self::from_bytes(lanes, &bytes))
    }

    pub fn from_bytes(lanes: LaneType, bytes: &[u8; 16]) -> Self {
        Self {
            lanes,
            words: [LittleEndian::read_u64(&bytes[..8]), LittleEndian::read_u64(&bytes[8..])],
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        LittleEndian::write_u64(&mut bytes[..8], self.words[0]);
        LittleEndian::write_u64(&mut bytes[8..], self.words[1]);
        bytes
    }

    /// Float lanes widened to f64; empty for integer lane types.
    pub fn float_lanes(&self) -> Vec<f64> {
        let bytes = self.to_bytes();
        match self.lanes {
            LaneType::F32x4 => bytes.chunks(4).map(|c| f64::from(LittleEndian::read_f32(c))).collect(),
            LaneType::F64x2 => bytes.chunks(8).map(LittleEndian::read_f64).collect(),
            _ => Vec::new(),
        }
    }
}

/// Reference value with no payload, compared by name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefMarker {
    Array,
    Struct,
    Func,
    I31,
    Eq,
    Any,
    /// `ref.extern` written without an index.
    Extern,
    /// `ref.null` written without a heap type.
    Null,
}

impl RefMarker {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "ref.array" => Some(RefMarker::Array),
            "ref.struct" => Some(RefMarker::Struct),
            "ref.func" => Some(RefMarker::Func),
            "ref.i31" => Some(RefMarker::I31),
            "ref.eq" => Some(RefMarker::Eq),
            "ref.any" => Some(RefMarker::Any),
            "ref.extern" => Some(RefMarker::Extern),
            "ref.null" => Some(RefMarker::Null),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RefMarker::Array => "ref.array",
            RefMarker::Struct => "ref.struct",
            RefMarker::Func => "ref.func",
            RefMarker::I31 => "ref.i31",
            RefMarker::Eq => "ref.eq",
            RefMarker::Any => "ref.any",
            RefMarker::Extern => "ref.extern",
            RefMarker::Null => "ref.null",
        }
    }
}

/// A float value along with the literal it was decoded from.
///
/// The literal is what gets sent to the runtime, so that its own parser
/// does the rounding to the declared width.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatValue {
    pub value: f64,
    pub literal: String,
}

/// A value of one of the types the runtime under test can print.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    /// Integer as written in source, sign preserved; compared modulo 2^32.
    I32(i128),
    /// Integer as written in source, sign preserved; compared modulo 2^64.
    I64(i128),
    F32(FloatValue),
    F64(FloatValue),
    V128(V128),
    /// `ref.null <heaptype>`.
    RefNull(String),
    RefExtern(u64),
    RefHost(u64),
    Ref(RefMarker),
}

impl TypedValue {
    /// Decode a script literal: the text inside one `( ... )` argument or
    /// result, such as `f32.const 0x1p-1` or `ref.null extern`.
    pub fn parse_literal(text: &str) -> Result<Self, ValueError> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        let Some((&head, operands)) = parts.split_first() else {
            return Err(ValueError::new(text, "empty literal"));
        };
        let single = || match operands {
            [one] => Ok(*one),
            _ => Err(ValueError::new(text, format!("{head} takes one operand"))),
        };
        match head {
            "i32.const" => {
                let v = parse_int(single()?)?;
                check_range(text, v, 32)?;
                Ok(TypedValue::I32(v))
            }
            "i64.const" => {
                let v = parse_int(single()?)?;
                check_range(text, v, 64)?;
                Ok(TypedValue::I64(v))
            }
            "f32.const" => Ok(TypedValue::F32(parse_float(single()?, FloatWidth::F32)?)),
            "f64.const" => Ok(TypedValue::F64(parse_float(single()?, FloatWidth::F64)?)),
            "v128.const" => {
                let Some((lane_name, lanes)) = operands.split_first() else {
                    return Err(ValueError::new(text, "missing lane type"));
                };
                let lane_type =
                    LaneType::parse(lane_name).ok_or_else(|| ValueError::new(text, "unknown lane type"))?;
                Ok(TypedValue::V128(V128::pack(lane_type, lanes)?))
            }
            "ref.null" if operands.is_empty() => Ok(TypedValue::Ref(RefMarker::Null)),
            "ref.null" => Ok(TypedValue::RefNull(single()?.to_string())),
            "ref.extern" if operands.is_empty() => Ok(TypedValue::Ref(RefMarker::Extern)),
            "ref.extern" => Ok(TypedValue::RefExtern(parse_index(single()?)?)),
            "ref.host" => Ok(TypedValue::RefHost(parse_index(single()?)?)),
            marker => match (RefMarker::parse(marker), operands.is_empty()) {
                (Some(m), true) => Ok(TypedValue::Ref(m)),
                _ => Err(ValueError::new(text, "unknown literal")),
            },
        }
    }

    /// Decode a canonical token.
    pub fn from_token(token: &str) -> Result<Self, ValueError> {
        let token = token.trim();
        if let Some(marker) = RefMarker::parse(token) {
            return Ok(TypedValue::Ref(marker));
        }
        let Some((value, ty)) = token.rsplit_once(':') else {
            return Err(ValueError::new(token, "missing type suffix"));
        };
        match ty {
            "i32" => Ok(TypedValue::I32(parse_int(value)?)),
            "i64" => Ok(TypedValue::I64(parse_int(value)?)),
            "f32" => Ok(TypedValue::F32(parse_float(value, FloatWidth::F64)?)),
            "f64" => Ok(TypedValue::F64(parse_float(value, FloatWidth::F64)?)),
            "ref.null" => Ok(TypedValue::RefNull(value.to_string())),
            "ref.extern" => Ok(TypedValue::RefExtern(parse_index(value)?)),
            "ref.host" => Ok(TypedValue::RefHost(parse_index(value)?)),
            "v128" => {
                let (words, lanes) = value
                    .rsplit_once(':')
                    .ok_or_else(|| ValueError::new(token, "missing lane type"))?;
                let lanes = LaneType::parse(lanes).ok_or_else(|| ValueError::new(token, "unknown lane type"))?;
                let words = parse_words(words, '[', ']').ok_or_else(|| ValueError::new(token, "malformed words"))?;
                Ok(TypedValue::V128(V128 { lanes, words }))
            }
            _ => Err(ValueError::new(token, "unknown type")),
        }
    }

    /// Decode a vector result as printed by the runtime (`<w0 w1>:v128`),
    /// which carries no lane type of its own.
    pub fn from_produced_vector(token: &str, lanes: LaneType) -> Result<Self, ValueError> {
        let words = token
            .trim()
            .strip_suffix(":v128")
            .and_then(|w| parse_words(w, '<', '>'))
            .ok_or_else(|| ValueError::new(token, "malformed v128 result"))?;
        Ok(TypedValue::V128(V128 { lanes, words }))
    }

    /// The type suffix used in canonical tokens.
    pub fn type_name(&self) -> &'static str {
        match self {
            TypedValue::I32(_) => "i32",
            TypedValue::I64(_) => "i64",
            TypedValue::F32(_) => "f32",
            TypedValue::F64(_) => "f64",
            TypedValue::V128(_) => "v128",
            TypedValue::RefNull(_) => "ref.null",
            TypedValue::RefExtern(_) => "ref.extern",
            TypedValue::RefHost(_) => "ref.host",
            TypedValue::Ref(m) => m.name(),
        }
    }

    /// The canonical `value:type` token.
    pub fn token(&self) -> String {
        match self {
            TypedValue::I32(v) | TypedValue::I64(v) => {
                let sign = if *v < 0 { "-" } else { "" };
                format!("{sign}{:#x}:{}", v.unsigned_abs(), self.type_name())
            }
            TypedValue::F32(f) | TypedValue::F64(f) if f.value.is_nan() => format!("nan:{}", self.type_name()),
            TypedValue::F32(f) | TypedValue::F64(f) => format!("{}:{}", format_g7(f.value), self.type_name()),
            TypedValue::V128(v) => format!("[{:#x} {:#x}]:{}:v128", v.words[0], v.words[1], v.lanes.name()),
            TypedValue::RefNull(heap) => format!("{heap}:ref.null"),
            TypedValue::RefExtern(i) => format!("{i:#x}:ref.extern"),
            TypedValue::RefHost(i) => format!("{i:#x}:ref.host"),
            TypedValue::Ref(m) => m.name().to_string(),
        }
    }

    /// The argument spelling understood by the runtime's REPL.
    pub fn transport(&self) -> String {
        match self {
            TypedValue::I32(v) | TypedValue::I64(v) => v.to_string(),
            TypedValue::F32(f) | TypedValue::F64(f) => f.literal.clone(),
            TypedValue::V128(v) => format!("{:#x}\\{:#x}", v.words[0], v.words[1]),
            TypedValue::RefNull(_) | TypedValue::Ref(RefMarker::Null) => "null".to_string(),
            TypedValue::RefExtern(i) | TypedValue::RefHost(i) => i.to_string(),
            TypedValue::Ref(m) => m.name().to_string(),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// Format like C's `%.7g`: seven significant digits, trailing zeros
/// removed, exponent form outside `1e-4 <= |v| < 1e7`.
pub fn format_g7(v: f64) -> String {
    const PRECISION: i32 = 7;
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, v);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return sci;
    };
    if (-4..PRECISION).contains(&exp) {
        let fixed = format!("{:.*}", (PRECISION - 1 - exp) as usize, v);
        strip_fraction_zeros(&fixed).to_string()
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", strip_fraction_zeros(mantissa), sign, exp.abs())
    }
}

fn strip_fraction_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

#[derive(Clone, Copy)]
enum FloatWidth {
    F32,
    F64,
}

/// Parse a decimal or `0x` hex integer with optional sign.
fn parse_int(text: &str) -> Result<i128, ValueError> {
    let cleaned = text.replace('_', "");
    let (negative, digits) = split_sign(&cleaned);
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i128::from_str_radix(hex, 16),
        None => digits.parse::<i128>(),
    }
    .map_err(|e| ValueError::new(text, e.to_string()))?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn parse_index(text: &str) -> Result<u64, ValueError> {
    let v = parse_int(text)?;
    u64::try_from(v).map_err(|_| ValueError::new(text, "reference index out of range"))
}

fn check_range(text: &str, v: i128, bits: u32) -> Result<(), ValueError> {
    if v >= -(1i128 << (bits - 1)) && v < (1i128 << bits) {
        Ok(())
    } else {
        Err(ValueError::new(text, format!("out of range for i{bits}")))
    }
}

fn split_sign(text: &str) -> (bool, &str) {
    if let Some(rest) = text.strip_prefix('-') {
        (true, rest)
    } else {
        (false, text.strip_prefix('+').unwrap_or(text))
    }
}

fn from_hex_f64(text: &str) -> Option<f64> {
    f64::from_hex(text).into_iter().next()
}

fn from_hex_f32(text: &str) -> Option<f32> {
    f32::from_hex(text).into_iter().next()
}

/// Decode a float spelling: decimal, hex float, `inf`, or any NaN form
/// (`nan`, `-nan`, `nan:0x...`, `nan:canonical`, `nan:arithmetic`,
/// `nan(ind)`, `nan(snan)`), all NaN forms collapsing to one value.
///
/// Hex literals round at the declared width; decimal literals are decoded
/// as f64.
fn parse_float(text: &str, width: FloatWidth) -> Result<FloatValue, ValueError> {
    let literal = text.replace('_', "");
    let (negative, body) = split_sign(&literal);
    let magnitude = if body.starts_with("nan") {
        f64::NAN
    } else if body == "inf" || body == "infinity" {
        f64::INFINITY
    } else if body.starts_with("0x") || body.starts_with("0X") {
        let hex = format!("0x{}", &body[2..]);
        match width {
            FloatWidth::F32 => from_hex_f32(&hex).map(f64::from),
            FloatWidth::F64 => from_hex_f64(&hex),
        }
        .ok_or_else(|| ValueError::new(text, "malformed hex float"))?
    } else {
        body.parse::<f64>().map_err(|e| ValueError::new(text, e.to_string()))?
    };
    Ok(FloatValue {
        value: if negative { -magnitude } else { magnitude },
        literal,
    })
}

/// Bit pattern of an f32 lane literal, keeping any NaN payload and sign.
fn f32_bits(text: &str) -> Result<u32, ValueError> {
    let cleaned = text.replace('_', "");
    let (negative, body) = split_sign(&cleaned);
    let sign = if negative { 0x8000_0000 } else { 0 };
    if let Some(nan) = body.strip_prefix("nan") {
        let payload = match nan.strip_prefix(":0x") {
            Some(p) => u32::from_str_radix(p, 16).map_err(|e| ValueError::new(text, e.to_string()))?,
            None => 0x0040_0000,
        };
        return Ok(sign | 0x7f80_0000 | (payload & 0x007f_ffff));
    }
    let value = if body == "inf" {
        f32::INFINITY
    } else if body.starts_with("0x") || body.starts_with("0X") {
        from_hex_f32(&format!("0x{}", &body[2..])).ok_or_else(|| ValueError::new(text, "malformed hex float"))?
    } else {
        body.parse::<f32>().map_err(|e| ValueError::new(text, e.to_string()))?
    };
    Ok(sign | value.to_bits())
}

/// Bit pattern of an f64 lane literal, keeping any NaN payload and sign.
fn f64_bits(text: &str) -> Result<u64, ValueError> {
    let cleaned = text.replace('_', "");
    let (negative, body) = split_sign(&cleaned);
    let sign = if negative { 0x8000_0000_0000_0000 } else { 0 };
    if let Some(nan) = body.strip_prefix("nan") {
        let payload = match nan.strip_prefix(":0x") {
            Some(p) => u64::from_str_radix(p, 16).map_err(|e| ValueError::new(text, e.to_string()))?,
            None => 0x0008_0000_0000_0000,
        };
        return Ok(sign | 0x7ff0_0000_0000_0000 | (payload & 0x000f_ffff_ffff_ffff));
    }
    let value = if body == "inf" {
        f64::INFINITY
    } else if body.starts_with("0x") || body.starts_with("0X") {
        from_hex_f64(&format!("0x{}", &body[2..])).ok_or_else(|| ValueError::new(text, "malformed hex float"))?
    } else {
        body.parse::<f64>().map_err(|e| ValueError::new(text, e.to_string()))?
    };
    Ok(sign | value.to_bits())
}

/// Parse `<open>w0 w1<close>` where each word is decimal or `0x` hex.
fn parse_words(text: &str, open: char, close: char) -> Option<[u64; 2]> {
    let inner = text.trim().strip_prefix(open)?.strip_suffix(close)?;
    let mut words = inner.split_whitespace().map(|w| match w.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => w.parse().ok(),
    });
    let lo = words.next()??;
    let hi = words.next()??;
    if words.next().is_some() {
        return None;
    }
    Some([lo, hi])
}
