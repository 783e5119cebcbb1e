//! Native values produced by decoding and consumed by encoding.

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::error::BridgeError;
use super::proxy::FunctionHandle;

/// Maximum depth for nested values
pub const MAX_VALUE_DEPTH: usize = 100;
/// Maximum size in bytes of a decoded payload
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// A value crossing the bridge, already coerced to its declared type.
///
/// Note: `Serialize` is implemented by hand; it writes the structural JSON
/// form and refuses non-finite floats.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Char(char),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Number of unspecified kind, kept as its exact text
    Number(serde_json::Number),
    BigInteger(BigInt),
    BigDecimal(BigDecimal),
    String(String),
    List(Vec<Value>),
    /// Entries keep their wire order
    Map(Vec<(Value, Value)>),
    Record(Record),
    /// Untyped JSON passed through unchanged
    Json(serde_json::Value),
    /// Proxy for a script function
    Function(FunctionHandle),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "Boolean",
            Value::Char(_) => "Char",
            Value::Byte(_) => "Byte",
            Value::Short(_) => "Short",
            Value::Int(_) => "Int",
            Value::Long(_) => "Long",
            Value::Float(_) => "Float",
            Value::Double(_) => "Double",
            Value::Number(_) => "Number",
            Value::BigInteger(_) => "BigInteger",
            Value::BigDecimal(_) => "BigDecimal",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Record(_) => "Record",
            Value::Json(_) => "Json",
            Value::Function(_) => "Function",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integral value of any fixed-width integer variant.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(i64::from(*v)),
            Value::Short(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            Value::BigInteger(v) => v.to_i64(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::Number(n) => n.to_string().parse().ok(),
            Value::BigDecimal(d) => d.to_f64(),
            other => other.as_i64().map(|v| v as f64),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// Named record with ordered fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub name: String,
    pub fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Remove a field; a missing field reads as null.
    pub fn take(&mut self, field: &str) -> Value {
        self.fields.shift_remove(field).unwrap_or(Value::Null)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

/// Exact decimal: `unscaled * 10^-scale`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BigDecimal {
    unscaled: BigInt,
    scale: i64,
}

impl BigDecimal {
    pub fn new(unscaled: BigInt, scale: i64) -> Self {
        Self { unscaled, scale }
    }

    pub fn unscaled(&self) -> &BigInt {
        &self.unscaled
    }

    pub fn scale(&self) -> i64 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.unscaled.is_zero()
    }

    /// Integer value, if there is no fractional part.
    ///
    /// A negative scale is expanded in full; callers bound it first.
    pub fn to_bigint(&self) -> Option<BigInt> {
        if self.unscaled.is_zero() {
            return Some(BigInt::zero());
        }
        // more fractional digits than the unscaled value has digits
        if self.scale > 0 && self.scale as u64 > self.unscaled.bits() {
            return None;
        }
        if self.scale <= 0 {
            let factor = num_traits::pow(BigInt::from(10u8), usize::try_from(-self.scale).ok()?);
            return Some(&self.unscaled * factor);
        }
        let divisor = num_traits::pow(BigInt::from(10u8), usize::try_from(self.scale).ok()?);
        if (&self.unscaled % &divisor).is_zero() {
            Some(&self.unscaled / divisor)
        } else {
            None
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        self.to_string().parse().ok()
    }
}

impl From<BigInt> for BigDecimal {
    fn from(value: BigInt) -> Self {
        Self::new(value, 0)
    }
}

impl FromStr for BigDecimal {
    type Err = BridgeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || BridgeError::mismatch("BigDecimal", format!("{:?}", text));
        let text = text.trim();

        let (mantissa, exponent) = match text.find(|c| c == 'e' || c == 'E') {
            Some(at) => {
                let exp = text[at + 1..].parse::<i64>().map_err(|_| invalid())?;
                (&text[..at], exp)
            }
            None => (text, 0),
        };
        let (int_part, frac_part) = match mantissa.find('.') {
            Some(at) => (&mantissa[..at], &mantissa[at + 1..]),
            None => (mantissa, ""),
        };
        let (negative, int_digits) = match int_part.as_bytes().first() {
            Some(b'-') => (true, &int_part[1..]),
            Some(b'+') => (false, &int_part[1..]),
            _ => (false, int_part),
        };

        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if int_digits.len() + frac_part.len() == 0 || !all_digits(int_digits) || !all_digits(frac_part)
        {
            return Err(invalid());
        }

        let digits = format!("{}{}", int_digits, frac_part);
        let magnitude = BigInt::from_str(&digits).map_err(|_| invalid())?;
        let unscaled = if negative { -magnitude } else { magnitude };
        let scale = i64::try_from(frac_part.len())
            .ok()
            .and_then(|len| len.checked_sub(exponent))
            .ok_or_else(invalid)?;
        Ok(Self { unscaled, scale })
    }
}

impl fmt::Display for BigDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale < 0 {
            return write!(f, "{}E+{}", self.unscaled, -self.scale);
        }
        let digits = self.unscaled.abs().to_string();
        let sign = if self.unscaled.is_negative() { "-" } else { "" };
        let scale = self.scale as usize;
        if scale == 0 {
            write!(f, "{}{}", sign, digits)
        } else if digits.len() <= scale {
            write!(f, "{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
        } else {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            write!(f, "{}{}.{}", sign, int_part, frac_part)
        }
    }
}

fn number_from_text<E: serde::ser::Error>(text: &str) -> Result<serde_json::Number, E> {
    serde_json::Number::from_str(text).map_err(|e| E::custom(format!("{}: {}", text, e)))
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::{Error, SerializeMap};
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Char(c) => serializer.serialize_str(c.encode_utf8(&mut [0; 4])),
            Value::Byte(v) => serializer.serialize_i8(*v),
            Value::Short(v) => serializer.serialize_i16(*v),
            Value::Int(v) => serializer.serialize_i32(*v),
            Value::Long(v) => serializer.serialize_i64(*v),
            Value::Float(v) if !v.is_finite() => {
                Err(S::Error::custom(format!("Cannot encode non-finite Float {}", v)))
            }
            Value::Double(v) if !v.is_finite() => Err(S::Error::custom(format!(
                "Cannot encode non-finite Double {}",
                v
            ))),
            Value::Float(v) => serializer.serialize_f32(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::Number(n) => n.serialize(serializer),
            Value::BigInteger(v) => number_from_text::<S::Error>(&v.to_string())?.serialize(serializer),
            Value::BigDecimal(v) => number_from_text::<S::Error>(&v.to_string())?.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => items.serialize(serializer),
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(&map_key(key).map_err(S::Error::custom)?, value)?;
                }
                map.end()
            }
            Value::Record(record) => record.fields.serialize(serializer),
            Value::Json(json) => json.serialize(serializer),
            Value::Function(handle) => serializer.serialize_u64(handle.id()),
        }
    }
}

/// JSON object keys are strings; scalar keys are written in their text form.
pub(crate) fn map_key(key: &Value) -> Result<String, String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Char(c) => Ok(c.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Byte(_)
        | Value::Short(_)
        | Value::Int(_)
        | Value::Long(_)
        | Value::Number(_)
        | Value::BigInteger(_)
        | Value::BigDecimal(_) => serde_json::to_string(key).map_err(|e| e.to_string()),
        Value::Float(v) => Ok(v.to_string()),
        Value::Double(v) => Ok(v.to_string()),
        other => Err(format!("{} cannot be used as a map key", other.type_name())),
    }
}

/// Tracks depth and size limits while decoding.
///
/// Used to reject hostile or runaway payloads before they are fully
/// materialized.
pub struct LimitTracker {
    max_depth: usize,
    max_bytes: usize,
    current_depth: usize,
    current_bytes: usize,
}

impl LimitTracker {
    /// Create a new limit tracker with the specified limits.
    pub fn new(max_depth: usize, max_bytes: usize) -> Self {
        Self {
            max_depth,
            max_bytes,
            current_depth: 0,
            current_bytes: 0,
        }
    }

    /// Enter a new depth level.
    ///
    /// Returns an error if the depth limit is exceeded.
    pub fn enter(&mut self) -> Result<(), BridgeError> {
        self.current_depth += 1;
        if self.current_depth > self.max_depth {
            return Err(BridgeError::LimitExceeded(format!(
                "Depth exceeded maximum limit of {}",
                self.max_depth
            )));
        }
        Ok(())
    }

    /// Exit a depth level.
    pub fn exit(&mut self) {
        self.current_depth = self.current_depth.saturating_sub(1);
    }

    /// Add to the byte count.
    pub fn add_bytes(&mut self, bytes: usize) -> Result<(), BridgeError> {
        self.current_bytes = self.current_bytes.saturating_add(bytes);
        if self.current_bytes > self.max_bytes {
            return Err(BridgeError::LimitExceeded(format!(
                "Size ({} bytes) exceeded maximum limit of {} bytes",
                self.current_bytes, self.max_bytes
            )));
        }
        Ok(())
    }
}
