//! Type-directed conversion between JSON and [`Value`].
//!
//! Decoding coerces a JSON value into the *declared* type: numbers may arrive
//! as JSON numbers or numeric strings, structured values are walked against
//! List/Map/Record descriptors, and integer arguments of handle type become
//! proxies through a [`HandleAdopter`]. Encoding is the structural inverse.

use indexmap::IndexMap;
use num_bigint::BigInt;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::hash::Hash;
use std::str::FromStr;

use super::config::Limits;
use super::error::BridgeError;
use super::handle::HandleId;
use super::proxy::FunctionHandle;
use super::types::{Describe, HandleShape, PrimitiveKind, TypeDesc, Variance};
use super::value::{BigDecimal, LimitTracker, Value};

/// Builds proxies for handle IDs found while decoding.
pub trait HandleAdopter {
    fn adopt_handle(
        &self,
        id: HandleId,
        shape: HandleShape,
        arg: Option<TypeDesc>,
        result: Option<TypeDesc>,
    ) -> Result<FunctionHandle, BridgeError>;
}

/// Stateful decoder enforcing limits across one message.
pub struct Decoder<'a> {
    tracker: LimitTracker,
    adopter: Option<&'a dyn HandleAdopter>,
    adopted: Vec<FunctionHandle>,
}

impl<'a> Decoder<'a> {
    pub fn new(limits: Limits) -> Self {
        Self {
            tracker: LimitTracker::new(limits.max_depth, limits.max_bytes),
            adopter: None,
            adopted: Vec::new(),
        }
    }

    pub fn with_adopter(mut self, adopter: &'a dyn HandleAdopter) -> Self {
        self.adopter = Some(adopter);
        self
    }

    /// Decode one value against its declared type.
    pub fn decode(&mut self, json: &Json, desc: &TypeDesc) -> Result<Value, BridgeError> {
        self.tracker.enter()?;
        let result = self.decode_inner(json, desc);
        self.tracker.exit();
        result
    }

    /// Close every proxy adopted so far, for use when the message is rejected.
    pub fn release_adopted(self) {
        for handle in self.adopted {
            if let Err(err) = handle.close() {
                tracing::debug!(
                    target: "jsbridge::conversion",
                    "Failed to release handle {} after decode failure: {}",
                    handle.id(),
                    err
                );
            }
        }
    }

    fn decode_inner(&mut self, json: &Json, desc: &TypeDesc) -> Result<Value, BridgeError> {
        match desc {
            TypeDesc::Projection(Variance::Invariant, inner) => {
                return self.decode_inner(json, inner)
            }
            TypeDesc::Projection(variance, inner) => {
                return Err(BridgeError::UnsupportedVariance {
                    context: inner.to_string(),
                    variance: variance.to_string(),
                })
            }
            TypeDesc::Handle { shape, arg, result } => {
                return self.decode_handle(json, desc, *shape, arg.as_deref(), result.as_deref())
            }
            _ => {}
        }

        if json.is_null() {
            self.tracker.add_bytes(4)?;
            return Ok(Value::Null);
        }

        match desc {
            TypeDesc::Primitive(kind) => {
                self.tracker.add_bytes(primitive_size(json))?;
                if matches!(kind, PrimitiveKind::BigInteger | PrimitiveKind::BigDecimal) {
                    self.tracker.add_bytes(exponent_size(json))?;
                }
                decode_primitive(json, *kind)
            }
            TypeDesc::List(item) => {
                let items = json
                    .as_array()
                    .ok_or_else(|| BridgeError::mismatch(desc, describe_json(json)))?;
                self.tracker.add_bytes(16)?;
                self.tracker
                    .add_bytes(items.len().saturating_mul(std::mem::size_of::<usize>()))?;
                let mut values = Vec::with_capacity(items.len());
                for item_json in items {
                    values.push(self.decode(item_json, item)?);
                }
                Ok(Value::List(values))
            }
            TypeDesc::Map(key_desc, value_desc) => {
                let object = json
                    .as_object()
                    .ok_or_else(|| BridgeError::mismatch(desc, describe_json(json)))?;
                self.tracker.add_bytes(24)?;
                let mut entries = Vec::with_capacity(object.len());
                for (key, value) in object {
                    let key = self.decode(&Json::String(key.clone()), key_desc)?;
                    entries.push((key, self.decode(value, value_desc)?));
                }
                Ok(Value::Map(entries))
            }
            TypeDesc::Record(record) => {
                let object = json
                    .as_object()
                    .ok_or_else(|| BridgeError::mismatch(desc, describe_json(json)))?;
                self.tracker.add_bytes(24)?;
                let mut fields = IndexMap::with_capacity(record.fields.len());
                for field in &record.fields {
                    self.tracker.add_bytes(field.name.len())?;
                    let field_json = object.get(&field.name).unwrap_or(&Json::Null);
                    fields.insert(field.name.clone(), self.decode(field_json, &field.ty)?);
                }
                Ok(Value::Record(super::value::Record {
                    name: record.name.clone(),
                    fields,
                }))
            }
            TypeDesc::Json => {
                self.tracker.add_bytes(json.to_string().len())?;
                Ok(Value::Json(json.clone()))
            }
            TypeDesc::Unit => Ok(Value::Null),
            TypeDesc::Future(_) => Err(BridgeError::mismatch(desc, "a value that is not deferred")),
            TypeDesc::Handle { .. } | TypeDesc::Projection(..) => {
                Err(BridgeError::mismatch(desc, describe_json(json)))
            }
        }
    }

    fn decode_handle(
        &mut self,
        json: &Json,
        desc: &TypeDesc,
        shape: HandleShape,
        arg: Option<&TypeDesc>,
        result: Option<&TypeDesc>,
    ) -> Result<Value, BridgeError> {
        let id = json
            .as_u64()
            .ok_or_else(|| BridgeError::mismatch(desc, describe_json(json)))?;
        let adopter = self
            .adopter
            .ok_or_else(|| BridgeError::mismatch(desc, "a handle outside of a bridge session"))?;
        let handle = adopter.adopt_handle(id, shape, arg.cloned(), result.cloned())?;
        self.adopted.push(handle.clone());
        self.tracker.add_bytes(8)?;
        Ok(Value::Function(handle))
    }
}

/// Decode without handle support.
pub fn decode(json: &Json, desc: &TypeDesc, limits: Limits) -> Result<Value, BridgeError> {
    Decoder::new(limits).decode(json, desc)
}

fn primitive_size(json: &Json) -> usize {
    match json {
        Json::String(s) => s.len() + 16,
        Json::Number(_) => 8,
        _ => 1,
    }
}

/// Digits an exact number gains from its exponent once expanded.
fn exponent_size(json: &Json) -> usize {
    let text = match json {
        Json::Number(n) => n.to_string(),
        Json::String(s) => s.trim().to_string(),
        _ => return 0,
    };
    BigDecimal::from_str(&text)
        .map(|d| usize::try_from(d.scale().unsigned_abs()).unwrap_or(usize::MAX))
        .unwrap_or(0)
}

fn describe_json(json: &Json) -> String {
    match json {
        Json::Null => "null".to_string(),
        Json::Array(_) => "array".to_string(),
        Json::Object(_) => "object".to_string(),
        primitive => {
            let text = primitive.to_string();
            if text.chars().count() > 64 {
                format!("{}...", text.chars().take(61).collect::<String>())
            } else {
                text
            }
        }
    }
}

/// Text of a JSON number or numeric string, validated as a decimal.
fn decimal(json: &Json, kind: PrimitiveKind) -> Result<(String, BigDecimal), BridgeError> {
    let fail = || BridgeError::mismatch(kind.name(), describe_json(json));
    let text = match json {
        Json::Number(n) => n.to_string(),
        Json::String(s) => s.trim().to_string(),
        _ => return Err(fail()),
    };
    let parsed = BigDecimal::from_str(&text).map_err(|_| fail())?;
    Ok((text, parsed))
}

/// Decimal digits of the largest value of a fixed-width integer kind.
fn max_digits(kind: PrimitiveKind) -> Option<i64> {
    match kind {
        PrimitiveKind::Byte => Some(3),
        PrimitiveKind::Short => Some(5),
        PrimitiveKind::Int => Some(10),
        PrimitiveKind::Long => Some(19),
        _ => None,
    }
}

fn out_of_range(json: &Json, kind: PrimitiveKind) -> BridgeError {
    BridgeError::mismatch(kind.name(), format!("{} (out of range)", describe_json(json)))
}

fn integral(json: &Json, kind: PrimitiveKind) -> Result<BigInt, BridgeError> {
    let (_, parsed) = decimal(json, kind)?;
    if let Some(digits) = max_digits(kind) {
        if !parsed.is_zero() && parsed.scale() < -digits {
            return Err(out_of_range(json, kind));
        }
    }
    parsed
        .to_bigint()
        .ok_or_else(|| BridgeError::mismatch(kind.name(), describe_json(json)))
}

fn fixed_width<T: TryFrom<BigInt>>(json: &Json, kind: PrimitiveKind) -> Result<T, BridgeError> {
    T::try_from(integral(json, kind)?).map_err(|_| out_of_range(json, kind))
}

fn decode_primitive(json: &Json, kind: PrimitiveKind) -> Result<Value, BridgeError> {
    let fail = || BridgeError::mismatch(kind.name(), describe_json(json));
    match kind {
        PrimitiveKind::String => match json {
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Number(n) => Ok(Value::String(n.to_string())),
            Json::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(fail()),
        },
        PrimitiveKind::Char => json
            .as_str()
            .and_then(|s| s.chars().next())
            .map(Value::Char)
            .ok_or_else(fail),
        PrimitiveKind::Boolean => match json {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::String(s) if s == "true" => Ok(Value::Bool(true)),
            Json::String(s) if s == "false" => Ok(Value::Bool(false)),
            _ => Err(fail()),
        },
        PrimitiveKind::Number => {
            let (text, _) = decimal(json, kind)?;
            serde_json::Number::from_str(&text)
                .map(Value::Number)
                .map_err(|_| fail())
        }
        PrimitiveKind::Byte => fixed_width(json, kind).map(Value::Byte),
        PrimitiveKind::Short => fixed_width(json, kind).map(Value::Short),
        PrimitiveKind::Int => fixed_width(json, kind).map(Value::Int),
        PrimitiveKind::Long => fixed_width(json, kind).map(Value::Long),
        PrimitiveKind::Float => {
            let (text, _) = decimal(json, kind)?;
            match text.parse::<f32>() {
                Ok(v) if v.is_finite() => Ok(Value::Float(v)),
                _ => Err(fail()),
            }
        }
        PrimitiveKind::Double => {
            let (text, _) = decimal(json, kind)?;
            match text.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Value::Double(v)),
                _ => Err(fail()),
            }
        }
        PrimitiveKind::BigInteger => integral(json, kind).map(Value::BigInteger),
        PrimitiveKind::BigDecimal => decimal(json, kind).map(|(_, d)| Value::BigDecimal(d)),
    }
}

/// Encode a value as its declared type.
pub fn encode(value: &Value, desc: &TypeDesc) -> Result<Json, BridgeError> {
    match desc {
        TypeDesc::Projection(Variance::Invariant, inner) => return encode(value, inner),
        TypeDesc::Projection(variance, inner) => {
            return Err(BridgeError::UnsupportedVariance {
                context: inner.to_string(),
                variance: variance.to_string(),
            })
        }
        _ => {}
    }
    if value.is_null() {
        return Ok(Json::Null);
    }

    let fail = || BridgeError::EncodeFailure {
        expected: desc.to_string(),
        value: value.type_name().to_string(),
    };

    match (desc, value) {
        (TypeDesc::Unit, _) => Ok(Json::Null),
        (TypeDesc::Json, v) => structural(v, desc),
        (TypeDesc::Primitive(kind), v) => {
            let json = structural(v, desc)?;
            let fits = match kind {
                PrimitiveKind::String => json.is_string(),
                PrimitiveKind::Char => json.as_str().map_or(false, |s| s.chars().count() == 1),
                PrimitiveKind::Boolean => json.is_boolean(),
                numeric => json.is_number() && decode_primitive(&json, *numeric).is_ok(),
            };
            if fits {
                Ok(json)
            } else {
                Err(fail())
            }
        }
        (TypeDesc::List(item), Value::List(items)) => items
            .iter()
            .map(|v| encode(v, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array),
        (TypeDesc::Map(key_desc, value_desc), Value::Map(entries)) => {
            let mut object = serde_json::Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = match encode(key, key_desc)? {
                    Json::String(s) => s,
                    Json::Number(n) => n.to_string(),
                    Json::Bool(b) => b.to_string(),
                    _ => return Err(fail()),
                };
                object.insert(key, encode(value, value_desc)?);
            }
            Ok(Json::Object(object))
        }
        (TypeDesc::Record(record_desc), Value::Record(record)) => {
            let mut object = serde_json::Map::with_capacity(record_desc.fields.len());
            for field in &record_desc.fields {
                let json = match record.get(&field.name) {
                    Some(v) => encode(v, &field.ty)?,
                    None => Json::Null,
                };
                object.insert(field.name.clone(), json);
            }
            Ok(Json::Object(object))
        }
        (TypeDesc::Handle { .. }, Value::Function(handle)) => Ok(Json::from(handle.id())),
        _ => Err(fail()),
    }
}

fn structural(value: &Value, desc: &TypeDesc) -> Result<Json, BridgeError> {
    serde_json::to_value(value).map_err(|e| BridgeError::EncodeFailure {
        expected: desc.to_string(),
        value: e.to_string(),
    })
}

/// Native types that can be built from a decoded [`Value`].
pub trait FromValue: Describe + Sized {
    fn from_value(value: Value) -> Result<Self, BridgeError>;
}

/// Native types that can be turned into a [`Value`] for encoding.
pub trait IntoValue: Describe {
    fn into_value(self) -> Value;
}

fn wrong(expected: &str, value: &Value) -> BridgeError {
    BridgeError::mismatch(expected, value.type_name())
}

macro_rules! integer_value {
    ($ty:ty, $kind:ident) => {
        impl Describe for $ty {
            fn describe() -> TypeDesc {
                TypeDesc::Primitive(PrimitiveKind::$kind)
            }
        }

        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::$kind(self)
            }
        }

        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, BridgeError> {
                value
                    .as_i64()
                    .and_then(|v| <$ty>::try_from(v).ok())
                    .ok_or_else(|| wrong(stringify!($kind), &value))
            }
        }
    };
}

integer_value!(i8, Byte);
integer_value!(i16, Short);
integer_value!(i32, Int);
integer_value!(i64, Long);

impl Describe for f32 {
    fn describe() -> TypeDesc {
        TypeDesc::Primitive(PrimitiveKind::Float)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::Float(v) => Ok(v),
            other => other
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| wrong("Float", &other)),
        }
    }
}

impl Describe for f64 {
    fn describe() -> TypeDesc {
        TypeDesc::double()
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Double(self)
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        value.as_f64().ok_or_else(|| wrong("Double", &value))
    }
}

impl Describe for bool {
    fn describe() -> TypeDesc {
        TypeDesc::boolean()
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(wrong("Boolean", &other)),
        }
    }
}

impl Describe for char {
    fn describe() -> TypeDesc {
        TypeDesc::Primitive(PrimitiveKind::Char)
    }
}

impl IntoValue for char {
    fn into_value(self) -> Value {
        Value::Char(self)
    }
}

impl FromValue for char {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::Char(c) => Ok(c),
            other => Err(wrong("Char", &other)),
        }
    }
}

impl Describe for String {
    fn describe() -> TypeDesc {
        TypeDesc::string()
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::String(s) => Ok(s),
            Value::Char(c) => Ok(c.to_string()),
            other => Err(wrong("String", &other)),
        }
    }
}

impl Describe for &str {
    fn describe() -> TypeDesc {
        TypeDesc::string()
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::String(self.to_string())
    }
}

impl Describe for BigInt {
    fn describe() -> TypeDesc {
        TypeDesc::Primitive(PrimitiveKind::BigInteger)
    }
}

impl IntoValue for BigInt {
    fn into_value(self) -> Value {
        Value::BigInteger(self)
    }
}

impl FromValue for BigInt {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::BigInteger(v) => Ok(v),
            other => other
                .as_i64()
                .map(BigInt::from)
                .ok_or_else(|| wrong("BigInteger", &other)),
        }
    }
}

impl Describe for BigDecimal {
    fn describe() -> TypeDesc {
        TypeDesc::Primitive(PrimitiveKind::BigDecimal)
    }
}

impl IntoValue for BigDecimal {
    fn into_value(self) -> Value {
        Value::BigDecimal(self)
    }
}

impl FromValue for BigDecimal {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::BigDecimal(v) => Ok(v),
            Value::BigInteger(v) => Ok(BigDecimal::from(v)),
            other => other
                .as_i64()
                .map(|v| BigDecimal::from(BigInt::from(v)))
                .ok_or_else(|| wrong("BigDecimal", &other)),
        }
    }
}

impl Describe for () {
    fn describe() -> TypeDesc {
        TypeDesc::Unit
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Null
    }
}

impl FromValue for () {
    fn from_value(_: Value) -> Result<Self, BridgeError> {
        Ok(())
    }
}

impl Describe for Value {
    fn describe() -> TypeDesc {
        TypeDesc::Json
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        Ok(value)
    }
}

impl Describe for Json {
    fn describe() -> TypeDesc {
        TypeDesc::Json
    }
}

impl IntoValue for Json {
    fn into_value(self) -> Value {
        Value::Json(self)
    }
}

impl FromValue for Json {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::Json(json) => Ok(json),
            other => structural(&other, &TypeDesc::Json),
        }
    }
}

impl<T: Describe> Describe for Option<T> {
    fn describe() -> TypeDesc {
        T::describe()
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        self.map_or(Value::Null, IntoValue::into_value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl<T: Describe> Describe for Vec<T> {
    fn describe() -> TypeDesc {
        TypeDesc::list(T::describe())
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(wrong("List", &other)),
        }
    }
}

fn map_entries(value: Value) -> Result<Vec<(Value, Value)>, BridgeError> {
    match value {
        Value::Map(entries) => Ok(entries),
        other => Err(wrong("Map", &other)),
    }
}

impl<K: Describe, V: Describe> Describe for IndexMap<K, V> {
    fn describe() -> TypeDesc {
        TypeDesc::map(K::describe(), V::describe())
    }
}

impl<K: IntoValue, V: IntoValue> IntoValue for IndexMap<K, V> {
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        )
    }
}

impl<K: FromValue + Eq + Hash, V: FromValue> FromValue for IndexMap<K, V> {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        map_entries(value)?
            .into_iter()
            .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }
}

impl<K: Describe, V: Describe> Describe for HashMap<K, V> {
    fn describe() -> TypeDesc {
        TypeDesc::map(K::describe(), V::describe())
    }
}

impl<K: IntoValue, V: IntoValue> IntoValue for HashMap<K, V> {
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        )
    }
}

impl<K: FromValue + Eq + Hash, V: FromValue> FromValue for HashMap<K, V> {
    fn from_value(value: Value) -> Result<Self, BridgeError> {
        map_entries(value)?
            .into_iter()
            .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::value::Record;
    use serde_json::json;

    fn dec(json: Json, desc: &TypeDesc) -> Result<Value, BridgeError> {
        decode(&json, desc, Limits::default())
    }

    fn add_desc() -> TypeDesc {
        TypeDesc::record("Add", [("a", TypeDesc::int()), ("b", TypeDesc::int())])
    }

    #[test]
    fn test_int_coercion() {
        assert_eq!(dec(json!(3), &TypeDesc::int()), Ok(Value::Int(3)));
        assert_eq!(dec(json!(3.0), &TypeDesc::int()), Ok(Value::Int(3)));
        assert_eq!(dec(json!("42"), &TypeDesc::int()), Ok(Value::Int(42)));
        assert!(matches!(
            dec(json!(3.5), &TypeDesc::int()),
            Err(BridgeError::TypeDecodeFailure { .. })
        ));
        assert!(dec(json!(2147483648u64), &TypeDesc::int()).is_err());
        assert_eq!(
            dec(json!(2147483648u64), &TypeDesc::long()),
            Ok(Value::Long(2147483648))
        );
        assert!(dec(json!("abc"), &TypeDesc::int()).is_err());
        assert!(dec(json!(true), &TypeDesc::int()).is_err());
    }

    #[test]
    fn test_small_integer_ranges() {
        let byte = TypeDesc::Primitive(PrimitiveKind::Byte);
        assert_eq!(dec(json!(-128), &byte), Ok(Value::Byte(-128)));
        assert!(dec(json!(128), &byte).is_err());
        let short = TypeDesc::Primitive(PrimitiveKind::Short);
        assert_eq!(dec(json!("1000"), &short), Ok(Value::Short(1000)));
    }

    #[test]
    fn test_string_char_bool() {
        assert_eq!(dec(json!("hi"), &TypeDesc::string()), Ok(Value::from("hi")));
        assert_eq!(dec(json!(5), &TypeDesc::string()), Ok(Value::from("5")));
        let ch = TypeDesc::Primitive(PrimitiveKind::Char);
        assert_eq!(dec(json!("xyz"), &ch), Ok(Value::Char('x')));
        assert!(dec(json!(""), &ch).is_err());
        assert_eq!(dec(json!("true"), &TypeDesc::boolean()), Ok(Value::Bool(true)));
        assert!(dec(json!("yes"), &TypeDesc::boolean()).is_err());
        assert!(dec(json!([1]), &TypeDesc::string()).is_err());
    }

    #[test]
    fn test_floats_and_big_numbers() {
        assert_eq!(dec(json!(1.5), &TypeDesc::double()), Ok(Value::Double(1.5)));
        assert_eq!(dec(json!("2.25"), &TypeDesc::double()), Ok(Value::Double(2.25)));
        assert!(dec(json!("NaN"), &TypeDesc::double()).is_err());

        let big = TypeDesc::Primitive(PrimitiveKind::BigInteger);
        let parsed: Json = serde_json::from_str("123456789012345678901234567890").unwrap();
        assert_eq!(
            dec(parsed, &big),
            Ok(Value::BigInteger(
                "123456789012345678901234567890".parse().unwrap()
            ))
        );

        let decimal = TypeDesc::Primitive(PrimitiveKind::BigDecimal);
        let value = dec(json!("0.10"), &decimal).unwrap();
        assert_eq!(encode(&value, &decimal).unwrap().to_string(), "0.10");
    }

    #[test]
    fn test_null_for_any_non_handle_type() {
        for desc in [TypeDesc::int(), TypeDesc::list(TypeDesc::string()), add_desc()] {
            assert_eq!(dec(Json::Null, &desc), Ok(Value::Null));
        }
    }

    #[test]
    fn test_structured_mismatch() {
        assert!(dec(json!({"a": 1}), &TypeDesc::list(TypeDesc::int())).is_err());
        assert!(dec(json!([1, 2]), &add_desc()).is_err());
        assert!(dec(json!(1), &TypeDesc::map(TypeDesc::string(), TypeDesc::int())).is_err());
    }

    #[test]
    fn test_record_fields() {
        let value = dec(json!({"b": 2, "extra": true}), &add_desc()).unwrap();
        let expected = Record::new("Add").with("a", Value::Null).with("b", 2);
        assert_eq!(value, Value::Record(expected));
    }

    #[test]
    fn test_nested_list_and_map() {
        let desc = TypeDesc::map(TypeDesc::int(), TypeDesc::list(TypeDesc::string()));
        let value = dec(json!({"1": ["a"], "2": []}), &desc).unwrap();
        assert_eq!(
            value,
            Value::Map(vec![
                (Value::Int(1), Value::List(vec![Value::from("a")])),
                (Value::Int(2), Value::List(vec![])),
            ])
        );
        assert_eq!(encode(&value, &desc).unwrap(), json!({"1": ["a"], "2": []}));
    }

    #[test]
    fn test_variance_rejected() {
        let desc = TypeDesc::list(TypeDesc::projection(Variance::Covariant, TypeDesc::int()));
        assert!(matches!(
            dec(json!([1]), &desc),
            Err(BridgeError::UnsupportedVariance { .. })
        ));
        let invariant = TypeDesc::projection(Variance::Invariant, TypeDesc::int());
        assert_eq!(dec(json!(1), &invariant), Ok(Value::Int(1)));
    }

    #[test]
    fn test_handle_needs_session() {
        let desc = TypeDesc::handle(HandleShape::Plain, None, None);
        assert!(matches!(
            dec(json!(3), &desc),
            Err(BridgeError::TypeDecodeFailure { .. })
        ));
        assert!(dec(Json::Null, &desc).is_err());
    }

    #[test]
    fn test_limits() {
        let mut nested = json!(1);
        let mut desc = TypeDesc::int();
        for _ in 0..5 {
            nested = json!([nested]);
            desc = TypeDesc::list(desc);
        }
        let tight = Limits {
            max_depth: 3,
            max_bytes: 1024,
        };
        assert!(matches!(
            decode(&nested, &desc, tight),
            Err(BridgeError::LimitExceeded(_))
        ));
        assert!(decode(&nested, &desc, Limits::default()).is_ok());

        let small = Limits {
            max_depth: 10,
            max_bytes: 32,
        };
        assert!(matches!(
            decode(&json!("x".repeat(64)), &TypeDesc::string(), small),
            Err(BridgeError::LimitExceeded(_))
        ));
    }

    #[test]
    fn test_encode_checks_declared_type() {
        assert_eq!(encode(&Value::Int(5), &TypeDesc::int()), Ok(json!(5)));
        assert!(matches!(
            encode(&Value::from("x"), &TypeDesc::int()),
            Err(BridgeError::EncodeFailure { .. })
        ));
        assert!(encode(&Value::Double(f64::INFINITY), &TypeDesc::double()).is_err());
        assert_eq!(encode(&Value::Int(1), &TypeDesc::Unit), Ok(Json::Null));
        assert_eq!(encode(&Value::Null, &TypeDesc::int()), Ok(Json::Null));

        let record = Value::Record(Record::new("Add").with("b", 2));
        assert_eq!(encode(&record, &add_desc()), Ok(json!({"a": null, "b": 2})));
    }

    #[test]
    fn test_typed_round_trip() {
        let original = vec![Some(1), None, Some(3)];
        let desc = <Vec<Option<i32>>>::describe();
        let json = encode(&original.clone().into_value(), &desc).unwrap();
        assert_eq!(json, json!([1, null, 3]));
        let back = Vec::<Option<i32>>::from_value(dec(json, &desc).unwrap()).unwrap();
        assert_eq!(back, original);

        let mut scores = HashMap::new();
        scores.insert("alice".to_string(), 3i64);
        let desc = <HashMap<String, i64>>::describe();
        let json = encode(&scores.clone().into_value(), &desc).unwrap();
        let back = HashMap::<String, i64>::from_value(dec(json, &desc).unwrap()).unwrap();
        assert_eq!(back, scores);
    }

    #[test]
    fn test_round_trip_every_shape() {
        let kind = TypeDesc::Primitive;
        let decimal = |text: &str| Value::BigDecimal(text.parse().unwrap());
        let cases = vec![
            (kind(PrimitiveKind::Byte), Value::Byte(-8)),
            (kind(PrimitiveKind::Short), Value::Short(300)),
            (TypeDesc::int(), Value::Int(-70000)),
            (TypeDesc::long(), Value::Long(i64::MIN)),
            (kind(PrimitiveKind::Float), Value::Float(-0.25)),
            (TypeDesc::double(), Value::Double(3.125)),
            (kind(PrimitiveKind::Char), Value::Char('x')),
            (TypeDesc::boolean(), Value::Bool(true)),
            (TypeDesc::string(), Value::from("text")),
            (
                kind(PrimitiveKind::BigInteger),
                Value::BigInteger("-123456789012345678901234567890".parse().unwrap()),
            ),
            (
                kind(PrimitiveKind::Number),
                Value::Number(serde_json::Number::from_str("12.50").unwrap()),
            ),
            (kind(PrimitiveKind::BigDecimal), decimal("-12.345")),
            (kind(PrimitiveKind::BigDecimal), decimal("0.0005")),
            (kind(PrimitiveKind::BigDecimal), decimal("7E+3")),
            (
                add_desc(),
                Value::Record(Record::new("Add").with("a", 1).with("b", -2)),
            ),
            (
                TypeDesc::list(TypeDesc::double()),
                Value::List(vec![Value::Double(0.5), Value::Null]),
            ),
            (
                TypeDesc::map(TypeDesc::long(), TypeDesc::boolean()),
                Value::Map(vec![(Value::Long(9), Value::Bool(false))]),
            ),
        ];
        for (desc, value) in cases {
            let json = encode(&value, &desc).unwrap();
            assert_eq!(dec(json, &desc), Ok(value), "type {}", desc);
        }
    }

    #[test]
    fn test_encode_checks_numeric_kind() {
        assert!(matches!(
            encode(&Value::Double(1.5), &TypeDesc::int()),
            Err(BridgeError::EncodeFailure { .. })
        ));
        assert!(encode(&Value::Int(300), &TypeDesc::Primitive(PrimitiveKind::Byte)).is_err());
        assert!(encode(&Value::Double(1e300), &TypeDesc::Primitive(PrimitiveKind::Float)).is_err());
        assert_eq!(encode(&Value::Long(7), &TypeDesc::int()), Ok(json!(7)));
        assert!(encode(&Value::Double(2.0), &TypeDesc::long()).is_ok());
    }

    #[test]
    fn test_huge_exponents_are_bounded() {
        let number = |text: &str| serde_json::from_str::<Json>(text).unwrap();

        for text in ["1e5000000", "1e20", "-1e9223372036854775807"] {
            assert!(
                matches!(
                    dec(number(text), &TypeDesc::int()),
                    Err(BridgeError::TypeDecodeFailure { .. })
                ),
                "{}",
                text
            );
        }
        assert!(dec(number("1e-5000000"), &TypeDesc::long()).is_err());
        assert!(dec(number("1e-9223372036854775808"), &TypeDesc::int()).is_err());
        assert_eq!(dec(number("0e5000000"), &TypeDesc::int()), Ok(Value::Int(0)));
        assert_eq!(dec(number("1e18"), &TypeDesc::long()), Ok(Value::Long(1_000_000_000_000_000_000)));

        for kind in [PrimitiveKind::BigInteger, PrimitiveKind::BigDecimal] {
            let desc = TypeDesc::Primitive(kind);
            assert!(matches!(
                dec(number("1e50000000"), &desc),
                Err(BridgeError::LimitExceeded(_))
            ));
            assert!(matches!(
                dec(json!("1e-50000000"), &desc),
                Err(BridgeError::LimitExceeded(_))
            ));
        }
        assert_eq!(
            dec(number("1e30"), &TypeDesc::Primitive(PrimitiveKind::BigInteger)),
            Ok(Value::BigInteger(num_traits::pow(BigInt::from(10), 30)))
        );
    }

    #[test]
    fn test_typed_errors() {
        assert!(i8::from_value(Value::Int(300)).is_err());
        assert_eq!(i64::from_value(Value::Int(300)), Ok(300));
        assert!(String::from_value(Value::Int(1)).is_err());
        assert_eq!(<Option<bool>>::from_value(Value::Null), Ok(None));
        assert_eq!(Json::from_value(Value::Int(2)), Ok(json!(2)));
    }
}
