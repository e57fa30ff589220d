//! The typed-binary value codec.
//!
//! CWDTP envelopes travel as JSON, which has no binary type. Any fixed-width
//! numeric array (or `DataView`/raw buffer) an application wants to send is
//! therefore materialized into `{binary:true, type:<tag>, contents:<byte
//! array 0-255>}` on the wire and reconstructed on the other end. Every
//! other JSON-compatible value (scalars, objects, arrays) passes through
//! unchanged.
//!
//! Multi-byte element types are encoded little-endian. The specification
//! does not pin an endianness (JS typed arrays use the host's native byte
//! order, which is little-endian on every realistic deployment target); we
//! fix it explicitly so two independently-written peers agree.

use crate::error::InvalidMsgErrorCode;
use serde_json::{Map, Number, Value};

/// One of the typed-binary `type` tags from the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryTag {
    Int8Array,
    Uint8Array,
    Uint8ClampedArray,
    Int16Array,
    Uint16Array,
    Int32Array,
    Uint32Array,
    Float32Array,
    Float64Array,
    BigInt64Array,
    BigUint64Array,
    DataView,
    ArrayBuffer,
}

impl BinaryTag {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryTag::Int8Array => "int8array",
            BinaryTag::Uint8Array => "uint8array",
            BinaryTag::Uint8ClampedArray => "uint8clampedarray",
            BinaryTag::Int16Array => "int16array",
            BinaryTag::Uint16Array => "uint16array",
            BinaryTag::Int32Array => "int32array",
            BinaryTag::Uint32Array => "uint32array",
            BinaryTag::Float32Array => "float32array",
            BinaryTag::Float64Array => "float64array",
            BinaryTag::BigInt64Array => "bigint64array",
            BinaryTag::BigUint64Array => "biguint64array",
            BinaryTag::DataView => "dataview",
            BinaryTag::ArrayBuffer => "arraybuffer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "int8array" => BinaryTag::Int8Array,
            "uint8array" => BinaryTag::Uint8Array,
            "uint8clampedarray" => BinaryTag::Uint8ClampedArray,
            "int16array" => BinaryTag::Int16Array,
            "uint16array" => BinaryTag::Uint16Array,
            "int32array" => BinaryTag::Int32Array,
            "uint32array" => BinaryTag::Uint32Array,
            "float32array" => BinaryTag::Float32Array,
            "float64array" => BinaryTag::Float64Array,
            "bigint64array" => BinaryTag::BigInt64Array,
            "biguint64array" => BinaryTag::BigUint64Array,
            "dataview" => BinaryTag::DataView,
            "arraybuffer" => BinaryTag::ArrayBuffer,
            _ => return None,
        })
    }

    /// Byte width of one element. `DataView`/`ArrayBuffer` have no element
    /// stride, so any `contents` length is valid for them.
    pub fn stride(self) -> usize {
        match self {
            BinaryTag::Int8Array | BinaryTag::Uint8Array | BinaryTag::Uint8ClampedArray => 1,
            BinaryTag::Int16Array | BinaryTag::Uint16Array => 2,
            BinaryTag::Int32Array | BinaryTag::Uint32Array | BinaryTag::Float32Array => 4,
            BinaryTag::Float64Array | BinaryTag::BigInt64Array | BinaryTag::BigUint64Array => 8,
            BinaryTag::DataView | BinaryTag::ArrayBuffer => 1,
        }
    }
}

/// A reconstructed typed-binary value: the element type plus the raw bytes
/// of the underlying buffer (stored, not the decoded numeric elements,
/// since that's all a generic transport needs to round-trip the value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedArray {
    pub tag: BinaryTag,
    pub bytes: Vec<u8>,
}

impl TypedArray {
    pub fn new(tag: BinaryTag, bytes: Vec<u8>) -> Self {
        Self { tag, bytes }
    }

    /// Validates `contents.len()` against `tag`'s stride and reconstructs a
    /// `TypedArray`. `contents` is authoritative for byte length; any
    /// mismatch with the type's stride is rejected.
    fn from_contents(tag: BinaryTag, contents: &[u8]) -> Result<Self, InvalidMsgErrorCode> {
        let stride = tag.stride();
        if stride > 1 && contents.len() % stride != 0 {
            return Err(InvalidMsgErrorCode::InvalidCwdtp);
        }
        Ok(TypedArray {
            tag,
            bytes: contents.to_vec(),
        })
    }

    fn to_wire(&self) -> Value {
        let contents: Vec<Value> = self
            .bytes
            .iter()
            .map(|b| Value::Number(Number::from(*b)))
            .collect();
        let mut obj = Map::new();
        obj.insert("binary".to_string(), Value::Bool(true));
        obj.insert(
            "type".to_string(),
            Value::String(self.tag.as_str().to_string()),
        );
        obj.insert("contents".to_string(), Value::Array(contents));
        Value::Object(obj)
    }

    pub fn as_i8_slice(&self) -> Vec<i8> {
        self.bytes.iter().map(|b| *b as i8).collect()
    }

    pub fn as_u16_vec(&self) -> Vec<u16> {
        self.bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    pub fn as_i16_vec(&self) -> Vec<i16> {
        self.bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    pub fn as_u32_vec(&self) -> Vec<u32> {
        self.bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    pub fn as_i32_vec(&self) -> Vec<i32> {
        self.bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    pub fn as_f32_vec(&self) -> Vec<f32> {
        self.bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    pub fn as_f64_vec(&self) -> Vec<f64> {
        self.bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    pub fn as_i64_vec(&self) -> Vec<i64> {
        self.bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    pub fn as_u64_vec(&self) -> Vec<u64> {
        self.bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }
}

macro_rules! from_le_elements {
    ($ty:ty, $tag:expr) => {
        impl From<Vec<$ty>> for TypedArray {
            fn from(elements: Vec<$ty>) -> Self {
                let mut bytes = Vec::with_capacity(elements.len() * std::mem::size_of::<$ty>());
                for el in elements {
                    bytes.extend_from_slice(&el.to_le_bytes());
                }
                TypedArray { tag: $tag, bytes }
            }
        }
    };
}

from_le_elements!(i16, BinaryTag::Int16Array);
from_le_elements!(u16, BinaryTag::Uint16Array);
from_le_elements!(i32, BinaryTag::Int32Array);
from_le_elements!(u32, BinaryTag::Uint32Array);
from_le_elements!(f32, BinaryTag::Float32Array);
from_le_elements!(f64, BinaryTag::Float64Array);
from_le_elements!(i64, BinaryTag::BigInt64Array);
from_le_elements!(u64, BinaryTag::BigUint64Array);

impl From<Vec<u8>> for TypedArray {
    fn from(bytes: Vec<u8>) -> Self {
        TypedArray {
            tag: BinaryTag::Uint8Array,
            bytes,
        }
    }
}

impl From<Vec<i8>> for TypedArray {
    fn from(elements: Vec<i8>) -> Self {
        TypedArray {
            tag: BinaryTag::Int8Array,
            bytes: elements.into_iter().map(|b| b as u8).collect(),
        }
    }
}

/// A single element of the outgoing `data` array, as constructed by
/// application code before encoding.
#[derive(Debug, Clone)]
pub enum Arg {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Arg>),
    Object(Vec<(String, Arg)>),
    Binary(TypedArray),
}

impl Arg {
    /// Wraps an arbitrary JSON-compatible value (must not itself be a
    /// typed-binary marker object; use [`Arg::Binary`] for that).
    pub fn json(value: Value) -> Self {
        match value {
            Value::Null => Arg::Null,
            Value::Bool(b) => Arg::Bool(b),
            Value::Number(n) => Arg::Number(n),
            Value::String(s) => Arg::String(s),
            Value::Array(items) => Arg::Array(items.into_iter().map(Arg::json).collect()),
            Value::Object(map) => {
                Arg::Object(map.into_iter().map(|(k, v)| (k, Arg::json(v))).collect())
            }
        }
    }

    fn encode(&self) -> Value {
        match self {
            Arg::Null => Value::Null,
            Arg::Bool(b) => Value::Bool(*b),
            Arg::Number(n) => Value::Number(n.clone()),
            Arg::String(s) => Value::String(s.clone()),
            Arg::Array(items) => Value::Array(items.iter().map(Arg::encode).collect()),
            Arg::Object(fields) => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.encode());
                }
                Value::Object(map)
            }
            Arg::Binary(typed) => typed.to_wire(),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::String(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::String(s)
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Arg::Bool(b)
    }
}

impl From<TypedArray> for Arg {
    fn from(t: TypedArray) -> Self {
        Arg::Binary(t)
    }
}

/// Encodes outgoing `data` elements for the wire, per §4.B of the
/// specification: each [`Arg::Binary`] becomes a `{binary:true, ...}`
/// object, everything else passes through as plain JSON.
pub fn encode_args(args: &[Arg]) -> Vec<Value> {
    args.iter().map(Arg::encode).collect()
}

/// A single element of an inbound, already-decoded `data` array.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Decoded>),
    Object(Vec<(String, Decoded)>),
    Binary(TypedArray),
}

impl Decoded {
    /// Converts back to a plain [`serde_json::Value`], dropping typed-binary
    /// information (encoded back to the wire shape) — useful when an
    /// application wants uniform JSON access and handles binary payloads
    /// separately via [`Decoded::Binary`] matches.
    pub fn into_json(self) -> Value {
        match self {
            Decoded::Null => Value::Null,
            Decoded::Bool(b) => Value::Bool(b),
            Decoded::Number(n) => Value::Number(n),
            Decoded::String(s) => Value::String(s),
            Decoded::Array(items) => Value::Array(items.into_iter().map(Decoded::into_json).collect()),
            Decoded::Object(fields) => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k, v.into_json());
                }
                Value::Object(map)
            }
            Decoded::Binary(typed) => typed.to_wire(),
        }
    }
}

fn is_binary_marker(obj: &Map<String, Value>) -> bool {
    matches!(obj.get("binary"), Some(Value::Bool(true)))
}

fn decode_value(value: &Value) -> Result<Decoded, InvalidMsgErrorCode> {
    match value {
        Value::Null => Ok(Decoded::Null),
        Value::Bool(b) => Ok(Decoded::Bool(*b)),
        Value::Number(n) => Ok(Decoded::Number(n.clone())),
        Value::String(s) => Ok(Decoded::String(s.clone())),
        Value::Array(items) => {
            let decoded = items
                .iter()
                .map(decode_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Decoded::Array(decoded))
        }
        Value::Object(obj) => {
            if is_binary_marker(obj) {
                decode_binary_object(obj)
            } else {
                let mut fields = Vec::with_capacity(obj.len());
                for (k, v) in obj {
                    fields.push((k.clone(), decode_value(v)?));
                }
                Ok(Decoded::Object(fields))
            }
        }
    }
}

fn decode_binary_object(obj: &Map<String, Value>) -> Result<Decoded, InvalidMsgErrorCode> {
    let tag = obj
        .get("type")
        .and_then(Value::as_str)
        .and_then(BinaryTag::from_str)
        .ok_or(InvalidMsgErrorCode::InvalidCwdtp)?;

    let contents = obj
        .get("contents")
        .and_then(Value::as_array)
        .ok_or(InvalidMsgErrorCode::InvalidCwdtp)?;

    let mut bytes = Vec::with_capacity(contents.len());
    for byte in contents {
        let n = byte.as_u64().ok_or(InvalidMsgErrorCode::InvalidCwdtp)?;
        if n > 255 {
            return Err(InvalidMsgErrorCode::InvalidCwdtp);
        }
        bytes.push(n as u8);
    }

    let typed = TypedArray::from_contents(tag, &bytes)?;
    Ok(Decoded::Binary(typed))
}

/// Decodes an inbound `data` array per §4.B: walks the tree, reconstructing
/// any `{binary:true, ...}` object into a [`TypedArray`] and rejecting
/// unknown `type` tags or byte-length/stride mismatches as `INVALID_CWDTP`.
pub fn decode_data(data: &[Value]) -> Result<Vec<Decoded>, InvalidMsgErrorCode> {
    data.iter().map(decode_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_uint8array() {
        let original = TypedArray::from(vec![100u8, 3, 154]);
        let wire = Arg::Binary(original.clone()).encode();
        let decoded = decode_value(&wire).unwrap();
        assert_eq!(decoded, Decoded::Binary(original));
    }

    #[test]
    fn round_trips_int32array() {
        let original: TypedArray = vec![-5i32, 0, 70000].into();
        let wire = Arg::Binary(original.clone()).encode();
        let decoded = decode_value(&wire).unwrap();
        match decoded {
            Decoded::Binary(t) => {
                assert_eq!(t.tag, BinaryTag::Int32Array);
                assert_eq!(t.as_i32_vec(), vec![-5, 0, 70000]);
            }
            _ => panic!("expected binary"),
        }
    }

    #[test]
    fn round_trips_float64array() {
        let original: TypedArray = vec![1.5f64, -2.25].into();
        let wire = Arg::Binary(original.clone()).encode();
        let decoded = decode_value(&wire).unwrap();
        match decoded {
            Decoded::Binary(t) => assert_eq!(t.as_f64_vec(), vec![1.5, -2.25]),
            _ => panic!("expected binary"),
        }
    }

    #[test]
    fn rejects_stride_mismatch() {
        let mut obj = Map::new();
        obj.insert("binary".into(), Value::Bool(true));
        obj.insert("type".into(), Value::String("int32array".into()));
        obj.insert(
            "contents".into(),
            Value::Array(vec![Value::from(1u8), Value::from(2u8), Value::from(3u8)]),
        );
        let err = decode_value(&Value::Object(obj)).unwrap_err();
        assert_eq!(err, InvalidMsgErrorCode::InvalidCwdtp);
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let mut obj = Map::new();
        obj.insert("binary".into(), Value::Bool(true));
        obj.insert("type".into(), Value::String("weirdarray".into()));
        obj.insert("contents".into(), Value::Array(vec![]));
        let err = decode_value(&Value::Object(obj)).unwrap_err();
        assert_eq!(err, InvalidMsgErrorCode::InvalidCwdtp);
    }

    #[test]
    fn non_binary_values_pass_through() {
        let arg = Arg::Object(vec![
            ("a".to_string(), Arg::Number(Number::from(1))),
            ("b".to_string(), Arg::String("hi".to_string())),
        ]);
        let wire = arg.encode();
        let decoded = decode_value(&wire).unwrap();
        assert_eq!(
            decoded,
            Decoded::Object(vec![
                ("a".to_string(), Decoded::Number(Number::from(1))),
                ("b".to_string(), Decoded::String("hi".to_string())),
            ])
        );
    }

    #[test]
    fn nested_binary_inside_array_round_trips() {
        let arg = Arg::Array(vec![Arg::Binary(vec![1u8, 2, 3].into()), Arg::Bool(true)]);
        let wire = arg.encode();
        let decoded = decode_value(&wire).unwrap();
        assert_eq!(
            decoded,
            Decoded::Array(vec![
                Decoded::Binary(TypedArray::new(BinaryTag::Uint8Array, vec![1, 2, 3])),
                Decoded::Bool(true),
            ])
        );
    }
}
