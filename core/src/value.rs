//! `Value`: the host-side dynamic value fed into and decoded out of the engine.
//!
//! A closed sum type: every host value the binding accepts is one of these
//! variants, and the converter has exactly one encode arm per variant.
//!
//! # Text vs bytes
//!
//! [`Value::String`] is text and is always valid UTF-8. Host data that claims
//! to be text but carries invalid sequences goes through
//! [`Value::text_lossy`], which substitutes U+FFFD before anything measures
//! its length. Binary payloads use [`Value::Bytes`] and reach the engine raw,
//! embedded NULs included.
//!
//! # Example
//!
//! ```
//! use ddwaf::Value;
//!
//! let request = Value::map([
//!     ("server.request.query", Value::map([("q", Value::from("<script>"))])),
//!     ("server.request.method", Value::from("GET")),
//! ]);
//!
//! assert_eq!(request.get("server.request.method"), Some(&Value::from("GET")));
//! ```

use std::fmt;

/// A host-language dynamic value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent value (`nil`/`null`).
    Null,

    /// Boolean.
    Bool(bool),

    /// Signed integer. Non-negative values are encoded as unsigned on the wire.
    Int(i64),

    /// Unsigned integer above `i64::MAX`. Smaller values normalize to [`Value::Int`].
    UInt(u64),

    /// Floating point number.
    Float(f64),

    /// UTF-8 text.
    String(String),

    /// Binary content, passed through byte for byte.
    Bytes(Vec<u8>),

    /// Ordered sequence.
    Array(Vec<Value>),

    /// Insertion-ordered mapping. Duplicate keys are kept as given.
    Map(Vec<(String, Value)>),

    /// A host value of a kind the wire format cannot express.
    ///
    /// Carries the host type name for diagnostics. Always encodes as an empty
    /// string leaf, so unknown types never abort an encode.
    Unsupported(String),
}

impl Value {
    /// Build a map from key/value pairs, keeping their order.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build an array from anything convertible to values.
    pub fn array<V: Into<Value>, I: IntoIterator<Item = V>>(items: I) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }

    /// An empty map, the usual "no data" argument for a run.
    #[must_use]
    pub fn empty_map() -> Self {
        Self::Map(Vec::new())
    }

    /// Text from bytes that should be UTF-8 but may not be.
    ///
    /// Invalid sequences are replaced with U+FFFD. Use [`Value::Bytes`] for
    /// content that is binary on purpose.
    #[must_use]
    pub fn text_lossy(bytes: &[u8]) -> Self {
        Self::String(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Decode-side constructor: text when the bytes are UTF-8, raw bytes otherwise.
    #[must_use]
    pub fn from_wire_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(s) => Self::String(s.to_owned()),
            Err(_) => Self::Bytes(bytes.to_vec()),
        }
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::UInt(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Unsupported(_) => "unsupported",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view of `Int`/`UInt`, if it fits in `i64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// First value stored under `key`, if this is a map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Number of children for containers, `0` for scalars.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Array(items) => items.len(),
            Self::Map(entries) => entries.len(),
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

// Integers compare numerically across `Int`/`UInt`; maps compare as
// key→value sets because the engine does not promise entry order.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Int(i), Self::UInt(u)) | (Self::UInt(u), Self::Int(i)) => {
                u64::try_from(*i).is_ok_and(|i| i == *u)
            }
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len() && a.iter().all(|entry| b.contains(entry))
            }
            (Self::Unsupported(a), Self::Unsupported(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                f.write_str("}")
            }
            Self::Unsupported(name) => write!(f, "<{name}>"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u32> for Value {
    fn from(u: u32) -> Self {
        Self::Int(i64::from(u))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        i64::try_from(u).map_or(Self::UInt(u), Self::Int)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::map(iter)
    }
}

#[cfg(feature = "serde")]
mod json {
    use super::Value;

    impl From<serde_json::Value> for Value {
        fn from(json: serde_json::Value) -> Self {
            match json {
                serde_json::Value::Null => Self::Null,
                serde_json::Value::Bool(b) => Self::Bool(b),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Self::Int(i)
                    } else if let Some(u) = n.as_u64() {
                        Self::UInt(u)
                    } else {
                        Self::Float(n.as_f64().unwrap_or(f64::NAN))
                    }
                }
                serde_json::Value::String(s) => Self::String(s),
                serde_json::Value::Array(items) => {
                    Self::Array(items.into_iter().map(Into::into).collect())
                }
                serde_json::Value::Object(entries) => {
                    Self::Map(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
                }
            }
        }
    }

    /// Lossy: bytes become text with replacement characters, non-finite
    /// floats and `Unsupported` become `null`, duplicate map keys keep the last value.
    impl From<Value> for serde_json::Value {
        fn from(value: Value) -> Self {
            match value {
                Value::Null | Value::Unsupported(_) => Self::Null,
                Value::Bool(b) => Self::Bool(b),
                Value::Int(i) => Self::from(i),
                Value::UInt(u) => Self::from(u),
                Value::Float(f) => serde_json::Number::from_f64(f).map_or(Self::Null, Self::Number),
                Value::String(s) => Self::String(s),
                Value::Bytes(b) => Self::String(String::from_utf8_lossy(&b).into_owned()),
                Value::Array(items) => Self::Array(items.into_iter().map(Into::into).collect()),
                Value::Map(entries) => {
                    Self::Object(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
                }
            }
        }
    }

    impl serde::Serialize for Value {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            use serde::ser::{SerializeMap, SerializeSeq};

            match self {
                Value::Null | Value::Unsupported(_) => serializer.serialize_unit(),
                Value::Bool(b) => serializer.serialize_bool(*b),
                Value::Int(i) => serializer.serialize_i64(*i),
                Value::UInt(u) => serializer.serialize_u64(*u),
                Value::Float(f) => serializer.serialize_f64(*f),
                Value::String(s) => serializer.serialize_str(s),
                Value::Bytes(b) => serializer.serialize_bytes(b),
                Value::Array(items) => {
                    let mut seq = serializer.serialize_seq(Some(items.len()))?;
                    for item in items {
                        seq.serialize_element(item)?;
                    }
                    seq.end()
                }
                Value::Map(entries) => {
                    let mut map = serializer.serialize_map(Some(entries.len()))?;
                    for (k, v) in entries {
                        map.serialize_entry(k, v)?;
                    }
                    map.end()
                }
            }
        }
    }
}
