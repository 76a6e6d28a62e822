//! Conversion between host [`Value`]s and engine objects.
//!
//! [`encode`] is a pure function of the value, the [`Limits`] and the
//! `coerce` switch. The only state it carries is the remaining depth budget,
//! passed down the recursion, and a truncation flag shared by the whole call.
//! Limits are never an error: an oversized value is shortened and the flag is
//! raised. The only error is a failed allocation, which aborts the whole
//! encode after releasing everything built so far.
//!
//! [`decode`] is total and never mutates or frees its input.
//!
//! # Example
//!
//! ```
//! use ddwaf::{converter, Limits, Value};
//!
//! let limits = Limits { max_container_size: 3, ..Limits::UNLIMITED };
//! let encoded = converter::encode(&Value::array([1, 2, 3, 4, 5, 6]), &limits, false).unwrap();
//!
//! assert!(encoded.truncated);
//! assert_eq!(converter::decode(encoded.object.as_ref()), Value::array([1, 2, 3]));
//! ```

use crate::object::{AllocError, ObjectRef, WireObject};
use crate::sys::ObjectType;
use crate::{ConversionError, Limits, Value};

/// Output of one top-level [`encode`] call.
#[derive(Debug)]
pub struct Encoded {
    /// The encoded tree. Owned by the caller until dropped.
    pub object: WireObject,
    /// Whether any limit shortened the value.
    pub truncated: bool,
}

/// Encode `value` for the engine.
///
/// - Containers deeper than `max_container_depth` become empty containers,
///   and reaching that depth always counts as truncation.
/// - Containers keep at most `max_container_size` elements, the first ones.
/// - Strings, byte strings and map keys keep at most `max_string_length` bytes.
/// - With `coerce`, every scalar (bool, number, null) becomes its string
///   rendering; without it, scalars keep their native wire type.
/// - [`Value::Unsupported`] always becomes an empty string.
///
/// A limit of `0` disables that dimension.
///
/// # Errors
///
/// [`ConversionError`] naming the offending value when a node cannot be
/// allocated. Nothing built before the failure leaks.
pub fn encode(value: &Value, limits: &Limits, coerce: bool) -> Result<Encoded, ConversionError> {
    let mut encoder = Encoder {
        limits: *limits,
        coerce,
        truncated: false,
    };
    let depth = (limits.max_container_depth != 0).then_some(limits.max_container_depth);
    let object = encoder.encode(value, depth)?;
    Ok(Encoded {
        object,
        truncated: encoder.truncated,
    })
}

/// Decode an engine object into a host value.
///
/// `Invalid` and `Null` both decode as [`Value::Null`]. Strings decode as text
/// when they are UTF-8 and as [`Value::Bytes`] otherwise; map keys always
/// decode as text (lossily). Unknown type tags decode as `Null`.
#[must_use]
pub fn decode(object: ObjectRef<'_>) -> Value {
    match object.object_type() {
        ObjectType::BOOL => Value::Bool(object.as_bool().unwrap_or_default()),
        ObjectType::SIGNED => Value::Int(object.as_i64().unwrap_or_default()),
        ObjectType::UNSIGNED => Value::from(object.as_u64().unwrap_or_default()),
        ObjectType::FLOAT => Value::Float(object.as_f64().unwrap_or_default()),
        ObjectType::STRING => Value::from_wire_bytes(object.as_bytes().unwrap_or_default()),
        ObjectType::ARRAY => Value::Array(object.iter().map(decode).collect()),
        ObjectType::MAP => Value::Map(
            object
                .iter()
                .map(|child| {
                    let key = String::from_utf8_lossy(child.key().unwrap_or_default()).into_owned();
                    (key, decode(child))
                })
                .collect(),
        ),
        _ => Value::Null,
    }
}

struct Encoder {
    limits: Limits,
    coerce: bool,
    truncated: bool,
}

impl Encoder {
    /// `depth` is the remaining container budget; `None` means unlimited.
    fn encode(&mut self, value: &Value, depth: Option<u32>) -> Result<WireObject, ConversionError> {
        match value {
            Value::Array(items) => self.encode_array(value, items, depth),
            Value::Map(entries) => self.encode_map(value, entries, depth),
            Value::String(s) => self.encode_string(value, s.as_bytes()),
            Value::Bytes(b) => self.encode_string(value, b),
            Value::Unsupported(_) => self.encode_string(value, b""),
            Value::Null if self.coerce => self.encode_string(value, b""),
            Value::Bool(b) if self.coerce => self.encode_string(value, bool_word(*b).as_bytes()),
            Value::Int(i) if self.coerce => self.encode_string(value, i.to_string().as_bytes()),
            Value::UInt(u) if self.coerce => self.encode_string(value, u.to_string().as_bytes()),
            Value::Float(f) if self.coerce => {
                self.encode_string(value, format!("{f:?}").as_bytes())
            }
            Value::Null => Ok(WireObject::null()),
            Value::Bool(b) => Ok(WireObject::bool(*b)),
            Value::Int(i) => Ok(match u64::try_from(*i) {
                Ok(u) => WireObject::unsigned(u),
                Err(_) => WireObject::signed(*i),
            }),
            Value::UInt(u) => Ok(WireObject::unsigned(*u)),
            Value::Float(f) => Ok(WireObject::float(*f)),
        }
    }

    fn encode_array(
        &mut self,
        value: &Value,
        items: &[Value],
        depth: Option<u32>,
    ) -> Result<WireObject, ConversionError> {
        let mut children = Vec::new();
        match depth {
            Some(0) => self.truncated = true,
            _ => {
                let child_depth = depth.map(|d| d - 1);
                let kept = self.kept(items.len());
                children
                    .try_reserve_exact(kept)
                    .map_err(|_| alloc_failure(value, AllocError { requested: kept }))?;
                for item in &items[..kept] {
                    children.push(self.encode(item, child_depth)?);
                }
            }
        }
        WireObject::array(children).map_err(|e| alloc_failure(value, e))
    }

    fn encode_map(
        &mut self,
        value: &Value,
        entries: &[(String, Value)],
        depth: Option<u32>,
    ) -> Result<WireObject, ConversionError> {
        let mut children = Vec::new();
        match depth {
            Some(0) => self.truncated = true,
            _ => {
                let child_depth = depth.map(|d| d - 1);
                let kept = self.kept(entries.len());
                children
                    .try_reserve_exact(kept)
                    .map_err(|_| alloc_failure(value, AllocError { requested: kept }))?;
                for (key, item) in &entries[..kept] {
                    // Keys that collide after truncation are all kept.
                    let key = self.truncate(key.as_bytes()).to_vec();
                    children.push((key, self.encode(item, child_depth)?));
                }
            }
        }
        WireObject::map(children).map_err(|e| alloc_failure(value, e))
    }

    fn encode_string(&mut self, value: &Value, bytes: &[u8]) -> Result<WireObject, ConversionError> {
        let bytes = self.truncate(bytes);
        WireObject::string(bytes).map_err(|e| alloc_failure(value, e))
    }

    /// How many of `len` container elements fit, raising the flag if not all do.
    fn kept(&mut self, len: usize) -> usize {
        match self.limits.max_container_size {
            0 => len,
            max => {
                let max = max as usize;
                if len > max {
                    self.truncated = true;
                    max
                } else {
                    len
                }
            }
        }
    }

    fn truncate<'b>(&mut self, bytes: &'b [u8]) -> &'b [u8] {
        match self.limits.max_string_length {
            0 => bytes,
            max if bytes.len() > max as usize => {
                self.truncated = true;
                &bytes[..max as usize]
            }
            _ => bytes,
        }
    }
}

fn bool_word(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Longest rendering of an offending value kept in error messages.
const MAX_ERROR_VALUE_LEN: usize = 128;

fn alloc_failure(value: &Value, err: AllocError) -> ConversionError {
    let mut rendered = value.to_string();
    if rendered.len() > MAX_ERROR_VALUE_LEN {
        let mut cut = MAX_ERROR_VALUE_LEN;
        while !rendered.is_char_boundary(cut) {
            cut -= 1;
        }
        rendered.truncate(cut);
        rendered.push_str("...");
    }
    ConversionError {
        value: rendered,
        reason: err.to_string(),
    }
}
