//! Raw C ABI shared with the native engine.
//!
//! Every type here is `#[repr(C)]` and must match the engine's header byte for
//! byte. Nothing in this module is safe to read on its own: the higher layers
//! ([`WireObject`](crate::WireObject), [`ObjectRef`](crate::ObjectRef)) are the
//! only places that dereference these pointers.

#![allow(non_camel_case_types)]

use std::ffi::c_char;
use std::fmt;
use std::ptr;

// ═══════════════════════════════════════════════════════════════════════════════
// Objects
// ═══════════════════════════════════════════════════════════════════════════════

/// Type tag of a [`RawObject`].
///
/// Kept as a transparent integer rather than a Rust enum: the engine may hand
/// back any bit pattern and reading an unknown discriminant into an enum is UB.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectType(pub u32);

impl ObjectType {
    pub const INVALID: Self = Self(0);
    pub const SIGNED: Self = Self(1 << 0);
    pub const UNSIGNED: Self = Self(1 << 1);
    pub const STRING: Self = Self(1 << 2);
    pub const ARRAY: Self = Self(1 << 3);
    pub const MAP: Self = Self(1 << 4);
    pub const BOOL: Self = Self(1 << 5);
    pub const FLOAT: Self = Self(1 << 6);
    pub const NULL: Self = Self(1 << 7);

    /// `true` for `ARRAY` and `MAP`, the two types whose value is a child pointer.
    #[inline]
    #[must_use]
    pub fn is_container(self) -> bool {
        self == Self::ARRAY || self == Self::MAP
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::INVALID => "invalid",
            Self::SIGNED => "signed",
            Self::UNSIGNED => "unsigned",
            Self::STRING => "string",
            Self::ARRAY => "array",
            Self::MAP => "map",
            Self::BOOL => "bool",
            Self::FLOAT => "float",
            Self::NULL => "null",
            _ => "unknown",
        }
    }
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectType({})", self.name())
    }
}

/// Payload of a [`RawObject`], discriminated by [`RawObject::type_`].
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawValue {
    pub string_value: *const c_char,
    pub uint_value: u64,
    pub int_value: i64,
    pub array: *mut RawObject,
    pub boolean: bool,
    pub f64: f64,
}

/// The tagged-union value exchanged with the engine (`ddwaf_object`).
///
/// For strings `nb_entries` is the byte length; for arrays and maps it is the
/// child count. `parameter_name` is only meaningful on map values.
#[repr(C)]
pub struct RawObject {
    pub parameter_name: *const c_char,
    pub parameter_name_length: u64,
    pub value: RawValue,
    pub nb_entries: u64,
    pub type_: ObjectType,
}

impl RawObject {
    /// An `INVALID` object owning nothing. Engines write into out-params of this shape.
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            parameter_name: ptr::null(),
            parameter_name_length: 0,
            value: RawValue { uint_value: 0 },
            nb_entries: 0,
            type_: ObjectType::INVALID,
        }
    }
}

impl Default for RawObject {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for RawObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawObject")
            .field("type", &self.type_)
            .field("nb_entries", &self.nb_entries)
            .field("parameter_name_length", &self.parameter_name_length)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// `ddwaf_config.limits`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawLimits {
    pub max_container_size: u32,
    pub max_container_depth: u32,
    pub max_string_length: u32,
}

/// `ddwaf_config.obfuscator`. Either pointer may be null (engine default).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawObfuscator {
    pub key_regex: *const c_char,
    pub value_regex: *const c_char,
}

/// Callback the engine uses to release input objects it was handed.
pub type ObjectFreeFn = unsafe extern "C" fn(object: *mut RawObject);

/// `ddwaf_config`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawConfig {
    pub limits: RawLimits,
    pub obfuscator: RawObfuscator,
    /// Always `None` from this crate: inputs stay owned by the binding.
    pub free_fn: Option<ObjectFreeFn>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Run results
// ═══════════════════════════════════════════════════════════════════════════════

/// `ddwaf_result`, filled by the engine's `run`. Released with `result_free`.
#[repr(C)]
#[derive(Debug)]
pub struct RawResult {
    pub timeout: bool,
    pub events: RawObject,
    pub actions: RawObject,
    pub derivatives: RawObject,
    pub total_runtime: u64,
}

impl Default for RawResult {
    fn default() -> Self {
        Self {
            timeout: false,
            events: RawObject::invalid(),
            actions: RawObject::invalid(),
            derivatives: RawObject::invalid(),
            total_runtime: 0,
        }
    }
}

/// `DDWAF_RET_CODE`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetCode(pub i32);

impl RetCode {
    pub const ERR_INTERNAL: Self = Self(-3);
    pub const ERR_INVALID_OBJECT: Self = Self(-2);
    pub const ERR_INVALID_ARGUMENT: Self = Self(-1);
    pub const OK: Self = Self(0);
    pub const MATCH: Self = Self(1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Opaque engine handles
// ═══════════════════════════════════════════════════════════════════════════════

/// Opaque `ddwaf_builder`.
#[repr(C)]
pub struct RawBuilder {
    _private: [u8; 0],
}

/// Opaque `ddwaf_handle` (compiled instance).
#[repr(C)]
pub struct RawInstance {
    _private: [u8; 0],
}

/// Opaque `ddwaf_context`.
#[repr(C)]
pub struct RawContext {
    _private: [u8; 0],
}

// ═══════════════════════════════════════════════════════════════════════════════
// Logging
// ═══════════════════════════════════════════════════════════════════════════════

/// `DDWAF_LOG_LEVEL`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogLevel(pub u32);

impl LogLevel {
    pub const TRACE: Self = Self(0);
    pub const DEBUG: Self = Self(1);
    pub const INFO: Self = Self(2);
    pub const WARN: Self = Self(3);
    pub const ERROR: Self = Self(4);
    pub const OFF: Self = Self(5);
}

/// `ddwaf_log_cb`. May be invoked synchronously from any engine call.
pub type LogCallback = unsafe extern "C" fn(
    level: LogLevel,
    function: *const c_char,
    file: *const c_char,
    line: u32,
    message: *const c_char,
    message_len: u64,
);
