//! Builder configuration: encode limits and the event obfuscator.
//!
//! Supplied once to [`HandleBuilder::new`](crate::HandleBuilder::new). Every
//! handle and context derived from that builder encodes with the same limits.
//!
//! With the `serde` feature these types deserialize from host configuration,
//! every field optional:
//!
//! ```json
//! { "limits": { "max_container_size": 128 }, "obfuscator": { "key_regex": "(?i)pass" } }
//! ```

use std::ffi::CString;

use crate::sys::{RawLimits, RawObfuscator};
use crate::{Error, Result};

/// Resource limits applied while encoding. `0` disables a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Limits {
    /// Maximum number of elements kept per array or map.
    pub max_container_size: u32,
    /// Maximum container nesting.
    pub max_container_depth: u32,
    /// Maximum bytes kept per string or map key.
    pub max_string_length: u32,
}

impl Limits {
    /// No limit in any dimension.
    pub const UNLIMITED: Self = Self {
        max_container_size: 0,
        max_container_depth: 0,
        max_string_length: 0,
    };

    /// The engine's recommended limits.
    pub const RECOMMENDED: Self = Self {
        max_container_size: 256,
        max_container_depth: 20,
        max_string_length: 4096,
    };

    pub(crate) fn to_raw(self) -> RawLimits {
        RawLimits {
            max_container_size: self.max_container_size,
            max_container_depth: self.max_container_depth,
            max_string_length: self.max_string_length,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::RECOMMENDED
    }
}

/// Regexes the engine uses to redact event values as `<Redacted>`.
///
/// `None` leaves the engine's built-in pattern in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Obfuscator {
    /// Matched against key paths.
    pub key_regex: Option<String>,
    /// Matched against values.
    pub value_regex: Option<String>,
}

impl Obfuscator {
    /// Patterns as C strings, kept alive by the caller while the engine reads them.
    pub(crate) fn to_c_strings(&self) -> Result<ObfuscatorStrings> {
        Ok(ObfuscatorStrings {
            key_regex: self.key_regex.as_deref().map(c_pattern).transpose()?,
            value_regex: self.value_regex.as_deref().map(c_pattern).transpose()?,
        })
    }
}

fn c_pattern(pattern: &str) -> Result<CString> {
    CString::new(pattern).map_err(|_| Error::InvalidConfig {
        reason: format!("obfuscator pattern {pattern:?} contains a NUL byte"),
    })
}

/// Owned C copies of the obfuscator patterns.
#[derive(Debug)]
pub(crate) struct ObfuscatorStrings {
    key_regex: Option<CString>,
    value_regex: Option<CString>,
}

impl ObfuscatorStrings {
    pub(crate) fn as_raw(&self) -> RawObfuscator {
        RawObfuscator {
            key_regex: self.key_regex.as_ref().map_or(std::ptr::null(), |s| s.as_ptr()),
            value_regex: self.value_regex.as_ref().map_or(std::ptr::null(), |s| s.as_ptr()),
        }
    }
}

/// Everything a [`HandleBuilder`](crate::HandleBuilder) is configured with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    pub limits: Limits,
    pub obfuscator: Obfuscator,
}

impl Config {
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_obfuscator(mut self, obfuscator: Obfuscator) -> Self {
        self.obfuscator = obfuscator;
        self
    }
}
