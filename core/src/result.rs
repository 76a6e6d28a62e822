//! Per-run outcome decoded from the engine's result struct.

use std::fmt;

use crate::converter;
use crate::object::ObjectRef;
use crate::sys::{RawResult, RetCode};
use crate::Value;

/// Status code of one [`Context::run`](crate::Context::run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Evaluation finished without a match (or timed out).
    Ok,
    /// At least one rule matched.
    Match,
    /// The engine failed internally.
    ErrInternal,
    /// The engine rejected an input object.
    ErrInvalidObject,
    /// The engine rejected an argument.
    ErrInvalidArgument,
}

impl Status {
    /// Unknown codes are reported as [`Status::ErrInternal`].
    #[must_use]
    pub fn from_code(code: RetCode) -> Self {
        match code {
            RetCode::OK => Self::Ok,
            RetCode::MATCH => Self::Match,
            RetCode::ERR_INVALID_OBJECT => Self::ErrInvalidObject,
            RetCode::ERR_INVALID_ARGUMENT => Self::ErrInvalidArgument,
            _ => Self::ErrInternal,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::ErrInternal | Self::ErrInvalidObject | Self::ErrInvalidArgument
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Match => "match",
            Self::ErrInternal => "err_internal",
            Self::ErrInvalidObject => "err_invalid_object",
            Self::ErrInvalidArgument => "err_invalid_argument",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub status: Status,
    /// One entry per triggered rule, in engine order.
    pub events: Vec<Value>,
    /// Action type → parameters, in engine order. The engine does not
    /// guarantee that order follows the rule's declared `on_match` order.
    pub actions: Vec<(String, Value)>,
    /// Derived artifact name → value.
    pub derivatives: Vec<(String, Value)>,
    /// Engine-side runtime, in nanoseconds.
    pub total_runtime: u64,
    pub timed_out: bool,
    /// Whether a limit shortened the persistent or ephemeral input.
    pub input_truncated: bool,
}

impl RunResult {
    /// Decode `raw`. Does not free it; see [`Context::run`](crate::Context::run).
    pub(crate) fn decode(status: Status, raw: &RawResult, input_truncated: bool) -> Self {
        // SAFETY (all three): `raw` was filled by the engine's `run` and is
        // freed only after this returns.
        let events = unsafe { ObjectRef::from_raw(&raw.events) };
        let actions = unsafe { ObjectRef::from_raw(&raw.actions) };
        let derivatives = unsafe { ObjectRef::from_raw(&raw.derivatives) };

        Self {
            status,
            events: events.iter().map(converter::decode).collect(),
            actions: keyed(actions),
            derivatives: keyed(derivatives),
            total_runtime: raw.total_runtime,
            timed_out: raw.timeout,
            input_truncated,
        }
    }

    #[must_use]
    pub fn is_match(&self) -> bool {
        self.status == Status::Match
    }

    /// Parameters of the first action of type `kind`.
    #[must_use]
    pub fn action(&self, kind: &str) -> Option<&Value> {
        self.actions.iter().find(|(k, _)| k == kind).map(|(_, v)| v)
    }

    #[must_use]
    pub fn derivative(&self, name: &str) -> Option<&Value> {
        self.derivatives.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

fn keyed(object: ObjectRef<'_>) -> Vec<(String, Value)> {
    match converter::decode(object) {
        Value::Map(entries) => entries,
        _ => Vec::new(),
    }
}
