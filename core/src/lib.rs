//! ddwaf - safe Rust binding for the libddwaf pattern-matching engine
//!
//! The engine compiles security rulesets and evaluates request data against
//! them. This crate owns everything on the host side of that boundary:
//! marshalling values into the engine's tagged-union objects, and the
//! builder → handle → context lifecycle around the engine's native pointers.
//!
//! # Architecture
//!
//! - [`Value`]: host value union (null, bool, integers, float, text, bytes,
//!   arrays, ordered maps)
//! - [`converter`]: `Value` ⇄ [`WireObject`] with [`Limits`] and truncation
//! - [`HandleBuilder`]: configuration fragments by path, compiled on demand
//! - [`Handle`]: immutable compiled ruleset, shared across threads
//! - [`Context`]: per-request session; retains persistent inputs
//! - [`RunResult`] / [`Diagnostics`]: decoded engine output
//! - [`Engine`]: the C ABI as a trait; [`LinkedEngine`] with feature `link`
//!
//! # Key Design Insights
//!
//! 1. **One owner per native resource**: every pointer the engine hands out is
//!    held by exactly one value and released exactly once, by `finalize()` or
//!    by `Drop`. Nothing is reference counted across the boundary.
//!
//! 2. **Inputs are lent, not given**: the engine runs without a free callback.
//!    Persistent inputs stay in the [`Context`] until it is finalized, so the
//!    engine's references into them stay valid between runs.
//!
//! 3. **Limits truncate, they never fail**: oversized inputs are shortened
//!    and flagged in [`RunResult::input_truncated`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ddwaf::prelude::*;
//!
//! let engine: Arc<dyn Engine> = Arc::new(LinkedEngine);
//! let mut builder = HandleBuilder::new(engine, &Config::default())?;
//! builder.add_or_update_config("base", &ruleset)?;
//! let handle = builder.build_handle()?;
//!
//! let mut context = handle.build_context()?;
//! let request = Value::map([("server.request.query", Value::map([("q", "<script>")]))]);
//! let result = context.run(&request, &Value::Null, DEFAULT_RUN_TIMEOUT)?;
//! if let Some(block) = result.action("block_request") {
//!     // ...
//! }
//! context.finalize()?;
//! ```

// ═══════════════════════════════════════════════════════════════════════════════
// Modules
// ═══════════════════════════════════════════════════════════════════════════════

mod builder;
mod config;
mod context;
mod diagnostics;
mod engine;
mod handle;
mod object;
mod result;
mod value;

pub mod converter;
pub mod logging;
pub mod sys;

#[cfg(feature = "link")]
mod linked;

// ═══════════════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════════════

// Lifecycle
pub use builder::HandleBuilder;
pub use context::Context;
pub use handle::Handle;

// Values and objects
pub use object::{AllocError, ObjectRef, WireObject};
pub use value::Value;

// Configuration
pub use config::{Config, Limits, Obfuscator};

// Output
pub use diagnostics::{Diagnostics, SectionReport};
pub use result::{RunResult, Status};

// Engine seam
pub use engine::Engine;
#[cfg(feature = "link")]
pub use linked::LinkedEngine;
pub use sys::LogLevel;

// ═══════════════════════════════════════════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════════════════════════════════════════

/// Prelude module for convenient imports.
///
/// ```
/// use ddwaf::prelude::*;
/// ```
pub mod prelude {
    #[cfg(feature = "link")]
    pub use crate::LinkedEngine;
    pub use crate::{
        Config, Context, Diagnostics, Engine, Error, Handle, HandleBuilder, Limits, LogLevel,
        Obfuscator, RunResult, Status, Value, DEFAULT_RUN_TIMEOUT,
    };
}

// ═══════════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════════

/// Evaluation budget used when the caller has no better figure.
pub const DEFAULT_RUN_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(5);

/// Version string reported by `engine`.
#[must_use]
pub fn version(engine: &dyn Engine) -> &str {
    engine.version()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything a public entry point can fail with.
///
/// Truncation is not an error, and neither are [`Handle::merge`] returning
/// `None` or [`HandleBuilder::remove_config`] returning `false`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A host value could not be represented as an engine object.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The object's native resource was already released.
    #[error("{0} has already been finalized")]
    InstanceFinalized(Component),

    /// The engine failed and may have said why.
    #[error(transparent)]
    LibDdwaf(#[from] LibDdwafError),

    /// Builder configuration the engine cannot receive.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// What was wrong.
        reason: String,
    },
}

/// Which lifecycle object an [`Error::InstanceFinalized`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Builder,
    Handle,
    Context,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Builder => "handle builder",
            Self::Handle => "handle",
            Self::Context => "context",
        })
    }
}

/// A value that could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot convert {value} to an engine object: {reason}")]
pub struct ConversionError {
    /// Shortened debug rendering of the offending value.
    pub value: String,
    /// Why the node could not be built.
    pub reason: String,
}

/// An engine failure, with the engine's diagnostics when it produced any.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct LibDdwafError {
    pub message: String,
    /// Which identifiers failed and why, e.g. when no rule could be loaded.
    pub diagnostics: Option<Diagnostics>,
}

impl LibDdwafError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            diagnostics: None,
        }
    }
}
