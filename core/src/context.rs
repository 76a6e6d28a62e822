//! Stateful evaluation sessions.
//!
//! A [`Context`] is one request's session on a [`Handle`]. The engine keeps
//! references into persistent data across `run` calls, so the context owns
//! every persistent encoding it ever submitted until it is finalized.
//! Ephemeral encodings live for a single call.
//!
//! ```text
//! Valid ──finalize()──▶ Invalidated
//!   │                       │
//!   run()                   run() → Error::InstanceFinalized
//! ```

use std::fmt;
use std::time::Duration;

use crate::converter::Encoded;
use crate::engine::EngineResult;
use crate::object::WireObject;
use crate::result::{RunResult, Status};
use crate::sys::{RawContext, RawObject};
use crate::{converter, Component, Error, Handle, Limits, Result, Value};

/// An evaluation session bound to one [`Handle`].
///
/// `Send` but not `Sync`: move it between threads freely, but only one caller
/// drives a context at a time. Different contexts on the same handle run in
/// parallel without coordination.
pub struct Context<'h> {
    handle: &'h Handle,
    raw: *mut RawContext,
    // Boxed so the engine's pointers stay valid as the vector grows.
    retained: Vec<Box<WireObject>>,
}

// SAFETY: a native context has no thread affinity; `&mut self` on `run` and
// `finalize` serializes access.
unsafe impl Send for Context<'_> {}

impl<'h> Context<'h> {
    pub(crate) fn from_raw(handle: &'h Handle, raw: *mut RawContext) -> Self {
        Self {
            handle,
            raw,
            retained: Vec::new(),
        }
    }

    /// Evaluate one batch of data.
    ///
    /// `persistent` values are remembered for the rest of the session: the
    /// engine only re-evaluates rules whose addresses arrive in this call, and
    /// never reports a persistent match twice. `ephemeral` values are seen by
    /// this call only. Pass [`Value::Null`] for either to omit it.
    ///
    /// `timeout` bounds the engine's evaluation budget. A timed out run
    /// reports `timed_out` with [`Status::Ok`].
    ///
    /// # Errors
    ///
    /// [`Error::InstanceFinalized`] after [`finalize`](Self::finalize),
    /// [`Error::Conversion`] when either input cannot be encoded. Engine
    /// failures are reported through [`RunResult::status`].
    pub fn run(
        &mut self,
        persistent: &Value,
        ephemeral: &Value,
        timeout: Duration,
    ) -> Result<RunResult> {
        let raw = self.live()?;
        let limits = self.handle.limits();

        // Nothing is retained until both inputs have been encoded.
        let persistent = encode_input(persistent, &limits)?;
        let ephemeral = encode_input(ephemeral, &limits)?;
        let truncated = [&persistent, &ephemeral]
            .into_iter()
            .flatten()
            .any(|encoded| encoded.truncated);

        let persistent_ptr = match persistent {
            Some(encoded) => {
                self.retained.push(Box::new(encoded.object));
                self.retained
                    .last_mut()
                    .map_or(std::ptr::null_mut(), |object| object.as_mut_ptr())
            }
            None => std::ptr::null_mut(),
        };

        let mut ephemeral_object = ephemeral.map(|encoded| encoded.object);
        let ephemeral_ptr = ephemeral_object
            .as_mut()
            .map_or(std::ptr::null_mut::<RawObject>(), WireObject::as_mut_ptr);

        let engine = self.handle.engine().as_ref();
        let mut result = EngineResult::new(engine);
        let micros = u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX);
        // SAFETY: `raw` is live and driven only through `&mut self`; the
        // persistent object is retained until finalize, the ephemeral one
        // outlives the call.
        let code = unsafe { engine.run(raw, persistent_ptr, ephemeral_ptr, &mut result.raw, micros) };
        drop(ephemeral_object);

        let status = Status::from_code(code);
        let decoded = RunResult::decode(status, &result.raw, truncated);
        if status.is_error() {
            tracing::warn!(%status, "engine run failed");
        } else {
            tracing::trace!(
                %status,
                events = decoded.events.len(),
                timed_out = decoded.timed_out,
                truncated,
                "run"
            );
        }
        Ok(decoded)
    }

    /// Number of persistent encodings kept alive for the engine.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.retained.len()
    }

    /// The handle this context evaluates against.
    #[must_use]
    pub fn handle(&self) -> &'h Handle {
        self.handle
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.raw.is_null()
    }

    /// Release every retained input, then destroy the native session.
    ///
    /// # Errors
    ///
    /// [`Error::InstanceFinalized`] when called a second time.
    pub fn finalize(&mut self) -> Result<()> {
        let raw = self.live()?;
        self.raw = std::ptr::null_mut();
        let retained = self.retained.len();
        // The engine has no free callback: it never touches inputs on destroy.
        self.retained.clear();
        // SAFETY: `raw` was live and is never used again.
        unsafe { self.handle.engine().context_destroy(raw) };
        tracing::debug!(retained, "context finalized");
        Ok(())
    }

    fn live(&self) -> Result<*mut RawContext> {
        if self.raw.is_null() {
            return Err(Error::InstanceFinalized(Component::Context));
        }
        Ok(self.raw)
    }
}

fn encode_input(value: &Value, limits: &Limits) -> Result<Option<Encoded>> {
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(converter::encode(value, limits, false)?))
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            tracing::trace!("context dropped without finalize");
            let _ = self.finalize();
        }
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("retained", &self.retained.len())
            .field("finalized", &self.is_finalized())
            .finish_non_exhaustive()
    }
}
