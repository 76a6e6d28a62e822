//! Compiled ruleset instances.

use std::ffi::CStr;
use std::fmt;
use std::sync::Arc;

use crate::engine::{Engine, EngineObject};
use crate::sys::RawInstance;
use crate::{converter, Component, Context, Diagnostics, Error, LibDdwafError, Limits, Result, Value};

/// An immutable compiled ruleset.
///
/// Obtained from [`HandleBuilder::build_handle`](crate::HandleBuilder::build_handle)
/// or [`Handle::merge`]. A handle is `Send + Sync`: share it (by reference or
/// in an `Arc`) and build one [`Context`] per request on any thread.
///
/// Contexts borrow their handle, so a handle cannot be finalized or dropped
/// while a context built from it is alive.
pub struct Handle {
    engine: Arc<dyn Engine>,
    raw: *mut RawInstance,
    limits: Limits,
    diagnostics: Diagnostics,
}

// SAFETY: the instance is never mutated after construction; the engine allows
// concurrent `context_init`, `known_addresses` and `update` on one instance.
// Destruction requires `&mut self`.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Handle {
    pub(crate) fn from_raw(
        engine: Arc<dyn Engine>,
        raw: *mut RawInstance,
        limits: Limits,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            engine,
            raw,
            limits,
            diagnostics,
        }
    }

    /// Start a new evaluation session on this handle.
    ///
    /// # Errors
    ///
    /// [`Error::InstanceFinalized`] after [`finalize`](Self::finalize),
    /// [`Error::LibDdwaf`] when the engine cannot create the session.
    pub fn build_context(&self) -> Result<Context<'_>> {
        let raw = self.live()?;
        // SAFETY: `raw` is live.
        let context = unsafe { self.engine.context_init(raw) };
        if context.is_null() {
            return Err(LibDdwafError::new("could not create context").into());
        }
        tracing::trace!("context created");
        Ok(Context::from_raw(self, context))
    }

    /// Input addresses the compiled rules read, in engine order.
    ///
    /// # Errors
    ///
    /// [`Error::InstanceFinalized`] after [`finalize`](Self::finalize).
    pub fn known_addresses(&self) -> Result<Vec<String>> {
        let raw = self.live()?;
        let mut size = 0u32;
        // SAFETY: `raw` is live and `size` writable.
        let addresses = unsafe { self.engine.known_addresses(raw, &mut size) };
        if addresses.is_null() || size == 0 {
            return Ok(Vec::new());
        }

        // SAFETY: the engine returned `size` entries owned by the live instance.
        let entries = unsafe { std::slice::from_raw_parts(addresses, size as usize) };
        Ok(entries
            .iter()
            .filter(|ptr| !ptr.is_null())
            // SAFETY: non-null entries are NUL-terminated strings.
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
            .collect())
    }

    /// Layer `data` (`rules_override`, `rules_data`, `exclusions`, ...) over
    /// this ruleset, producing a new handle. This handle is left untouched.
    ///
    /// Returns `Ok(None)` when the engine does not recognize anything in
    /// `data`; that is a recoverable outcome, not an error.
    ///
    /// # Errors
    ///
    /// [`Error::InstanceFinalized`] after [`finalize`](Self::finalize),
    /// [`Error::Conversion`] when `data` cannot be encoded.
    pub fn merge(&self, data: &Value) -> Result<Option<Handle>> {
        let raw = self.live()?;
        let encoded = converter::encode(data, &self.limits, false)?;

        let mut diagnostics = EngineObject::new(self.engine.as_ref());
        // SAFETY: `raw` is live; `data` is borrowed for the call only.
        let merged = unsafe {
            self.engine
                .update(raw, encoded.object.as_ptr(), &mut diagnostics.raw)
        };
        let decoded = Diagnostics::from_object(diagnostics.view());

        if merged.is_null() {
            tracing::debug!("merge data not recognized");
            return Ok(None);
        }
        tracing::debug!(ruleset_version = ?decoded.ruleset_version, "handle merged");
        Ok(Some(Handle::from_raw(
            Arc::clone(&self.engine),
            merged,
            self.limits,
            decoded,
        )))
    }

    /// Diagnostics of the configuration compiled into this handle: the
    /// builder's registered fragments, or the merge data for merged handles.
    /// Remains readable after [`finalize`](Self::finalize).
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    #[must_use]
    pub fn limits(&self) -> Limits {
        self.limits
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.raw.is_null()
    }

    /// Destroy the native instance. Every context built from this handle
    /// must be finalized (or dropped) first, which the borrow checker enforces.
    ///
    /// # Errors
    ///
    /// [`Error::InstanceFinalized`] when called a second time.
    pub fn finalize(&mut self) -> Result<()> {
        let raw = self.live()?;
        self.raw = std::ptr::null_mut();
        // SAFETY: `raw` was live, no context borrows `self`, never used again.
        unsafe { self.engine.destroy(raw) };
        tracing::debug!("handle finalized");
        Ok(())
    }

    pub(crate) fn live(&self) -> Result<*mut RawInstance> {
        if self.raw.is_null() {
            return Err(Error::InstanceFinalized(Component::Handle));
        }
        Ok(self.raw)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            tracing::debug!("handle dropped without finalize");
            let _ = self.finalize();
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("limits", &self.limits)
            .field("ruleset_version", &self.diagnostics.ruleset_version)
            .field("finalized", &self.is_finalized())
            .finish_non_exhaustive()
    }
}
