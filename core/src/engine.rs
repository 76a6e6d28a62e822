//! The native engine seam.
//!
//! [`Engine`] mirrors the engine's C entry points one to one. The binding's
//! lifecycle types ([`HandleBuilder`](crate::HandleBuilder),
//! [`Handle`](crate::Handle), [`Context`](crate::Context)) only ever talk to
//! the engine through this trait, so the system library
//! ([`LinkedEngine`](crate::LinkedEngine), feature `link`) and an in-process
//! implementation are interchangeable.
//!
//! # Ownership across the seam
//!
//! - Objects the binding encodes are only lent: the engine is configured
//!   without a free callback and never releases them.
//! - Objects the engine writes into out-params (diagnostics, run results) are
//!   engine-owned and must go back through [`Engine::object_free`] /
//!   [`Engine::result_free`] of the same engine, exactly once.

use std::ffi::c_char;

use crate::object::ObjectRef;
use crate::sys::{
    LogCallback, LogLevel, RawBuilder, RawConfig, RawContext, RawInstance, RawObject, RawResult,
    RetCode,
};

/// The engine's C ABI as a trait.
///
/// # Safety
///
/// Implementations must behave like the C library they stand for: returned
/// pointers stay valid until passed to the matching destroy/free call, out-params
/// are left as well-formed objects (or `INVALID`), and concurrent calls on
/// *different* contexts, as well as concurrent read-only calls on one instance
/// (`context_init`, `known_addresses`, `update`), are allowed.
pub unsafe trait Engine: Send + Sync {
    /// Engine version string, e.g. `"1.24.1"`.
    fn version(&self) -> &str;

    /// Register a log callback. Returns `false` if the engine refused it.
    fn set_log_callback(&self, callback: LogCallback, min_level: LogLevel) -> bool;

    /// # Safety
    ///
    /// `config` must be valid for the duration of the call.
    unsafe fn builder_init(&self, config: *const RawConfig) -> *mut RawBuilder;

    /// # Safety
    ///
    /// `builder` must be live, `path` valid for `path_len` bytes, `config` a
    /// well-formed object and `diagnostics` a writable `INVALID` object.
    unsafe fn builder_add_or_update_config(
        &self,
        builder: *mut RawBuilder,
        path: *const c_char,
        path_len: u32,
        config: *const RawObject,
        diagnostics: *mut RawObject,
    ) -> bool;

    /// # Safety
    ///
    /// `builder` must be live and `path` valid for `path_len` bytes.
    unsafe fn builder_remove_config(
        &self,
        builder: *mut RawBuilder,
        path: *const c_char,
        path_len: u32,
    ) -> bool;

    /// Compile every registered fragment. Null when nothing usable was loaded.
    ///
    /// # Safety
    ///
    /// `builder` must be live.
    unsafe fn builder_build_instance(&self, builder: *mut RawBuilder) -> *mut RawInstance;

    /// # Safety
    ///
    /// `builder` must be live and is dangling afterwards.
    unsafe fn builder_destroy(&self, builder: *mut RawBuilder);

    /// Layer `ruleset` over `instance` into a new instance. Null when the
    /// ruleset carries nothing the engine recognizes.
    ///
    /// # Safety
    ///
    /// `instance` must be live, `ruleset` well-formed, `diagnostics` a
    /// writable `INVALID` object.
    unsafe fn update(
        &self,
        instance: *mut RawInstance,
        ruleset: *const RawObject,
        diagnostics: *mut RawObject,
    ) -> *mut RawInstance;

    /// Addresses the instance reads. The array and strings are owned by the
    /// instance and live until it is destroyed.
    ///
    /// # Safety
    ///
    /// `instance` must be live and `size` writable.
    unsafe fn known_addresses(
        &self,
        instance: *mut RawInstance,
        size: *mut u32,
    ) -> *const *const c_char;

    /// # Safety
    ///
    /// `instance` must be live.
    unsafe fn context_init(&self, instance: *mut RawInstance) -> *mut RawContext;

    /// Evaluate one batch of data. `timeout` is in microseconds.
    ///
    /// # Safety
    ///
    /// `context` must be live and used by one caller at a time; `persistent`
    /// must stay valid until the context is destroyed; `ephemeral` only for
    /// this call; either may be null. `result` must be a writable default result.
    unsafe fn run(
        &self,
        context: *mut RawContext,
        persistent: *mut RawObject,
        ephemeral: *mut RawObject,
        result: *mut RawResult,
        timeout: u64,
    ) -> RetCode;

    /// # Safety
    ///
    /// `context` must be live and is dangling afterwards.
    unsafe fn context_destroy(&self, context: *mut RawContext);

    /// # Safety
    ///
    /// `instance` must be live and is dangling afterwards.
    unsafe fn destroy(&self, instance: *mut RawInstance);

    /// # Safety
    ///
    /// `result` must have been filled by this engine's `run` and not freed yet.
    unsafe fn result_free(&self, result: *mut RawResult);

    /// # Safety
    ///
    /// `object` must have been written by this engine and not freed yet.
    unsafe fn object_free(&self, object: *mut RawObject);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Release guards for engine-owned out-params
// ═══════════════════════════════════════════════════════════════════════════════

/// An object the engine wrote into an out-param. Freed through
/// [`Engine::object_free`] on drop, whether or not decoding succeeded.
pub(crate) struct EngineObject<'e> {
    engine: &'e dyn Engine,
    pub(crate) raw: RawObject,
}

impl<'e> EngineObject<'e> {
    pub(crate) fn new(engine: &'e dyn Engine) -> Self {
        Self {
            engine,
            raw: RawObject::invalid(),
        }
    }

    pub(crate) fn view(&self) -> ObjectRef<'_> {
        // SAFETY: either still `INVALID` or filled in by the engine.
        unsafe { ObjectRef::from_raw(&self.raw) }
    }
}

impl Drop for EngineObject<'_> {
    fn drop(&mut self) {
        // SAFETY: written by `self.engine` and freed only here.
        unsafe { self.engine.object_free(&mut self.raw) }
    }
}

/// A result filled by [`Engine::run`], freed through [`Engine::result_free`].
pub(crate) struct EngineResult<'e> {
    engine: &'e dyn Engine,
    pub(crate) raw: RawResult,
}

impl<'e> EngineResult<'e> {
    pub(crate) fn new(engine: &'e dyn Engine) -> Self {
        Self {
            engine,
            raw: RawResult::default(),
        }
    }
}

impl Drop for EngineResult<'_> {
    fn drop(&mut self) {
        // SAFETY: filled by `self.engine` and freed only here.
        unsafe { self.engine.result_free(&mut self.raw) }
    }
}
