//! [`Engine`] backed by the system libddwaf (feature `link`).
//!
//! Only declares and forwards to the C symbols. Finding the right shared
//! library for the platform is the host application's job (linker search
//! path, `LD_LIBRARY_PATH`, rpath).

use std::ffi::{c_char, CStr};

use crate::engine::Engine;
use crate::sys::{
    LogCallback, LogLevel, RawBuilder, RawConfig, RawContext, RawInstance, RawObject, RawResult,
    RetCode,
};

#[link(name = "ddwaf")]
extern "C" {
    fn ddwaf_get_version() -> *const c_char;
    fn ddwaf_set_log_cb(cb: Option<LogCallback>, min_level: LogLevel) -> bool;

    fn ddwaf_builder_init(config: *const RawConfig) -> *mut RawBuilder;
    fn ddwaf_builder_add_or_update_config(
        builder: *mut RawBuilder,
        path: *const c_char,
        path_len: u32,
        config: *const RawObject,
        diagnostics: *mut RawObject,
    ) -> bool;
    fn ddwaf_builder_remove_config(
        builder: *mut RawBuilder,
        path: *const c_char,
        path_len: u32,
    ) -> bool;
    fn ddwaf_builder_build_instance(builder: *mut RawBuilder) -> *mut RawInstance;
    fn ddwaf_builder_destroy(builder: *mut RawBuilder);

    fn ddwaf_update(
        handle: *mut RawInstance,
        ruleset: *const RawObject,
        diagnostics: *mut RawObject,
    ) -> *mut RawInstance;
    fn ddwaf_known_addresses(handle: *mut RawInstance, size: *mut u32) -> *const *const c_char;
    fn ddwaf_destroy(handle: *mut RawInstance);

    fn ddwaf_context_init(handle: *mut RawInstance) -> *mut RawContext;
    fn ddwaf_run(
        context: *mut RawContext,
        persistent_data: *mut RawObject,
        ephemeral_data: *mut RawObject,
        result: *mut RawResult,
        timeout: u64,
    ) -> RetCode;
    fn ddwaf_context_destroy(context: *mut RawContext);

    fn ddwaf_result_free(result: *mut RawResult);
    fn ddwaf_object_free(object: *mut RawObject);
}

/// The native engine linked from `libddwaf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkedEngine;

// SAFETY: thin forwarding to the C library the trait contract describes.
unsafe impl Engine for LinkedEngine {
    fn version(&self) -> &str {
        // SAFETY: returns a static NUL-terminated string.
        let ptr = unsafe { ddwaf_get_version() };
        if ptr.is_null() {
            return "unknown";
        }
        unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("unknown")
    }

    fn set_log_callback(&self, callback: LogCallback, min_level: LogLevel) -> bool {
        // SAFETY: `callback` is a plain `extern "C"` function with the expected signature.
        unsafe { ddwaf_set_log_cb(Some(callback), min_level) }
    }

    unsafe fn builder_init(&self, config: *const RawConfig) -> *mut RawBuilder {
        unsafe { ddwaf_builder_init(config) }
    }

    unsafe fn builder_add_or_update_config(
        &self,
        builder: *mut RawBuilder,
        path: *const c_char,
        path_len: u32,
        config: *const RawObject,
        diagnostics: *mut RawObject,
    ) -> bool {
        unsafe { ddwaf_builder_add_or_update_config(builder, path, path_len, config, diagnostics) }
    }

    unsafe fn builder_remove_config(
        &self,
        builder: *mut RawBuilder,
        path: *const c_char,
        path_len: u32,
    ) -> bool {
        unsafe { ddwaf_builder_remove_config(builder, path, path_len) }
    }

    unsafe fn builder_build_instance(&self, builder: *mut RawBuilder) -> *mut RawInstance {
        unsafe { ddwaf_builder_build_instance(builder) }
    }

    unsafe fn builder_destroy(&self, builder: *mut RawBuilder) {
        unsafe { ddwaf_builder_destroy(builder) }
    }

    unsafe fn update(
        &self,
        instance: *mut RawInstance,
        ruleset: *const RawObject,
        diagnostics: *mut RawObject,
    ) -> *mut RawInstance {
        unsafe { ddwaf_update(instance, ruleset, diagnostics) }
    }

    unsafe fn known_addresses(
        &self,
        instance: *mut RawInstance,
        size: *mut u32,
    ) -> *const *const c_char {
        unsafe { ddwaf_known_addresses(instance, size) }
    }

    unsafe fn context_init(&self, instance: *mut RawInstance) -> *mut RawContext {
        unsafe { ddwaf_context_init(instance) }
    }

    unsafe fn run(
        &self,
        context: *mut RawContext,
        persistent: *mut RawObject,
        ephemeral: *mut RawObject,
        result: *mut RawResult,
        timeout: u64,
    ) -> RetCode {
        unsafe { ddwaf_run(context, persistent, ephemeral, result, timeout) }
    }

    unsafe fn context_destroy(&self, context: *mut RawContext) {
        unsafe { ddwaf_context_destroy(context) }
    }

    unsafe fn destroy(&self, instance: *mut RawInstance) {
        unsafe { ddwaf_destroy(instance) }
    }

    unsafe fn result_free(&self, result: *mut RawResult) {
        unsafe { ddwaf_result_free(result) }
    }

    unsafe fn object_free(&self, object: *mut RawObject) {
        unsafe { ddwaf_object_free(object) }
    }
}
