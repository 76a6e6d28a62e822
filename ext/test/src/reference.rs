//! [`Engine`] implemented in process.
//!
//! Mirrors the native library's ownership rules exactly: builders, instances
//! and contexts are boxed and handed out as opaque pointers; diagnostics and
//! results are allocated here and must come back through `object_free` /
//! `result_free`. Inputs are only ever read, never freed.

use std::collections::BTreeMap;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use ddwaf::sys::{
    LogCallback, LogLevel, ObjectType, RawBuilder, RawConfig, RawContext, RawInstance, RawObject,
    RawResult, RetCode,
};
use ddwaf::{converter, Engine, Limits, ObjectRef, Value, WireObject};

use crate::eval::{Obfuscation, Session};
use crate::ruleset::{Fragment, Ruleset};
use crate::ENGINE_VERSION;

/// The in-process engine.
#[derive(Default)]
pub struct ReferenceEngine {
    log: RwLock<Option<(LogCallback, LogLevel)>>,
}

impl std::fmt::Debug for ReferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceEngine")
            .field("logging", &self.log.read().as_ref().map(|(_, level)| *level))
            .finish()
    }
}

struct BuilderState {
    obfuscation: Arc<Obfuscation>,
    fragments: BTreeMap<String, Fragment>,
}

struct InstanceState {
    ruleset: Arc<Ruleset>,
    obfuscation: Arc<Obfuscation>,
    sources: Vec<Fragment>,
    // `address_ptrs` points into `addresses`.
    addresses: Vec<CString>,
    address_ptrs: Vec<*const c_char>,
}

impl InstanceState {
    fn new(sources: Vec<Fragment>, obfuscation: Arc<Obfuscation>) -> Option<Self> {
        let ruleset = Ruleset::compile(&sources);
        if ruleset.rules.is_empty() {
            return None;
        }
        let addresses: Vec<CString> = ruleset
            .addresses()
            .into_iter()
            .filter_map(|a| CString::new(a).ok())
            .collect();
        let address_ptrs = addresses.iter().map(|a| a.as_ptr()).collect();
        Some(Self {
            ruleset: Arc::new(ruleset),
            obfuscation,
            sources,
            addresses,
            address_ptrs,
        })
    }
}

impl ReferenceEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, level: LogLevel, function: &CStr, line: u32, message: &str) {
        let Some((callback, min_level)) = *self.log.read() else {
            return;
        };
        if level < min_level {
            return;
        }
        let file = CString::new(file!()).unwrap_or_default();
        // SAFETY: every pointer is valid for the duration of the call.
        unsafe {
            callback(
                level,
                function.as_ptr(),
                file.as_ptr(),
                line,
                message.as_ptr().cast(),
                message.len() as u64,
            );
        }
    }

    /// Encode `diagnostics` into the caller's out-param, if any.
    fn write_diagnostics(&self, out: *mut RawObject, diagnostics: &Value) {
        if out.is_null() {
            return;
        }
        match converter::encode(diagnostics, &Limits::UNLIMITED, false) {
            // SAFETY: `out` is a writable `INVALID` object per the ABI.
            Ok(encoded) => unsafe { *out = encoded.object.into_raw() },
            Err(e) => self.log(LogLevel::ERROR, c"write_diagnostics", line!(), &e.to_string()),
        }
    }
}

/// Decode a caller-owned object.
///
/// # Safety
///
/// `object` must be null or point to a well-formed object.
unsafe fn read(object: *const RawObject) -> Option<Value> {
    // SAFETY: per the function contract.
    let object = unsafe { object.as_ref() }?;
    Some(converter::decode(unsafe { ObjectRef::from_raw(object) }))
}

/// Decode a run input, rejecting anything but a map.
///
/// # Safety
///
/// As for [`read`].
unsafe fn read_input(object: *const RawObject) -> Result<Option<Value>, RetCode> {
    // SAFETY: per the function contract.
    match unsafe { object.as_ref() } {
        None => Ok(None),
        Some(raw) if raw.type_ == ObjectType::MAP => Ok(unsafe { read(raw) }),
        Some(_) => Err(RetCode::ERR_INVALID_OBJECT),
    }
}

/// # Safety
///
/// `path` must be valid for `len` bytes.
unsafe fn read_path(path: *const c_char, len: u32) -> Option<String> {
    if path.is_null() {
        return None;
    }
    // SAFETY: per the function contract.
    let bytes = unsafe { std::slice::from_raw_parts(path.cast::<u8>(), len as usize) };
    Some(String::from_utf8_lossy(bytes).into_owned())
}

fn give(value: &Value) -> Option<RawObject> {
    converter::encode(value, &Limits::UNLIMITED, false)
        .ok()
        .map(|encoded| encoded.object.into_raw())
}

// SAFETY: every pointer handed out is a leaked `Box` of the matching state
// type and is reclaimed exactly once by the matching destroy call. Shared
// instance state is immutable; contexts are only touched by their one caller.
unsafe impl Engine for ReferenceEngine {
    fn version(&self) -> &str {
        ENGINE_VERSION
    }

    fn set_log_callback(&self, callback: LogCallback, min_level: LogLevel) -> bool {
        *self.log.write() = Some((callback, min_level));
        true
    }

    unsafe fn builder_init(&self, config: *const RawConfig) -> *mut RawBuilder {
        // SAFETY: caller passes a valid config or null.
        let (key, value) = match unsafe { config.as_ref() } {
            Some(config) => unsafe {
                (
                    c_str(config.obfuscator.key_regex),
                    c_str(config.obfuscator.value_regex),
                )
            },
            None => (None, None),
        };
        let obfuscation = match Obfuscation::new(key.as_deref(), value.as_deref()) {
            Ok(obfuscation) => obfuscation,
            Err(e) => {
                self.log(LogLevel::ERROR, c"builder_init", line!(), &format!("invalid obfuscator regex: {e}"));
                return std::ptr::null_mut();
            }
        };
        let state = Box::new(BuilderState {
            obfuscation: Arc::new(obfuscation),
            fragments: BTreeMap::new(),
        });
        Box::into_raw(state).cast()
    }

    unsafe fn builder_add_or_update_config(
        &self,
        builder: *mut RawBuilder,
        path: *const c_char,
        path_len: u32,
        config: *const RawObject,
        diagnostics: *mut RawObject,
    ) -> bool {
        // SAFETY: a live builder from `builder_init`.
        let Some(state) = (unsafe { builder.cast::<BuilderState>().as_mut() }) else {
            return false;
        };
        let (Some(path), Some(document)) = (unsafe { read_path(path, path_len) }, unsafe { read(config) })
        else {
            return false;
        };

        let (fragment, report) = Fragment::parse(&document);
        self.write_diagnostics(diagnostics, &report);
        if !fragment.recognized {
            self.log(
                LogLevel::WARN,
                c"builder_add_or_update_config",
                line!(),
                &format!("no recognized section in configuration at {path}"),
            );
            return false;
        }
        self.log(
            LogLevel::DEBUG,
            c"builder_add_or_update_config",
            line!(),
            &format!("loaded {} rules from {path}", fragment.rule_count()),
        );
        state.fragments.insert(path, fragment);
        true
    }

    unsafe fn builder_remove_config(
        &self,
        builder: *mut RawBuilder,
        path: *const c_char,
        path_len: u32,
    ) -> bool {
        // SAFETY: a live builder and a path of `path_len` bytes.
        let Some(state) = (unsafe { builder.cast::<BuilderState>().as_mut() }) else {
            return false;
        };
        let Some(path) = (unsafe { read_path(path, path_len) }) else {
            return false;
        };
        state.fragments.remove(&path).is_some()
    }

    unsafe fn builder_build_instance(&self, builder: *mut RawBuilder) -> *mut RawInstance {
        // SAFETY: a live builder.
        let Some(state) = (unsafe { builder.cast::<BuilderState>().as_ref() }) else {
            return std::ptr::null_mut();
        };
        let sources = state.fragments.values().cloned().collect();
        match InstanceState::new(sources, Arc::clone(&state.obfuscation)) {
            Some(instance) => {
                self.log(
                    LogLevel::DEBUG,
                    c"builder_build_instance",
                    line!(),
                    &format!("compiled {} rules", instance.ruleset.rules.len()),
                );
                Box::into_raw(Box::new(instance)).cast()
            }
            None => {
                self.log(LogLevel::ERROR, c"builder_build_instance", line!(), "no valid rules loaded");
                std::ptr::null_mut()
            }
        }
    }

    unsafe fn builder_destroy(&self, builder: *mut RawBuilder) {
        if !builder.is_null() {
            // SAFETY: reclaims the box leaked by `builder_init`.
            drop(unsafe { Box::from_raw(builder.cast::<BuilderState>()) });
        }
    }

    unsafe fn update(
        &self,
        instance: *mut RawInstance,
        ruleset: *const RawObject,
        diagnostics: *mut RawObject,
    ) -> *mut RawInstance {
        // SAFETY: a live instance and a well-formed ruleset.
        let Some(state) = (unsafe { instance.cast::<InstanceState>().as_ref() }) else {
            return std::ptr::null_mut();
        };
        let Some(document) = (unsafe { read(ruleset) }) else {
            return std::ptr::null_mut();
        };

        let (fragment, report) = Fragment::parse(&document);
        self.write_diagnostics(diagnostics, &report);
        if !fragment.recognized {
            self.log(LogLevel::DEBUG, c"update", line!(), "no recognized section in update");
            return std::ptr::null_mut();
        }
        let mut sources = state.sources.clone();
        sources.push(fragment);
        match InstanceState::new(sources, Arc::clone(&state.obfuscation)) {
            Some(updated) => Box::into_raw(Box::new(updated)).cast(),
            None => std::ptr::null_mut(),
        }
    }

    unsafe fn known_addresses(
        &self,
        instance: *mut RawInstance,
        size: *mut u32,
    ) -> *const *const c_char {
        // SAFETY: a live instance and a writable `size`.
        let Some(state) = (unsafe { instance.cast::<InstanceState>().as_ref() }) else {
            return std::ptr::null();
        };
        debug_assert_eq!(state.addresses.len(), state.address_ptrs.len());
        if let Some(size) = unsafe { size.as_mut() } {
            *size = u32::try_from(state.address_ptrs.len()).unwrap_or(u32::MAX);
        }
        if state.address_ptrs.is_empty() {
            return std::ptr::null();
        }
        state.address_ptrs.as_ptr()
    }

    unsafe fn context_init(&self, instance: *mut RawInstance) -> *mut RawContext {
        // SAFETY: a live instance.
        let Some(state) = (unsafe { instance.cast::<InstanceState>().as_ref() }) else {
            return std::ptr::null_mut();
        };
        let session = Session::new(Arc::clone(&state.ruleset), Arc::clone(&state.obfuscation));
        Box::into_raw(Box::new(session)).cast()
    }

    unsafe fn run(
        &self,
        context: *mut RawContext,
        persistent: *mut RawObject,
        ephemeral: *mut RawObject,
        result: *mut RawResult,
        timeout: u64,
    ) -> RetCode {
        let start = Instant::now();
        // SAFETY: a live context used by one caller, and a writable result.
        let (Some(session), Some(result)) = (unsafe { context.cast::<Session>().as_mut() }, unsafe {
            result.as_mut()
        }) else {
            return RetCode::ERR_INVALID_ARGUMENT;
        };
        if persistent.is_null() && ephemeral.is_null() {
            return RetCode::ERR_INVALID_ARGUMENT;
        }
        let persistent = match unsafe { read_input(persistent) } {
            Ok(value) => value,
            Err(code) => return code,
        };
        let ephemeral = match unsafe { read_input(ephemeral) } {
            Ok(value) => value,
            Err(code) => return code,
        };

        let Ok(outcome) = session.run(persistent, ephemeral, Duration::from_micros(timeout)) else {
            return RetCode::ERR_INVALID_OBJECT;
        };
        if outcome.timed_out {
            self.log(LogLevel::DEBUG, c"run", line!(), "evaluation budget exhausted");
        }

        let matched = !outcome.events.is_empty();
        let (Some(events), Some(actions), Some(derivatives)) = (
            give(&Value::Array(outcome.events)),
            give(&Value::Map(outcome.actions)),
            give(&Value::Map(outcome.derivatives)),
        ) else {
            return RetCode::ERR_INTERNAL;
        };
        *result = RawResult {
            timeout: outcome.timed_out,
            events,
            actions,
            derivatives,
            total_runtime: u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX),
        };
        if matched {
            RetCode::MATCH
        } else {
            RetCode::OK
        }
    }

    unsafe fn context_destroy(&self, context: *mut RawContext) {
        if !context.is_null() {
            // SAFETY: reclaims the box leaked by `context_init`.
            drop(unsafe { Box::from_raw(context.cast::<Session>()) });
        }
    }

    unsafe fn destroy(&self, instance: *mut RawInstance) {
        if !instance.is_null() {
            // SAFETY: reclaims the box leaked by `builder_build_instance` or `update`.
            drop(unsafe { Box::from_raw(instance.cast::<InstanceState>()) });
        }
    }

    unsafe fn result_free(&self, result: *mut RawResult) {
        // SAFETY: a result filled by `run` (or still default).
        if let Some(result) = unsafe { result.as_mut() } {
            for object in [&mut result.events, &mut result.actions, &mut result.derivatives] {
                drop(unsafe { WireObject::from_raw(std::mem::take(object)) });
            }
        }
    }

    unsafe fn object_free(&self, object: *mut RawObject) {
        // SAFETY: an object written by this engine (or still `INVALID`).
        if let Some(object) = unsafe { object.as_mut() } {
            drop(unsafe { WireObject::from_raw(std::mem::take(object)) });
        }
    }
}

/// # Safety
///
/// `ptr` must be null or NUL-terminated.
unsafe fn c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: per the function contract.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample;
    use std::ptr;

    #[test]
    fn version_is_reported() {
        assert_eq!(ReferenceEngine::new().version(), ENGINE_VERSION);
    }

    #[test]
    fn build_without_rules_is_null() {
        let engine = ReferenceEngine::new();
        unsafe {
            let builder = engine.builder_init(ptr::null());
            assert!(!builder.is_null());
            assert!(engine.builder_build_instance(builder).is_null());
            engine.builder_destroy(builder);
        }
    }

    #[test]
    fn invalid_obfuscator_refuses_builder() {
        let engine = ReferenceEngine::new();
        let pattern = c"(";
        let config = RawConfig {
            limits: ddwaf::sys::RawLimits::default(),
            obfuscator: ddwaf::sys::RawObfuscator {
                key_regex: pattern.as_ptr(),
                value_regex: ptr::null(),
            },
            free_fn: None,
        };
        assert!(unsafe { engine.builder_init(&config) }.is_null());
    }

    #[test]
    fn run_rejects_non_map_input() {
        let engine = ReferenceEngine::new();
        let document = converter::encode(
            &sample::ruleset([sample::regex_rule("1", "a", "x")]),
            &Limits::UNLIMITED,
            false,
        )
        .unwrap()
        .object;
        unsafe {
            let builder = engine.builder_init(ptr::null());
            let mut diagnostics = RawObject::invalid();
            assert!(engine.builder_add_or_update_config(
                builder,
                c"p".as_ptr(),
                1,
                document.as_ptr(),
                &mut diagnostics
            ));
            engine.object_free(&mut diagnostics);
            let instance = engine.builder_build_instance(builder);
            let context = engine.context_init(instance);

            let mut input = WireObject::string(b"nope").unwrap();
            let mut result = RawResult::default();
            let code = engine.run(context, input.as_mut_ptr(), ptr::null_mut(), &mut result, 1_000);
            assert_eq!(code, RetCode::ERR_INVALID_OBJECT);
            let code = engine.run(context, ptr::null_mut(), ptr::null_mut(), &mut result, 1_000);
            assert_eq!(code, RetCode::ERR_INVALID_ARGUMENT);
            engine.result_free(&mut result);

            engine.context_destroy(context);
            engine.destroy(instance);
            engine.builder_destroy(builder);
        }
    }
}
