//! Forwarding of engine log messages into `tracing`.
//!
//! The engine logs through a C callback, synchronously, from whichever thread
//! made the engine call. [`install`] registers [`forward`] as that callback;
//! each message becomes a `tracing` event under the `ddwaf::engine` target
//! carrying `function`, `file` and `line` fields.

use std::ffi::{c_char, CStr};
use std::borrow::Cow;

use crate::engine::Engine;
use crate::sys::LogLevel;

/// Target all forwarded engine messages are logged under.
pub const TARGET: &str = "ddwaf::engine";

/// Route engine log messages at or above `min_level` to `tracing`.
///
/// Returns `false` if the engine refused the callback.
pub fn install(engine: &dyn Engine, min_level: LogLevel) -> bool {
    let installed = engine.set_log_callback(forward, min_level);
    if installed {
        tracing::debug!(min_level = min_level.0, "engine log forwarding installed");
    } else {
        tracing::warn!("engine refused log callback");
    }
    installed
}

/// The `ddwaf_log_cb` registered by [`install`].
///
/// Tolerates null and non-UTF-8 pointers; never unwinds into the engine.
///
/// # Safety
///
/// Non-null `function` and `file` must be NUL-terminated; non-null `message`
/// must be valid for `message_len` bytes.
pub unsafe extern "C" fn forward(
    level: LogLevel,
    function: *const c_char,
    file: *const c_char,
    line: u32,
    message: *const c_char,
    message_len: u64,
) {
    // SAFETY: delegated to the caller per the callback ABI.
    let function = unsafe { c_str(function) };
    let file = unsafe { c_str(file) };
    let message = unsafe { message_str(message, message_len) };

    // `tracing` levels must be constants at the call site.
    match level {
        LogLevel::TRACE => {
            tracing::trace!(target: TARGET, %function, %file, line, "{message}");
        }
        LogLevel::DEBUG => {
            tracing::debug!(target: TARGET, %function, %file, line, "{message}");
        }
        LogLevel::INFO => {
            tracing::info!(target: TARGET, %function, %file, line, "{message}");
        }
        LogLevel::WARN => {
            tracing::warn!(target: TARGET, %function, %file, line, "{message}");
        }
        _ => {
            tracing::error!(target: TARGET, %function, %file, line, "{message}");
        }
    }
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        return Cow::Borrowed("");
    }
    // SAFETY: caller guarantees NUL termination.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy()
}

unsafe fn message_str<'a>(ptr: *const c_char, len: u64) -> Cow<'a, str> {
    let Ok(len) = usize::try_from(len) else {
        return Cow::Borrowed("");
    };
    if ptr.is_null() {
        return Cow::Borrowed("");
    }
    // SAFETY: caller guarantees `len` readable bytes.
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) };
    String::from_utf8_lossy(bytes)
}
