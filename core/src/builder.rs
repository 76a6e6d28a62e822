//! Accumulating configuration fragments into compiled [`Handle`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::ObfuscatorStrings;
use crate::engine::{Engine, EngineObject};
use crate::sys::{RawBuilder, RawConfig};
use crate::{converter, Component, Config, Diagnostics, Error, Handle, LibDdwafError, Limits};
use crate::{Result, Value};

/// Collects configuration fragments by path and compiles them into handles.
///
/// Re-adding a path replaces the fragment registered there; removing it
/// retracts it. Every [`build_handle`](Self::build_handle) compiles the union
/// of the fragments registered at that moment. Handles already built are
/// independent of the builder and outlive it.
///
/// A builder is `Send` but not `Sync`: one caller drives it at a time.
///
/// ```ignore
/// let mut builder = HandleBuilder::new(engine, &Config::default())?;
/// builder.add_or_update_config("datadog/00/ASM_DD/base", &ruleset)?;
/// let handle = builder.build_handle()?;
/// builder.finalize()?;
/// ```
pub struct HandleBuilder {
    engine: Arc<dyn Engine>,
    raw: *mut RawBuilder,
    limits: Limits,
    diagnostics: BTreeMap<String, Diagnostics>,
    // The engine may keep pointers into the patterns.
    _obfuscator: ObfuscatorStrings,
}

// SAFETY: the native builder has no thread affinity; `&mut self` on every
// mutating call keeps access serialized.
unsafe impl Send for HandleBuilder {}

impl HandleBuilder {
    /// Create a builder with `config`'s limits and obfuscator.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for obfuscator patterns containing NUL,
    /// [`Error::LibDdwaf`] when the engine refuses the configuration.
    pub fn new(engine: Arc<dyn Engine>, config: &Config) -> Result<Self> {
        let obfuscator = config.obfuscator.to_c_strings()?;
        let raw_config = RawConfig {
            limits: config.limits.to_raw(),
            obfuscator: obfuscator.as_raw(),
            free_fn: None,
        };

        // SAFETY: `raw_config` and the patterns it points to outlive the call.
        let raw = unsafe { engine.builder_init(&raw_config) };
        if raw.is_null() {
            return Err(LibDdwafError::new("engine refused the builder configuration").into());
        }

        tracing::debug!(
            engine_version = engine.version(),
            limits = ?config.limits,
            "builder created"
        );

        Ok(Self {
            engine,
            raw,
            limits: config.limits,
            diagnostics: BTreeMap::new(),
            _obfuscator: obfuscator,
        })
    }

    /// Register `fragment` at `path`, replacing any fragment already there.
    ///
    /// Returns the engine's diagnostics for the fragment. A fragment the
    /// engine rejects outright is reported through those diagnostics too; it
    /// leaves the builder's state unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::InstanceFinalized`] after [`finalize`](Self::finalize),
    /// [`Error::Conversion`] when the fragment cannot be encoded,
    /// [`Error::InvalidConfig`] for a path longer than `u32::MAX` bytes.
    pub fn add_or_update_config(&mut self, path: &str, fragment: &Value) -> Result<Diagnostics> {
        let raw = self.live()?;
        let path_len = path_len(path)?;
        let encoded = converter::encode(fragment, &self.limits, false)?;
        if encoded.truncated {
            tracing::warn!(path, "configuration fragment truncated by limits");
        }

        let mut diagnostics = EngineObject::new(self.engine.as_ref());
        // SAFETY: `raw` is live, `path` is valid for `path_len` bytes, the
        // fragment is only borrowed and outlives the call.
        let accepted = unsafe {
            self.engine.builder_add_or_update_config(
                raw,
                path.as_ptr().cast(),
                path_len,
                encoded.object.as_ptr(),
                &mut diagnostics.raw,
            )
        };
        let decoded = Diagnostics::from_object(diagnostics.view());

        if accepted {
            tracing::debug!(path, ruleset_version = ?decoded.ruleset_version, "config updated");
            self.diagnostics.insert(path.to_owned(), decoded.clone());
        } else {
            tracing::warn!(path, "config rejected by engine");
        }
        Ok(decoded)
    }

    /// Retract the fragment at `path`. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// [`Error::InstanceFinalized`] after [`finalize`](Self::finalize),
    /// [`Error::InvalidConfig`] for a path longer than `u32::MAX` bytes.
    pub fn remove_config(&mut self, path: &str) -> Result<bool> {
        let raw = self.live()?;
        let path_len = path_len(path)?;

        // SAFETY: `raw` is live and `path` is valid for `path_len` bytes.
        let removed = unsafe {
            self.engine
                .builder_remove_config(raw, path.as_ptr().cast(), path_len)
        };
        if removed {
            self.diagnostics.remove(path);
            tracing::debug!(path, "config removed");
        } else {
            tracing::trace!(path, "no config registered at path");
        }
        Ok(removed)
    }

    /// Compile every registered fragment into a new [`Handle`].
    ///
    /// # Errors
    ///
    /// [`Error::InstanceFinalized`] after [`finalize`](Self::finalize);
    /// [`Error::LibDdwaf`], carrying the combined diagnostics of the
    /// registered fragments, when the engine produces no instance (no valid
    /// rule was loaded).
    pub fn build_handle(&self) -> Result<Handle> {
        let raw = self.live()?;
        let diagnostics = self.diagnostics();

        // SAFETY: `raw` is live.
        let instance = unsafe { self.engine.builder_build_instance(raw) };
        if instance.is_null() {
            tracing::warn!(paths = self.diagnostics.len(), "no valid rules loaded");
            return Err(LibDdwafError {
                message: "could not build handle: no valid rules loaded".to_owned(),
                diagnostics: Some(diagnostics),
            }
            .into());
        }

        tracing::debug!(
            paths = self.diagnostics.len(),
            ruleset_version = ?diagnostics.ruleset_version,
            "handle built"
        );
        Ok(Handle::from_raw(
            Arc::clone(&self.engine),
            instance,
            self.limits,
            diagnostics,
        ))
    }

    /// Combined diagnostics of every fragment currently registered.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        let mut combined = Diagnostics::default();
        for diagnostics in self.diagnostics.values() {
            combined.merge(diagnostics);
        }
        combined
    }

    /// Diagnostics of the fragment registered at `path`.
    #[must_use]
    pub fn path_diagnostics(&self, path: &str) -> Option<&Diagnostics> {
        self.diagnostics.get(path)
    }

    /// Registered paths, in lexicographic order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.diagnostics.keys().map(String::as_str)
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

    /// Destroy the native builder. Handles already built stay usable.
    ///
    /// # Errors
    ///
    /// [`Error::InstanceFinalized`] when called a second time.
    pub fn finalize(&mut self) -> Result<()> {
        let raw = self.live()?;
        self.raw = std::ptr::null_mut();
        self.diagnostics.clear();
        // SAFETY: `raw` was live and is never used again.
        unsafe { self.engine.builder_destroy(raw) };
        tracing::debug!("builder finalized");
        Ok(())
    }

    fn live(&self) -> Result<*mut RawBuilder> {
        if self.raw.is_null() {
            return Err(Error::InstanceFinalized(Component::Builder));
        }
        Ok(self.raw)
    }
}

impl Drop for HandleBuilder {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            tracing::debug!("builder dropped without finalize");
            let _ = self.finalize();
        }
    }
}

impl fmt::Debug for HandleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleBuilder")
            .field("limits", &self.limits)
            .field("paths", &self.diagnostics.keys().collect::<Vec<_>>())
            .field("finalized", &self.is_finalized())
            .finish_non_exhaustive()
    }
}

fn path_len(path: &str) -> Result<u32> {
    u32::try_from(path.len()).map_err(|_| Error::InvalidConfig {
        reason: format!("configuration path is {} bytes long", path.len()),
    })
}
