//! Decoded configuration diagnostics.
//!
//! Produced by the engine whenever configuration is compiled or merged:
//!
//! ```json
//! {
//!   "ruleset_version": "1.2.3",
//!   "rules": {
//!     "loaded": ["id-1"],
//!     "failed": ["id-2"],
//!     "skipped": [],
//!     "errors": { "missing key 'conditions'": ["id-2"] },
//!     "warnings": {}
//!   },
//!   "processors": { "error": "invalid type: expected array" }
//! }
//! ```
//!
//! Each artifact kind (`rules`, `custom_rules`, `actions`, `processors`, ...)
//! becomes a [`SectionReport`]; kinds are not fixed, so unknown ones are kept.

use std::collections::{BTreeMap, BTreeSet};

use crate::object::ObjectRef;
use crate::{converter, Value};

/// Structured load report for one configuration compile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    /// `ruleset_version`, when the ruleset declared one.
    pub ruleset_version: Option<String>,
    /// Report per artifact kind.
    pub sections: BTreeMap<String, SectionReport>,
}

/// Load report for one artifact kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionReport {
    pub loaded: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    pub skipped: BTreeSet<String>,
    /// Error message → identifiers it affected.
    pub errors: BTreeMap<String, Vec<String>>,
    /// Warning message → identifiers it affected.
    pub warnings: BTreeMap<String, Vec<String>>,
    /// Set when the whole section could not be parsed.
    pub error: Option<String>,
}

impl SectionReport {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error.is_some() || !self.failed.is_empty() || !self.errors.is_empty()
    }

    fn from_value(value: &Value) -> Self {
        Self {
            loaded: string_set(value.get("loaded")),
            failed: string_set(value.get("failed")),
            skipped: string_set(value.get("skipped")),
            errors: message_map(value.get("errors")),
            warnings: message_map(value.get("warnings")),
            error: value.get("error").and_then(Value::as_str).map(str::to_owned),
        }
    }
}

impl Diagnostics {
    /// Decode an engine diagnostics object. Never fails: unexpected shapes
    /// are skipped.
    #[must_use]
    pub fn from_object(object: ObjectRef<'_>) -> Self {
        Self::from_value(&converter::decode(object))
    }

    /// Interpret an already-decoded diagnostics tree.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let mut diagnostics = Self::default();
        let Some(entries) = value.as_map() else {
            return diagnostics;
        };
        for (key, section) in entries {
            if key == "ruleset_version" {
                diagnostics.ruleset_version = section.as_str().map(str::to_owned);
            } else if section.as_map().is_some() {
                diagnostics
                    .sections
                    .insert(key.clone(), SectionReport::from_value(section));
            }
        }
        diagnostics
    }

    #[must_use]
    pub fn section(&self, kind: &str) -> Option<&SectionReport> {
        self.sections.get(kind)
    }

    /// Identifiers loaded for `kind`, empty when the section is absent.
    pub fn loaded_ids<'a>(&'a self, kind: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.section(kind)
            .into_iter()
            .flat_map(|s| s.loaded.iter().map(String::as_str))
    }

    /// Identifiers that failed for `kind`, empty when the section is absent.
    pub fn failed_ids<'a>(&'a self, kind: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.section(kind)
            .into_iter()
            .flat_map(|s| s.failed.iter().map(String::as_str))
    }

    /// Whether any section reported a failure.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.sections.values().any(SectionReport::has_errors)
    }

    /// Fold `other` in: sections merge set-wise, a newer version wins.
    pub fn merge(&mut self, other: &Diagnostics) {
        if other.ruleset_version.is_some() {
            self.ruleset_version.clone_from(&other.ruleset_version);
        }
        for (kind, report) in &other.sections {
            let entry = self.sections.entry(kind.clone()).or_default();
            entry.loaded.extend(report.loaded.iter().cloned());
            entry.failed.extend(report.failed.iter().cloned());
            entry.skipped.extend(report.skipped.iter().cloned());
            for (msg, ids) in &report.errors {
                entry.errors.entry(msg.clone()).or_default().extend(ids.iter().cloned());
            }
            for (msg, ids) in &report.warnings {
                entry.warnings.entry(msg.clone()).or_default().extend(ids.iter().cloned());
            }
            if report.error.is_some() {
                entry.error.clone_from(&report.error);
            }
        }
    }
}

fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default()
}

fn message_map(value: Option<&Value>) -> BTreeMap<String, Vec<String>> {
    value
        .and_then(Value::as_map)
        .map(|entries| {
            entries
                .iter()
                .map(|(msg, ids)| {
                    let ids = ids
                        .as_array()
                        .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_owned).collect())
                        .unwrap_or_default();
                    (msg.clone(), ids)
                })
                .collect()
        })
        .unwrap_or_default()
}
