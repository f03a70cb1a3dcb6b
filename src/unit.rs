//! The runnable side of a processing unit.
//!
//! A [`Unit`] is what a factory in the [`Registry`](crate::Registry) builds
//! from resolved [`Settings`]. Units are shared between threads and between
//! records, so all per-item state has to live in the [`Record`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::record::{Patch, Record};

/// A configured processing unit.
pub trait Unit: Send + Sync {
    /// Reads from `record` and stages writes in `patch`.
    ///
    /// `Ok(true)` means the unit did its job, `Ok(false)` that it ran but
    /// could not produce anything useful (no match found, upstream service
    /// had nothing). Writes staged before returning `Ok(false)` are still
    /// applied. An `Err` discards the patch.
    fn apply(&self, record: &Record, patch: &mut Patch) -> anyhow::Result<bool>;
}

type ApplyFn = dyn Fn(&Record, &mut Patch) -> anyhow::Result<bool> + Send + Sync;

/// A [`Unit`] backed by a closure.
#[derive(Clone)]
pub struct FnUnit(Arc<ApplyFn>);

impl FnUnit {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Record, &mut Patch) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }
}

impl Unit for FnUnit {
    fn apply(&self, record: &Record, patch: &mut Patch) -> anyhow::Result<bool> {
        (self.0)(record, patch)
    }
}

impl Debug for FnUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FnUnit(*)")
    }
}

/// Configuration resolved for one unit, plus the tracing span it should log
/// under.
#[derive(Clone)]
pub struct Settings {
    values: BTreeMap<String, String>,
    /// Span tagged with the unit name.
    pub span: tracing::Span,
}

impl Settings {
    pub(crate) fn new(values: BTreeMap<String, String>, span: tracing::Span) -> Self {
        Self { values, span }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Like [`Settings::get`], for factories that want to bail with `?`.
    pub fn require(&self, key: &str) -> anyhow::Result<&str> {
        self.get(key)
            .ok_or_else(|| anyhow::anyhow!("configuration key '{key}' was not resolved"))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(BTreeMap::new(), tracing::Span::none())
    }
}

impl Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // values may hold secrets
        f.debug_struct("Settings")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_unit() {
        let unit = FnUnit::new(|record, patch| {
            let title = record.get("title").and_then(|v| v.as_text()).unwrap_or("?");
            patch.set("slug", title.to_lowercase());
            Ok(true)
        });

        let record = Record::seed([("title", "Hello")]);
        let mut patch = Patch::new();

        assert!(unit.apply(&record, &mut patch).unwrap());
        assert_eq!(patch.get("slug").and_then(|v| v.as_text()), Some("hello"));
    }

    #[test]
    fn test_settings_require() {
        let mut values = BTreeMap::new();
        values.insert("api_key".to_string(), "s3cr3t".to_string());
        let settings = Settings::new(values, tracing::Span::none());

        assert_eq!(settings.require("api_key").unwrap(), "s3cr3t");
        assert!(settings.require("other").is_err());
        assert!(!format!("{settings:?}").contains("s3cr3t"));
    }
}
