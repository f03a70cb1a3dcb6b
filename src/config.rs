//! Where units get their configuration from.
//!
//! A [`ConfigSource`] is a plain key lookup. Empty values are treated the same
//! as missing ones, so `API_KEY=` in the environment does not count as a key.

use std::collections::{BTreeMap, HashMap};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::ConfigError;

pub trait ConfigSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

impl ConfigSource for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        non_empty(self.get(key))
    }
}

impl ConfigSource for BTreeMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        non_empty(self.get(key))
    }
}

impl<T: ConfigSource + ?Sized> ConfigSource for &T {
    fn lookup(&self, key: &str) -> Option<String> {
        (**self).lookup(key)
    }
}

impl<T: ConfigSource + ?Sized> ConfigSource for Box<T> {
    fn lookup(&self, key: &str) -> Option<String> {
        (**self).lookup(key)
    }
}

/// Reads the process environment, optionally under a key prefix.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefix: Option<String>,
}

impl EnvSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// `EnvSource::prefixed("TAGLINE_")` resolves `api_key` from
    /// `TAGLINE_api_key`.
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl ConfigSource for EnvSource {
    fn lookup(&self, key: &str) -> Option<String> {
        let name = match &self.prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        };

        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// A flat JSON object loaded from disk.
///
/// Numbers and booleans are accepted and kept in their JSON spelling, nested
/// arrays and objects are rejected. `null` is treated as absent.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    path: Utf8PathBuf,
    values: BTreeMap<String, String>,
}

impl FileSource {
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_owned();
        let text = fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
        let source = Self::parse(path, &text)?;

        tracing::debug!("loaded {} config keys from {}", source.values.len(), source.path);
        Ok(source)
    }

    fn parse(path: Utf8PathBuf, text: &str) -> Result<Self, ConfigError> {
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(path.clone(), e))?;

        let serde_json::Value::Object(object) = json else {
            return Err(ConfigError::NotAnObject(path));
        };

        let mut values = BTreeMap::new();
        for (key, value) in object {
            let value = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(text) => text,
                serde_json::Value::Bool(flag) => flag.to_string(),
                serde_json::Value::Number(number) => number.to_string(),
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    return Err(ConfigError::Nested(path, key));
                }
            };
            values.insert(key, value);
        }

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl ConfigSource for FileSource {
    fn lookup(&self, key: &str) -> Option<String> {
        non_empty(self.values.get(key))
    }
}

/// Several sources consulted in order; the first one with a value wins.
#[derive(Default)]
pub struct Layered {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl Layered {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl ConfigSource + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }
}

impl ConfigSource for Layered {
    fn lookup(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.lookup(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_is_absent() {
        let source = map(&[("key", ""), ("other", "x")]);
        assert_eq!(source.lookup("key"), None);
        assert_eq!(source.lookup("other").as_deref(), Some("x"));
        assert_eq!(source.lookup("missing"), None);
    }

    #[test]
    fn test_layered_first_hit_wins() {
        let layered = Layered::new()
            .with(map(&[("a", "file"), ("b", "")]))
            .with(map(&[("a", "env"), ("b", "env"), ("c", "env")]));

        assert_eq!(layered.lookup("a").as_deref(), Some("file"));
        assert_eq!(layered.lookup("b").as_deref(), Some("env"));
        assert_eq!(layered.lookup("c").as_deref(), Some("env"));
        assert_eq!(layered.lookup("d"), None);
    }

    #[test]
    fn test_file_source_parse() {
        let source = FileSource::parse(
            "config.json".into(),
            r#"{"api_key": "abc", "retries": 3, "verbose": true, "unset": null}"#,
        )
        .unwrap();

        assert_eq!(source.lookup("api_key").as_deref(), Some("abc"));
        assert_eq!(source.lookup("retries").as_deref(), Some("3"));
        assert_eq!(source.lookup("verbose").as_deref(), Some("true"));
        assert_eq!(source.lookup("unset"), None);
    }

    #[test]
    fn test_file_source_rejects_nested() {
        let err = FileSource::parse("c.json".into(), r#"{"a": {"b": 1}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Nested(_, key) if key == "a"));

        let err = FileSource::parse("c.json".into(), r#"[1, 2]"#).unwrap_err();
        assert!(matches!(err, ConfigError::NotAnObject(_)));

        let err = FileSource::parse("c.json".into(), "{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(..)));
    }

    #[test]
    fn test_file_source_missing_file() {
        let err = FileSource::load("/nonexistent/tagline/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read(..)));
    }

    #[test]
    fn test_env_source() {
        let source = EnvSource::prefixed("TAGLINE_TEST_DEFINITELY_UNSET_");
        assert_eq!(source.lookup("KEY"), None);

        // PATH is set in every sane test environment
        assert!(EnvSource::new().lookup("PATH").is_some());
    }
}
