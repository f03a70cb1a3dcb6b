//! The attribute bag enriched by a pipeline run.
//!
//! A [`Record`] holds two maps. `values` is everything known about the item,
//! including intermediate tags such as lookup identifiers. `persisted` is the
//! subset worth writing back, and only grows through [`Record::merge`] when the
//! writing unit declared the tag as one of its outputs. `persisted` is always a
//! subset of `values`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A single tag value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Plain text, the common case.
    Text(String),
    /// Multi-valued tag, e.g. several artists.
    List(Vec<String>),
    /// Binary payload such as embedded cover art.
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::List(list) => list.first().map(String::as_str),
            Value::Bytes(_) => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::List(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

/// The item being enriched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    values: BTreeMap<String, Value>,
    persisted: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record with known attributes that are not meant to be
    /// written back unless a unit produces them again.
    pub fn seed<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            persisted: BTreeMap::new(),
        }
    }

    /// Creates a record from attributes read back from storage. They are
    /// seeded into both maps, so a later write preserves them.
    pub fn restore<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let values: BTreeMap<String, Value> = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Self {
            persisted: values.clone(),
            values,
        }
    }

    pub fn get(&self, tag: &str) -> Option<&Value> {
        self.values.get(tag)
    }

    pub fn has(&self, tag: &str) -> bool {
        self.values.contains_key(tag)
    }

    /// Sets a value without marking it for persistence. Units write through a
    /// [`Patch`] instead.
    pub fn set(&mut self, tag: impl Into<String>, value: impl Into<Value>) {
        let tag = tag.into();
        let value = value.into();

        // keep the persisted copy in sync with the bag
        if let Some(slot) = self.persisted.get_mut(&tag) {
            *slot = value.clone();
        }

        self.values.insert(tag, value);
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn persisted(&self) -> &BTreeMap<String, Value> {
        &self.persisted
    }

    pub fn has_all<'a>(&self, tags: impl IntoIterator<Item = &'a String>) -> bool {
        tags.into_iter().all(|tag| self.has(tag))
    }

    /// Requested tags still absent from the record.
    pub fn missing<'a, I>(&self, tags: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tags.into_iter()
            .filter(|tag| !self.has(tag))
            .map(str::to_string)
            .collect()
    }

    /// Applies a unit's writes. Every written tag lands in `values`; only the
    /// ones listed in `outputs` are copied to `persisted`.
    ///
    /// Returns the tags that were written.
    pub fn merge(&mut self, outputs: &BTreeSet<String>, patch: Patch) -> Vec<String> {
        let mut written = Vec::with_capacity(patch.writes.len());

        for (tag, value) in patch.writes {
            if outputs.contains(&tag) {
                self.persisted.insert(tag.clone(), value.clone());
            }
            self.values.insert(tag.clone(), value);
            written.push(tag);
        }

        written
    }
}

/// Pending writes produced by a single unit invocation.
///
/// The executor merges a patch into the record only after the unit returns,
/// so a unit that errors out leaves the record untouched.
#[derive(Debug, Default)]
pub struct Patch {
    writes: BTreeMap<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, tag: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.writes.insert(tag.into(), value.into());
        self
    }

    pub fn get(&self, tag: &str) -> Option<&Value> {
        self.writes.get(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_merge_persists_declared_outputs_only() {
        let mut record = Record::new();
        let mut patch = Patch::new();
        patch.set("title", "Song").set("mb_score", "0.93");

        let written = record.merge(&outputs(&["title"]), patch);

        assert_eq!(written, vec!["mb_score".to_string(), "title".to_string()]);
        assert!(record.has("title"));
        assert!(record.has("mb_score"));
        assert!(record.persisted().contains_key("title"));
        assert!(!record.persisted().contains_key("mb_score"));
    }

    #[test]
    fn test_persisted_is_subset_of_values() {
        let mut record = Record::restore([("artist", "A")]);
        let mut patch = Patch::new();
        patch.set("artist", "B").set("album", "C");
        record.merge(&outputs(&["artist", "album"]), patch);
        record.set("scratch", "x");

        for (tag, value) in record.persisted() {
            assert_eq!(record.get(tag), Some(value));
        }
        assert_eq!(record.get("artist"), Some(&Value::from("B")));
    }

    #[test]
    fn test_seed_does_not_persist() {
        let record = Record::seed([("artist", "A"), ("title", "T")]);
        assert!(record.has("artist"));
        assert!(record.persisted().is_empty());
    }

    #[test]
    fn test_set_updates_persisted_copy() {
        let mut record = Record::restore([("title", "Old")]);
        record.set("title", "New");
        assert_eq!(record.persisted()["title"], Value::from("New"));
    }

    #[test]
    fn test_missing() {
        let record = Record::seed([("artist", "A")]);
        assert_eq!(record.missing(["artist", "lyrics"]), vec!["lyrics"]);
    }

    #[test]
    fn test_value_text() {
        assert_eq!(Value::from("a").as_text(), Some("a"));
        assert_eq!(
            Value::from(vec!["x".to_string(), "y".to_string()]).as_text(),
            Some("x")
        );
        assert_eq!(Value::from(vec![1u8, 2]).as_text(), None);
    }

    #[test]
    fn test_value_json_shape() {
        let record = Record::seed([("artist", "A")]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"values":{"artist":"A"},"persisted":{}}"#);
    }
}
