use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// How a configuration value is meant to be presented and handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    Text,
    /// Never logged.
    Secret,
    Path,
    Flag,
}

/// A configuration entry a unit needs before it can be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigField {
    pub key: String,
    pub label: String,
    pub kind: ConfigKind,
}

impl ConfigField {
    pub fn new(key: impl Into<String>, label: impl Into<String>, kind: ConfigKind) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            kind,
        }
    }
}

/// Static declaration of a processing unit.
///
/// A descriptor names the tags the unit reads and the tags it writes, which is
/// all the resolver needs to place it in a pipeline. A unit without input tags
/// is considered runnable on any record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    name: String,
    description: Option<String>,
    input_tags: BTreeSet<String>,
    output_tags: BTreeSet<String>,
    required_config: Vec<ConfigField>,
}

impl Descriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_tags: BTreeSet::new(),
            output_tags: BTreeSet::new(),
            required_config: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn inputs<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn outputs<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn config(mut self, field: ConfigField) -> Self {
        self.required_config.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn input_tags(&self) -> &BTreeSet<String> {
        &self.input_tags
    }

    pub fn output_tags(&self) -> &BTreeSet<String> {
        &self.output_tags
    }

    pub fn required_config(&self) -> &[ConfigField] {
        &self.required_config
    }

    pub fn produces(&self, tag: &str) -> bool {
        self.output_tags.contains(tag)
    }

    pub fn consumes(&self, tag: &str) -> bool {
        self.input_tags.contains(tag)
    }

    pub fn info(&self) -> DescriptorInfo {
        DescriptorInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_tags: self.input_tags.iter().cloned().collect(),
            output_tags: self.output_tags.iter().cloned().collect(),
            required_config: self.required_config.clone(),
        }
    }
}

/// Serializable view of a [`Descriptor`], used to list the available units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    pub input_tags: Vec<String>,
    pub output_tags: Vec<String>,
    pub required_config: Vec<ConfigField>,
}

impl DescriptorInfo {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
