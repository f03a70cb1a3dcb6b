//! Turning resolved descriptors into runnable units.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

use crate::config::ConfigSource;
use crate::descriptor::Descriptor;
use crate::error::BuildError;
use crate::registry::Registry;
use crate::resolver::UnmetInput;
use crate::unit::{Settings, Unit};

/// A unit bound to its descriptor, ready to be executed.
#[derive(Clone)]
pub struct Stage {
    descriptor: Arc<Descriptor>,
    unit: Arc<dyn Unit>,
}

impl Stage {
    pub fn new(descriptor: Arc<Descriptor>, unit: Arc<dyn Unit>) -> Self {
        Self { descriptor, unit }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn input_tags(&self) -> &BTreeSet<String> {
        self.descriptor.input_tags()
    }

    pub fn output_tags(&self) -> &BTreeSet<String> {
        self.descriptor.output_tags()
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    pub(crate) fn unit(&self) -> &dyn Unit {
        self.unit.as_ref()
    }
}

impl Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Stage({})", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// A required configuration key had no value.
    MissingConfig { key: String, label: String },
    /// The factory returned an error.
    Construction(String),
    /// The descriptor does not belong to the registry used for instantiation.
    Unregistered,
}

/// A unit left out of the pipeline, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedUnit {
    pub name: String,
    pub reason: DropReason,
}

/// An input of a surviving unit that nothing upstream can produce any more,
/// because its producer was dropped or is itself cut off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenLink {
    pub unit: String,
    pub tag: String,
}

/// An ordered, immutable list of stages.
///
/// A pipeline holds no per-record state and can be cloned cheaply and shared
/// between threads.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
    dropped: Vec<DroppedUnit>,
    broken: Vec<BrokenLink>,
    unmet: Vec<UnmetInput>,
}

impl Pipeline {
    /// Wraps stages that were assembled by hand. No ordering is checked.
    pub fn from_stages(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            ..Default::default()
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn dropped(&self) -> &[DroppedUnit] {
        &self.dropped
    }

    pub fn broken(&self) -> &[BrokenLink] {
        &self.broken
    }

    /// Inputs that had no eligible producer when the pipeline was resolved.
    /// They have to come from the record itself.
    pub fn unmet(&self) -> &[UnmetInput] {
        &self.unmet
    }

    pub(crate) fn with_unmet(mut self, unmet: Vec<UnmetInput>) -> Self {
        self.unmet = unmet;
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Union of the outputs of every stage that is not cut off by a
    /// [`BrokenLink`].
    pub fn available(&self) -> BTreeSet<&str> {
        self.stages
            .iter()
            .filter(|stage| !self.broken.iter().any(|link| link.unit == stage.name()))
            .flat_map(|stage| stage.output_tags().iter().map(String::as_str))
            .collect()
    }

    /// Checks that the stages that survived instantiation can still reach
    /// every required tag.
    pub fn verify(&self, required: &BTreeSet<String>) -> Result<(), BuildError> {
        let available = self.available();
        let missing: Vec<String> = required
            .iter()
            .filter(|tag| !available.contains(tag.as_str()))
            .cloned()
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        Err(BuildError::Unsatisfied {
            missing,
            dropped: self.dropped.iter().map(|d| d.name.clone()).collect(),
        })
    }

    pub fn into_parts(self) -> (Vec<Stage>, Vec<DroppedUnit>) {
        (self.stages, self.dropped)
    }
}

/// Builds a unit for every descriptor, in order.
///
/// A unit whose configuration cannot be resolved, or whose factory fails, is
/// dropped and recorded in [`Pipeline::dropped`]; the remaining units keep
/// their relative order.
pub fn instantiate(
    registry: &Registry,
    descriptors: &[Arc<Descriptor>],
    config: &dyn ConfigSource,
) -> Pipeline {
    let mut stages = Vec::with_capacity(descriptors.len());
    let mut dropped = Vec::new();

    for descriptor in descriptors {
        match build_stage(registry, descriptor, config) {
            Ok(stage) => stages.push(stage),
            Err(reason) => {
                tracing::warn!(unit = descriptor.name(), ?reason, "dropping unit");
                dropped.push(DroppedUnit {
                    name: descriptor.name().to_string(),
                    reason,
                });
            }
        }
    }

    let broken = find_broken_links(&stages, &dropped, descriptors);
    for link in &broken {
        tracing::warn!(
            unit = link.unit.as_str(),
            tag = link.tag.as_str(),
            "input is no longer produced upstream"
        );
    }

    tracing::info!(
        "built pipeline with {} units, dropped {}",
        stages.len(),
        dropped.len()
    );

    Pipeline {
        stages,
        dropped,
        broken,
        unmet: Vec::new(),
    }
}

/// Builds a pipeline from explicit unit names, in the given order and without
/// any resolution. Unknown names are skipped.
pub fn select<S: AsRef<str>>(
    registry: &Registry,
    names: &[S],
    config: &dyn ConfigSource,
) -> Pipeline {
    let descriptors: Vec<Arc<Descriptor>> = names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            let descriptor = registry.get_by_name(name).cloned();
            if descriptor.is_none() {
                tracing::warn!(unit = name, "selected unit not found, skipping");
            }
            descriptor
        })
        .collect();

    instantiate(registry, &descriptors, config)
}

fn build_stage(
    registry: &Registry,
    descriptor: &Arc<Descriptor>,
    config: &dyn ConfigSource,
) -> Result<Stage, DropReason> {
    let registration = registry
        .index_of(descriptor.name())
        .map(|index| registry.registration(index))
        .ok_or(DropReason::Unregistered)?;

    let mut values = BTreeMap::new();
    for field in descriptor.required_config() {
        let value = config
            .lookup(&field.key)
            .ok_or_else(|| DropReason::MissingConfig {
                key: field.key.clone(),
                label: field.label.clone(),
            })?;
        values.insert(field.key.clone(), value);
    }

    let span = tracing::info_span!("unit", name = descriptor.name());
    let settings = Settings::new(values, span);

    let unit = registration
        .build(&settings)
        .map_err(|e| DropReason::Construction(format!("{e:#}")))?;

    Ok(Stage::new(registration.descriptor().clone(), unit))
}

fn find_broken_links(
    stages: &[Stage],
    dropped: &[DroppedUnit],
    descriptors: &[Arc<Descriptor>],
) -> Vec<BrokenLink> {
    // tags only a dropped or cut off unit would have written
    let mut lost: BTreeSet<&str> = descriptors
        .iter()
        .filter(|d| dropped.iter().any(|dropped| dropped.name == d.name()))
        .flat_map(|d| d.output_tags().iter().map(String::as_str))
        .collect();

    if lost.is_empty() {
        return Vec::new();
    }

    let mut produced: BTreeSet<&str> = BTreeSet::new();
    let mut broken = Vec::new();

    for stage in stages {
        let before = broken.len();

        for tag in stage.input_tags() {
            let tag = tag.as_str();
            if lost.contains(tag) && !produced.contains(tag) && !stage.descriptor.produces(tag) {
                broken.push(BrokenLink {
                    unit: stage.name().to_string(),
                    tag: tag.to_string(),
                });
            }
        }

        let outputs = stage.output_tags().iter().map(String::as_str);
        if broken.len() == before {
            produced.extend(outputs);
        } else {
            lost.extend(outputs);
        }
    }

    broken
}
