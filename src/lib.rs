//! Capability-driven enrichment pipelines for tag records.
//!
//! Units declare which tags they read and which they write. Given the tags a
//! caller wants, the [`Resolver`] picks the units that can produce them and
//! orders them so every producer runs before its consumers. The
//! [`instantiator`] turns that order into a runnable [`Pipeline`], dropping
//! units that lack configuration, and the [`executor`] applies the pipeline to
//! a [`Record`], skipping work that is already done and carrying on past
//! failing units.
//!
//! ```no_run
//! use tagline::{Descriptor, Enricher, Record, Registry, Request};
//! use std::collections::HashMap;
//!
//! let registry = Registry::builder()
//!     .register_fn(Descriptor::new("Fingerprint").outputs(["acoustid"]), |_, patch| {
//!         patch.set("acoustid", "3f8a");
//!         Ok(true)
//!     })
//!     .register_fn(
//!         Descriptor::new("Lookup").inputs(["acoustid"]).outputs(["title"]),
//!         |_, patch| {
//!             patch.set("title", "Song");
//!             Ok(true)
//!         },
//!     )
//!     .finish()?;
//!
//! let enricher = Enricher::new(registry);
//! let pipeline = enricher.build(&Request::new(["title"]), &HashMap::<String, String>::new())?;
//! let record = enricher.execute(Record::new(), &pipeline, false);
//! assert!(record.missing(["title"]).is_empty());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
#![forbid(unsafe_code)]

mod config;
mod descriptor;
mod error;
pub mod executor;
pub mod instantiator;
mod record;
mod registry;
mod resolver;
mod unit;
mod utils;

use std::sync::Arc;

pub use crate::config::{ConfigSource, EnvSource, FileSource, Layered};
pub use crate::descriptor::{ConfigField, ConfigKind, Descriptor, DescriptorInfo};
pub use crate::error::*;
pub use crate::executor::{Diagnostics, Outcome, Run, UnitRun};
pub use crate::instantiator::{BrokenLink, DropReason, DroppedUnit, Pipeline, Stage};
pub use crate::record::{Patch, Record, Value};
pub use crate::registry::{Factory, Registration, Registry, RegistryBuilder, RegistryCell};
pub use crate::resolver::{Request, Resolution, Resolver, UnmetInput};
pub use crate::unit::{FnUnit, Settings, Unit};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;

/// Entry point tying the registry, resolver, instantiator and executor
/// together.
///
/// Cloning is cheap, the registry is shared.
#[derive(Debug, Clone)]
pub struct Enricher {
    registry: Arc<Registry>,
}

impl Enricher {
    pub fn new(registry: impl Into<Arc<Registry>>) -> Self {
        Self {
            registry: registry.into(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Every known unit, for display in a UI or CLI.
    pub fn list_descriptors(&self) -> Vec<DescriptorInfo> {
        self.registry.list_descriptors()
    }

    /// Computes the ordered set of units needed for `request`, without
    /// building any of them.
    pub fn resolve(&self, request: &Request) -> Result<Resolution, ResolveError> {
        Resolver::new(&self.registry).resolve(request)
    }

    /// Resolves `request` and builds a runnable pipeline.
    ///
    /// Units whose configuration is incomplete are dropped. If the surviving
    /// units can no longer reach every required tag, directly or through a
    /// chain, the build fails with [`BuildError::Unsatisfied`]. Inputs nobody
    /// produces are kept on the pipeline as [`Pipeline::unmet`].
    pub fn build(
        &self,
        request: &Request,
        config: &dyn ConfigSource,
    ) -> Result<Pipeline, BuildError> {
        let resolution = self.resolve(request)?;
        let pipeline =
            instantiator::instantiate(&self.registry, resolution.descriptors(), config)
                .with_unmet(resolution.unmet().to_vec());

        pipeline.verify(resolution.required())?;
        Ok(pipeline)
    }

    /// Builds a pipeline from explicit unit names in the given order, with no
    /// resolution.
    pub fn select<S: AsRef<str>>(&self, names: &[S], config: &dyn ConfigSource) -> Pipeline {
        instantiator::select(&self.registry, names, config)
    }

    pub fn execute(&self, record: Record, pipeline: &Pipeline, force: bool) -> Record {
        executor::execute(record, pipeline, force)
    }

    pub fn run(&self, record: Record, pipeline: &Pipeline, force: bool) -> Run {
        executor::run(record, pipeline, force)
    }

    pub fn execute_batch(&self, records: Vec<Record>, pipeline: &Pipeline, force: bool) -> Vec<Run> {
        executor::execute_batch(records, pipeline, force)
    }
}
