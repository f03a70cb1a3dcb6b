//! The table of available units.
//!
//! Units are registered explicitly, as a list of [`Registration`]s assembled
//! by code, and indexed once by [`Registry::discover`]. After that the
//! registry is never mutated, so it can be shared by reference between any
//! number of concurrent resolutions.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, OnceLock};

use crate::descriptor::{Descriptor, DescriptorInfo};
use crate::error::RegistryError;
use crate::record::{Patch, Record};
use crate::unit::{FnUnit, Settings, Unit};

/// Builds a unit from its resolved configuration.
pub type Factory = Arc<dyn Fn(&Settings) -> anyhow::Result<Arc<dyn Unit>> + Send + Sync>;

/// A descriptor paired with the factory that builds its unit.
#[derive(Clone)]
pub struct Registration {
    descriptor: Arc<Descriptor>,
    factory: Factory,
}

impl Registration {
    pub fn new<F, U>(descriptor: Descriptor, factory: F) -> Self
    where
        F: Fn(&Settings) -> anyhow::Result<U> + Send + Sync + 'static,
        U: Unit + 'static,
    {
        Self {
            descriptor: Arc::new(descriptor),
            factory: Arc::new(
                move |settings: &Settings| -> anyhow::Result<Arc<dyn Unit>> {
                    Ok(Arc::new(factory(settings)?))
                },
            ),
        }
    }

    /// Registers a stateless unit that ignores its configuration.
    pub fn from_fn<F>(descriptor: Descriptor, callback: F) -> Self
    where
        F: Fn(&Record, &mut Patch) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let unit = FnUnit::new(callback);
        Self::new(descriptor, move |_| Ok(unit.clone()))
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    pub(crate) fn build(&self, settings: &Settings) -> anyhow::Result<Arc<dyn Unit>> {
        (self.factory)(settings)
    }
}

impl Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Registration({})", self.descriptor.name())
    }
}

/// Indexed, immutable set of registrations.
///
/// Positions in discovery order double as stable identifiers: whenever several
/// units qualify for the same role, the one registered first comes first.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Registration>,
    by_name: HashMap<String, usize>,
    by_output: HashMap<String, Vec<usize>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Indexes the given registrations by name and by output tag.
    pub fn discover(
        entries: impl IntoIterator<Item = Registration>,
    ) -> Result<Self, RegistryError> {
        let entries: Vec<Registration> = entries.into_iter().collect();
        let mut by_name = HashMap::with_capacity(entries.len());
        let mut by_output: HashMap<String, Vec<usize>> = HashMap::new();

        for (index, entry) in entries.iter().enumerate() {
            let name = entry.descriptor.name();

            if by_name.insert(name.to_string(), index).is_some() {
                return Err(RegistryError::Duplicate(name.to_string()));
            }

            for tag in entry.descriptor.output_tags() {
                by_output.entry(tag.clone()).or_default().push(index);
            }

            tracing::debug!(unit = name, "registered unit");
        }

        tracing::info!("loaded {} units", entries.len());

        Ok(Self {
            entries,
            by_name,
            by_output,
        })
    }

    /// Exact, case-sensitive lookup.
    pub fn get_by_name(&self, name: &str) -> Option<&Arc<Descriptor>> {
        self.index_of(name).map(|index| self.descriptor(index))
    }

    /// All descriptors producing `tag`, in discovery order.
    pub fn get_by_output_tag(&self, tag: &str) -> Vec<&Arc<Descriptor>> {
        self.providers(tag)
            .iter()
            .map(|&index| self.descriptor(index))
            .collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<Descriptor>> {
        self.entries.iter().map(|entry| &entry.descriptor)
    }

    pub fn list_descriptors(&self) -> Vec<DescriptorInfo> {
        self.all().map(|descriptor| descriptor.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn descriptor(&self, index: usize) -> &Arc<Descriptor> {
        &self.entries[index].descriptor
    }

    pub(crate) fn registration(&self, index: usize) -> &Registration {
        &self.entries[index]
    }

    pub(crate) fn providers(&self, tag: &str) -> &[usize] {
        self.by_output.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Collects registrations before they are indexed.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<Registration>,
}

impl RegistryBuilder {
    pub fn register(mut self, registration: Registration) -> Self {
        self.entries.push(registration);
        self
    }

    pub fn register_fn<F>(self, descriptor: Descriptor, callback: F) -> Self
    where
        F: Fn(&Record, &mut Patch) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.register(Registration::from_fn(descriptor, callback))
    }

    pub fn finish(self) -> Result<Registry, RegistryError> {
        Registry::discover(self.entries)
    }
}

/// A registry initialized at most once, usable from a `static`.
///
/// The first call to [`RegistryCell::get_or_discover`] runs discovery; every
/// later call returns the same result without invoking the closure again.
#[derive(Debug, Default)]
pub struct RegistryCell {
    cell: OnceLock<Result<Registry, RegistryError>>,
}

impl RegistryCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get_or_discover<F, I>(&self, entries: F) -> Result<&Registry, RegistryError>
    where
        F: FnOnce() -> I,
        I: IntoIterator<Item = Registration>,
    {
        self.cell
            .get_or_init(|| Registry::discover(entries()))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn get(&self) -> Option<&Registry> {
        self.cell.get().and_then(|result| result.as_ref().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str, inputs: &[&str], outputs: &[&str]) -> Registration {
        Registration::from_fn(
            Descriptor::new(name)
                .inputs(inputs.iter().copied())
                .outputs(outputs.iter().copied()),
            |_, _| Ok(true),
        )
    }

    #[test]
    fn test_lookup_by_name() {
        let registry = Registry::discover([noop("A", &[], &["x"])]).unwrap();

        assert_eq!(registry.get_by_name("A").unwrap().name(), "A");
        assert!(registry.get_by_name("a").is_none());
        assert!(registry.get_by_name("B").is_none());
    }

    #[test]
    fn test_lookup_by_output_keeps_discovery_order() {
        let registry = Registry::builder()
            .register(noop("Genius", &["artist", "title"], &["lyrics"]))
            .register(noop("Cover", &["album_id"], &["cover"]))
            .register(noop("Lrclib", &["artist", "title"], &["lyrics", "syncedlyrics"]))
            .finish()
            .unwrap();

        let names: Vec<_> = registry
            .get_by_output_tag("lyrics")
            .iter()
            .map(|d| d.name())
            .collect();

        assert_eq!(names, vec!["Genius", "Lrclib"]);
        assert!(registry.get_by_output_tag("nothing").is_empty());
    }

    #[test]
    fn test_duplicate_name() {
        let err = Registry::discover([noop("A", &[], &["x"]), noop("A", &[], &["y"])]).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("A".into()));
    }

    #[test]
    fn test_list_descriptors() {
        let registry = Registry::discover([noop("A", &[], &["x"]), noop("B", &["x"], &["y"])])
            .unwrap();
        let names: Vec<_> = registry
            .list_descriptors()
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_cell_discovers_once() {
        static CELL: RegistryCell = RegistryCell::new();

        let first = CELL.get_or_discover(|| vec![noop("A", &[], &["x"])]).unwrap();
        assert_eq!(first.len(), 1);

        let second = CELL
            .get_or_discover(|| -> Vec<Registration> { panic!("discovery ran twice") })
            .unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(CELL.get().is_some());
    }
}
