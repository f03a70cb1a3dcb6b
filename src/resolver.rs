//! Selecting and ordering units for a set of requested tags.
//!
//! Resolution runs in four steps:
//!
//! 1. **Seeding**: every explicitly included unit, plus every non-excluded
//!    unit producing one of the requested tags.
//! 2. **Expansion**: units with inputs nobody in the selection produces pull
//!    in all non-excluded producers of those inputs, until a full pass adds
//!    nothing. Inputs without any producer are reported but do not stop the
//!    build, since a record may already carry them.
//! 3. **Satisfiability**: the requested tags must be among the outputs of the
//!    selection.
//! 4. **Ordering**: the selection is wired into a dependency graph (producer
//!    to consumer) and sorted depth first. Revisiting a unit that is still on
//!    the stack means the graph has a cycle.
//!
//! Units are identified by their position in the [`Registry`], which makes
//! discovery order the tie-breaker everywhere: independent units come out in
//! the order they were registered, and rebuilding with the same inputs always
//! yields the same pipeline.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::descriptor::Descriptor;
use crate::error::ResolveError;
use crate::registry::Registry;

/// What the caller wants out of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    required: BTreeSet<String>,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl Request {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Units that must be part of the pipeline whether or not they are
    /// needed. Inclusion wins over exclusion.
    pub fn include<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(names.into_iter().map(Into::into));
        self
    }

    /// Units that must never be pulled in as a provider.
    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }
}

/// An input tag of a selected unit that no eligible unit produces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnmetInput {
    pub unit: String,
    pub tag: String,
}

/// A dependency-ordered list of descriptors.
#[derive(Debug, Clone)]
pub struct Resolution {
    order: Vec<Arc<Descriptor>>,
    required: BTreeSet<String>,
    available: BTreeSet<String>,
    unmet: Vec<UnmetInput>,
}

impl Resolution {
    /// Descriptors with every producer ahead of its consumers.
    pub fn descriptors(&self) -> &[Arc<Descriptor>] {
        &self.order
    }

    pub fn into_descriptors(self) -> Vec<Arc<Descriptor>> {
        self.order
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|d| d.name()).collect()
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// Union of the output tags of all selected units.
    pub fn available(&self) -> &BTreeSet<String> {
        &self.available
    }

    pub fn unmet(&self) -> &[UnmetInput] {
        &self.unmet
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Renders the selected units as a mermaid flowchart. Edges are labelled with
/// the tags flowing from producer to consumer.
impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for (index, descriptor) in self.order.iter().enumerate() {
            let name = descriptor.name().replace('"', "\\\"");
            writeln!(f, "    {index}[\"{name}\"]")?;

            if descriptor
                .output_tags()
                .iter()
                .any(|tag| self.required.contains(tag))
            {
                writeln!(f, "    {index} --> Output")?;
            }
        }

        writeln!(f, "    Output[Output]")?;

        for (target, consumer) in self.order.iter().enumerate() {
            for (source, producer) in self.order.iter().enumerate().take(target) {
                let tags: Vec<&str> = producer
                    .output_tags()
                    .intersection(consumer.input_tags())
                    .map(String::as_str)
                    .collect();

                if !tags.is_empty() {
                    writeln!(f, "    {source} -- \"{}\" --> {target}", tags.join(", "))?;
                }
            }
        }

        Ok(())
    }
}

/// Builds resolutions against a fixed registry.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    registry: &'a Registry,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Shorthand for [`Resolver::resolve`] with plain lists.
    pub fn build<R, I, E>(
        &self,
        required: &[R],
        include: Option<&[I]>,
        exclude: Option<&[E]>,
    ) -> Result<Resolution, ResolveError>
    where
        R: AsRef<str>,
        I: AsRef<str>,
        E: AsRef<str>,
    {
        fn as_strings<S: AsRef<str>>(names: Option<&[S]>) -> Vec<String> {
            names
                .unwrap_or_default()
                .iter()
                .map(|s| s.as_ref().to_string())
                .collect()
        }

        let request = Request::new(required.iter().map(|s| s.as_ref().to_string()))
            .include(as_strings(include))
            .exclude(as_strings(exclude));

        self.resolve(&request)
    }

    pub fn resolve(&self, request: &Request) -> Result<Resolution, ResolveError> {
        let registry = self.registry;

        let included = self.lookup(&request.include, "included");
        let excluded: HashSet<usize> = self.lookup(&request.exclude, "excluded").into_iter().collect();

        // seeding
        let mut selected: BTreeSet<usize> = included.into_iter().collect();

        for tag in &request.required {
            selected.extend(
                registry
                    .providers(tag)
                    .iter()
                    .copied()
                    .filter(|index| !excluded.contains(index)),
            );
        }

        let produces_any = |selected: &BTreeSet<usize>| {
            request.required.iter().any(|tag| {
                selected
                    .iter()
                    .any(|&index| registry.descriptor(index).produces(tag))
            })
        };

        if !request.required.is_empty() && !produces_any(&selected) {
            let tag = request.required.iter().next().cloned().unwrap_or_default();
            tracing::error!(tag = tag.as_str(), "no unit produces any of the required outputs");
            return Err(ResolveError::NoProviderFound(tag));
        }

        let mut available: BTreeSet<String> = selected
            .iter()
            .flat_map(|&index| registry.descriptor(index).output_tags().iter().cloned())
            .collect();

        let unmet = self.expand(&mut selected, &mut available, &excluded);

        let missing: Vec<String> = request.required.difference(&available).cloned().collect();
        if !missing.is_empty() {
            tracing::error!("cannot satisfy required outputs: {}", missing.join(", "));
            return Err(ResolveError::UnsatisfiedOutputs(missing));
        }

        let graph = DependencyGraph::new(registry, &selected);
        let order: Vec<Arc<Descriptor>> = graph
            .sort(registry)?
            .into_iter()
            .map(|index| registry.descriptor(index).clone())
            .collect();

        tracing::info!(
            "resolved pipeline with {} units: {}",
            order.len(),
            order.iter().map(|d| d.name()).collect::<Vec<_>>().join(", ")
        );

        Ok(Resolution {
            order,
            required: request.required.clone(),
            available,
            unmet,
        })
    }

    fn lookup(&self, names: &[String], role: &str) -> Vec<usize> {
        names
            .iter()
            .filter_map(|name| {
                let index = self.registry.index_of(name);
                if index.is_none() {
                    tracing::warn!(unit = name.as_str(), "{role} unit not found, ignoring");
                }
                index
            })
            .collect()
    }

    /// Grows the selection until every input is either available or has no
    /// eligible producer at all. Returns the latter.
    fn expand(
        &self,
        selected: &mut BTreeSet<usize>,
        available: &mut BTreeSet<String>,
        excluded: &HashSet<usize>,
    ) -> Vec<UnmetInput> {
        let registry = self.registry;
        let mut unmet = BTreeSet::new();

        loop {
            let mut added = false;

            for index in selected.clone() {
                let descriptor = registry.descriptor(index);

                for tag in descriptor.input_tags() {
                    if available.contains(tag) {
                        continue;
                    }

                    let providers: Vec<usize> = registry
                        .providers(tag)
                        .iter()
                        .copied()
                        .filter(|provider| !excluded.contains(provider))
                        .collect();

                    if providers.is_empty() {
                        let entry = UnmetInput {
                            unit: descriptor.name().to_string(),
                            tag: tag.clone(),
                        };
                        if unmet.insert(entry) {
                            tracing::warn!(
                                unit = descriptor.name(),
                                tag = tag.as_str(),
                                "no unit produces input tag"
                            );
                        }
                        continue;
                    }

                    for provider in providers {
                        if selected.insert(provider) {
                            let provider = registry.descriptor(provider);
                            tracing::debug!(
                                unit = provider.name(),
                                tag = tag.as_str(),
                                "pulled in provider"
                            );
                            available.extend(provider.output_tags().iter().cloned());
                            added = true;
                        }
                    }
                }
            }

            if !added {
                break;
            }
        }

        unmet.into_iter().collect()
    }
}

/// Producer-to-consumer edges between selected units. Node weights are
/// registry positions.
pub(crate) struct DependencyGraph {
    graph: Graph<usize, ()>,
}

impl DependencyGraph {
    pub(crate) fn new(registry: &Registry, selected: &BTreeSet<usize>) -> Self {
        let mut graph = Graph::with_capacity(selected.len(), selected.len());
        let nodes: HashMap<usize, NodeIndex> = selected
            .iter()
            .map(|&index| (index, graph.add_node(index)))
            .collect();

        for (&consumer, &target) in &nodes {
            for tag in registry.descriptor(consumer).input_tags() {
                for producer in registry.providers(tag) {
                    // a unit refining its own input is not a cycle
                    if *producer == consumer {
                        continue;
                    }
                    if let Some(&source) = nodes.get(producer) {
                        graph.update_edge(source, target, ());
                    }
                }
            }
        }

        Self { graph }
    }

    /// Depth-first topological sort, dependencies first.
    pub(crate) fn sort(&self, registry: &Registry) -> Result<Vec<usize>, ResolveError> {
        let mut roots: Vec<NodeIndex> = self.graph.node_indices().collect();
        roots.sort_by_key(|&node| self.graph[node]);

        let mut state = SortState::default();

        for node in roots {
            self.visit(node, registry, &mut state)?;
        }

        Ok(state.sorted)
    }

    /// Walks the dependencies of `root` with an explicit stack, so chain
    /// length is not bounded by the thread stack.
    fn visit(
        &self,
        root: NodeIndex,
        registry: &Registry,
        state: &mut SortState,
    ) -> Result<(), ResolveError> {
        if state.visited.contains(&root) {
            return Ok(());
        }

        let mut stack = vec![self.enter(root, registry, state)?];

        while let Some(frame) = stack.last_mut() {
            let node = frame.node;

            match frame.pending.pop() {
                Some(dependency) => {
                    if !state.visited.contains(&dependency) {
                        let frame = self.enter(dependency, registry, state)?;
                        stack.push(frame);
                    }
                }
                None => {
                    stack.pop();
                    state.in_progress.remove(&node);
                    state.visited.insert(node);
                    state.sorted.push(self.graph[node]);
                }
            }
        }

        Ok(())
    }

    fn enter(
        &self,
        node: NodeIndex,
        registry: &Registry,
        state: &mut SortState,
    ) -> Result<Frame, ResolveError> {
        if !state.in_progress.insert(node) {
            let name = registry.descriptor(self.graph[node]).name();
            tracing::error!(unit = name, "cyclic dependency detected");
            return Err(ResolveError::CyclicDependency(name.to_string()));
        }

        // popped from the back, so lowest registry position comes out first
        let mut pending: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        pending.sort_by_key(|&dep| std::cmp::Reverse(self.graph[dep]));

        Ok(Frame { node, pending })
    }
}

struct Frame {
    node: NodeIndex,
    pending: Vec<NodeIndex>,
}

#[derive(Default)]
struct SortState {
    visited: HashSet<NodeIndex>,
    in_progress: HashSet<NodeIndex>,
    sorted: Vec<usize>,
}
