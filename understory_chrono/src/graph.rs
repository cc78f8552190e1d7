// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dependency graph derived from recorded quark dependencies.

use crate::error::ChronoError;
use crate::identifier::Identifier;
use crate::walk::{OnCycle, WalkDepth, WalkDirection, WalkOutcome, WalkSource, WalkVisitor};

/// "A depends on B" edges between identifiers.
///
/// `DependencyGraph` stores both directions, so "what does A read?" and "what
/// reads A?" are both answered without a scan. A checkout keeps one graph in
/// sync with its materialized quarks: every committed quark replaces the
/// dependency list of its identifier.
///
/// Edges are kept in insertion order, which makes walks over the graph
/// deterministic.
///
/// # Example
///
/// ```
/// use understory_chrono::Checkout;
///
/// let mut checkout = Checkout::<i32>::new();
/// let a = checkout.variable(1);
/// let b = checkout.identifier(move |ctx| Ok(ctx.read(a)? + 1));
/// let c = checkout.identifier(move |ctx| Ok(ctx.read(b)? * 2));
/// checkout.propagate().unwrap();
///
/// let graph = checkout.graph();
/// assert!(graph.dependencies(b).any(|dep| dep == a.id()));
/// assert!(graph.dependents(a.id()).any(|dep| dep == b));
/// assert_eq!(graph.transitive_dependents(a.id()), [b, c]);
/// ```
///
/// # See Also
///
/// - [`WalkDepth`]: The walker behind the query helpers.
/// - [`Checkout::graph`](crate::Checkout::graph): The graph a checkout maintains.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// forward[id] -> identifiers that `id` depends on.
    forward: Vec<Vec<Identifier>>,
    /// reverse[id] -> identifiers that depend on `id`.
    reverse: Vec<Vec<Identifier>>,
}

#[inline]
fn grow<T: Default>(vec: &mut Vec<T>, idx: usize) {
    if idx >= vec.len() {
        vec.resize_with(idx + 1, T::default);
    }
}

#[inline]
fn edges(lists: &[Vec<Identifier>], key: Identifier) -> &[Identifier] {
    lists.get(key.as_usize()).map_or(&[], Vec::as_slice)
}

fn remove_edge(lists: &mut [Vec<Identifier>], key: Identifier, edge: Identifier) -> bool {
    let Some(list) = lists.get_mut(key.as_usize()) else {
        return false;
    };
    match list.iter().position(|&k| k == edge) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the graph has no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.iter().all(Vec::is_empty)
    }

    /// Adds an edge: `from` depends on `to`.
    ///
    /// Returns `false` if the edge already existed. Cycles are not rejected
    /// here; they surface as [`ChronoError::CyclicDependency`] when walked.
    pub fn add_dependency(&mut self, from: Identifier, to: Identifier) -> bool {
        grow(&mut self.forward, from.as_usize());
        let deps = &mut self.forward[from.as_usize()];
        if deps.contains(&to) {
            return false;
        }
        deps.push(to);

        grow(&mut self.reverse, to.as_usize());
        self.reverse[to.as_usize()].push(from);
        true
    }

    /// Removes the edge `from -> to`.
    ///
    /// Returns `true` if the edge existed.
    pub fn remove_dependency(&mut self, from: Identifier, to: Identifier) -> bool {
        if !remove_edge(&mut self.forward, from, to) {
            return false;
        }
        remove_edge(&mut self.reverse, to, from);
        true
    }

    /// Replaces all direct dependencies of `from`.
    ///
    /// Duplicates in `to` are ignored. Returns `true` if the dependency set
    /// changed; a reordering of the same set is not a change.
    pub fn replace_dependencies(
        &mut self,
        from: Identifier,
        to: impl IntoIterator<Item = Identifier>,
    ) -> bool {
        let mut new_set: Vec<Identifier> = Vec::new();
        for k in to {
            if !new_set.contains(&k) {
                new_set.push(k);
            }
        }

        let old = edges(&self.forward, from);
        if old.len() == new_set.len() && old.iter().all(|dep| new_set.contains(dep)) {
            return false;
        }

        let stale: Vec<Identifier> = old
            .iter()
            .copied()
            .filter(|dep| !new_set.contains(dep))
            .collect();
        for dep in stale {
            self.remove_dependency(from, dep);
        }
        for dep in new_set {
            self.add_dependency(from, dep);
        }
        true
    }

    /// Removes every edge that involves `key`, in both directions.
    pub fn remove_key(&mut self, key: Identifier) {
        let idx = key.as_usize();

        let deps = self.forward.get_mut(idx).map(core::mem::take).unwrap_or_default();
        for dep in deps {
            remove_edge(&mut self.reverse, dep, key);
        }

        let dependents = self.reverse.get_mut(idx).map(core::mem::take).unwrap_or_default();
        for dependent in dependents {
            remove_edge(&mut self.forward, dependent, key);
        }
    }

    /// Returns the identifiers `key` depends on, in insertion order.
    #[inline]
    pub fn dependencies(&self, key: Identifier) -> impl Iterator<Item = Identifier> + '_ {
        edges(&self.forward, key).iter().copied()
    }

    /// Returns the identifiers that depend on `key`, in insertion order.
    #[inline]
    pub fn dependents(&self, key: Identifier) -> impl Iterator<Item = Identifier> + '_ {
        edges(&self.reverse, key).iter().copied()
    }

    /// Returns `true` if `key` depends on anything.
    #[inline]
    #[must_use]
    pub fn has_dependencies(&self, key: Identifier) -> bool {
        !edges(&self.forward, key).is_empty()
    }

    /// Returns `true` if anything depends on `key`.
    #[must_use]
    pub fn has_dependents(&self, key: Identifier) -> bool {
        !edges(&self.reverse, key).is_empty()
    }

    /// Returns the number of identifiers `key` depends on.
    #[must_use]
    pub fn in_degree(&self, key: Identifier) -> usize {
        edges(&self.forward, key).len()
    }

    /// Returns the number of identifiers that depend on `key`.
    #[must_use]
    pub fn out_degree(&self, key: Identifier) -> usize {
        edges(&self.reverse, key).len()
    }

    /// Returns every identifier that directly or indirectly depends on `key`,
    /// in an order where each identifier follows everything it depends on.
    ///
    /// `key` itself is not included. Back edges of cycles are skipped.
    #[must_use]
    pub fn transitive_dependents(&self, key: Identifier) -> Vec<Identifier> {
        let mut collect = Collect::default();
        WalkDepth::new().walk(self, WalkDirection::Forward, [key], &mut collect);
        collect.order.pop();
        collect.order.reverse();
        collect.order
    }

    /// Orders `roots` and their transitive dependents so that every identifier
    /// comes after everything it depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ChronoError::CyclicDependency`] if a cycle is reachable from
    /// `roots`.
    pub fn topological_order(
        &self,
        roots: impl IntoIterator<Item = Identifier>,
    ) -> Result<Vec<Identifier>, ChronoError> {
        let mut collect = Collect {
            cancel_on_cycle: true,
            ..Collect::default()
        };
        match WalkDepth::new().walk(self, WalkDirection::Forward, roots, &mut collect) {
            WalkOutcome::Complete => {
                collect.order.reverse();
                Ok(collect.order)
            }
            WalkOutcome::Cancelled => Err(ChronoError::CyclicDependency {
                path: collect.cycle,
            }),
        }
    }

    /// Returns the first cycle reachable from `key` through its dependencies.
    ///
    /// The path starts and ends with the same identifier.
    #[must_use]
    pub fn find_cycle(&self, key: Identifier) -> Option<Vec<Identifier>> {
        let mut collect = Collect {
            cancel_on_cycle: true,
            ..Collect::default()
        };
        match WalkDepth::new().walk(self, WalkDirection::Backward, [key], &mut collect) {
            WalkOutcome::Complete => None,
            WalkOutcome::Cancelled => Some(collect.cycle),
        }
    }
}

impl WalkSource<Identifier> for DependencyGraph {
    fn for_each_edge(&self, node: Identifier, direction: WalkDirection, f: impl FnMut(Identifier)) {
        let lists = match direction {
            WalkDirection::Forward => &self.reverse,
            WalkDirection::Backward => &self.forward,
        };
        edges(lists, node).iter().copied().for_each(f);
    }
}

#[derive(Default)]
struct Collect {
    cancel_on_cycle: bool,
    order: Vec<Identifier>,
    cycle: Vec<Identifier>,
}

impl WalkVisitor<Identifier> for Collect {
    fn on_topological_node(&mut self, node: Identifier) {
        self.order.push(node);
    }

    fn on_cycle(&mut self, _node: Identifier, path: &[Identifier]) -> OnCycle {
        if self.cancel_on_cycle {
            self.cycle = path.to_vec();
            OnCycle::Cancel
        } else {
            OnCycle::Resume
        }
    }
}
