// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Quarks (per-revision values) and transitions (in-flight changes).

use std::sync::Arc;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::identifier::Identifier;

/// Dependency list recorded for a quark.
pub type Dependencies = SmallVec<[Identifier; 4]>;

/// Identifiers changed in one revision, mapped to their new quarks.
///
/// Identifiers missing from a revision's scope are inherited from the
/// previous revision.
pub type Scope<V> = HashMap<Identifier, Arc<Quark<V>>>;

/// The state of a quark's value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuarkValue<V> {
    /// A computed or written value.
    Value(V),
    /// Not computed yet in this lineage; reading it triggers a calculation.
    Lazy,
    /// The identifier was removed in this revision.
    Removed,
}

/// The value of one identifier within one revision.
///
/// Quarks are immutable once created and shared by reference between
/// revisions and checkouts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quark<V> {
    identifier: Identifier,
    value: QuarkValue<V>,
    dependencies: Dependencies,
}

impl<V> Quark<V> {
    pub(crate) fn new(identifier: Identifier, value: V, dependencies: Dependencies) -> Self {
        Self {
            identifier,
            value: QuarkValue::Value(value),
            dependencies,
        }
    }

    pub(crate) fn lazy(identifier: Identifier, dependencies: Dependencies) -> Self {
        Self {
            identifier,
            value: QuarkValue::Lazy,
            dependencies,
        }
    }

    pub(crate) fn removed(identifier: Identifier) -> Self {
        Self {
            identifier,
            value: QuarkValue::Removed,
            dependencies: Dependencies::new(),
        }
    }

    /// Returns the identifier this quark belongs to.
    #[must_use]
    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// Returns the value state.
    #[must_use]
    pub fn state(&self) -> &QuarkValue<V> {
        &self.value
    }

    /// Returns the value, if one is present.
    #[must_use]
    pub fn value(&self) -> Option<&V> {
        match &self.value {
            QuarkValue::Value(value) => Some(value),
            QuarkValue::Lazy | QuarkValue::Removed => None,
        }
    }

    /// Returns `true` if the value has not been computed yet.
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        matches!(self.value, QuarkValue::Lazy)
    }

    /// Returns `true` if this quark is a removal marker.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        matches!(self.value, QuarkValue::Removed)
    }

    /// Returns the identifiers read while computing this quark.
    #[must_use]
    pub fn dependencies(&self) -> &[Identifier] {
        &self.dependencies
    }
}

/// Why a transition recomputes regardless of its incoming edges.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ForceReason {
    /// The identifier was touched (or newly created).
    Touched,
    /// Someone needs the value of a lazy identifier.
    Demanded,
}

/// Gate controlling whether a transition's routine runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EdgesFlow {
    /// Number of dirty incoming edges that have not resolved to an unchanged value.
    Pending(u32),
    /// Recompute regardless of edges.
    Forced(ForceReason),
}

impl EdgesFlow {
    /// Returns `true` if the routine has to run.
    #[must_use]
    pub fn should_run(self) -> bool {
        !matches!(self, Self::Pending(0))
    }

    /// Records that one dirty dependency resolved without changing its value.
    pub(crate) fn settle_edge(&mut self) {
        if let Self::Pending(count) = self {
            *count = count.saturating_sub(1);
        }
    }
}

/// The transaction-scoped record of one identifier's change.
#[derive(Clone, Debug)]
pub struct Transition<V> {
    identifier: Identifier,
    pub(crate) previous: Option<Arc<Quark<V>>>,
    pub(crate) current: Option<Arc<Quark<V>>>,
    pub(crate) proposed: Option<V>,
    pub(crate) args: Vec<V>,
    pub(crate) edges_flow: EdgesFlow,
    pub(crate) visited_at: Option<usize>,
    pub(crate) visited_topologically: bool,
}

impl<V> Transition<V> {
    pub(crate) fn new(identifier: Identifier, previous: Option<Arc<Quark<V>>>) -> Self {
        Self {
            identifier,
            previous,
            current: None,
            proposed: None,
            args: Vec::new(),
            edges_flow: EdgesFlow::Pending(0),
            visited_at: None,
            visited_topologically: false,
        }
    }

    /// Returns the identifier being changed.
    #[must_use]
    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// Returns the quark visible before the transaction, if any.
    #[must_use]
    pub fn previous(&self) -> Option<&Arc<Quark<V>>> {
        self.previous.as_ref()
    }

    /// Returns the quark produced by the transaction, once resolved.
    #[must_use]
    pub fn current(&self) -> Option<&Arc<Quark<V>>> {
        self.current.as_ref()
    }

    /// Returns `true` once the transition has produced its quark.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.current.is_some()
    }

    /// Returns the recomputation gate.
    #[must_use]
    pub fn edges_flow(&self) -> EdgesFlow {
        self.edges_flow
    }

    /// Returns the walk depth at which the identifier was first visited.
    #[must_use]
    pub fn visited_at(&self) -> Option<usize> {
        self.visited_at
    }

    /// Returns `true` once every dependent has been visited by the walk.
    #[must_use]
    pub fn visited_topologically(&self) -> bool {
        self.visited_topologically
    }

    /// Returns `true` if the produced quark is the previous quark, unchanged.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        match (&self.previous, &self.current) {
            (Some(previous), Some(current)) => Arc::ptr_eq(previous, current),
            _ => false,
        }
    }

    pub(crate) fn force(&mut self, reason: ForceReason) {
        self.edges_flow = EdgesFlow::Forced(reason);
    }

    pub(crate) fn previous_value(&self) -> Option<&V> {
        self.previous.as_deref().and_then(Quark::value)
    }

    pub(crate) fn previous_dependencies(&self) -> Dependencies {
        self.previous
            .as_deref()
            .map(|quark| quark.dependencies.clone())
            .unwrap_or_default()
    }
}
