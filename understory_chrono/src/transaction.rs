// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The propagation engine.
//!
//! A [`Transaction`] collects the changes made to a checkout (writes, touches,
//! calls, removals) and turns them into the scope of a new revision:
//!
//! 1. **Discovery.** A forward [`WalkDepth`] from the changed identifiers
//!    visits every dependent, creating a [`Transition`] for each and counting
//!    how many of its dependencies were visited too (its `edgesFlow`).
//! 2. **Execution.** The walk's topological stream, consumed from the end,
//!    orders the transitions so that dependencies resolve before dependents.
//!    A routine that reads a dependency which has not resolved yet is
//!    suspended: the dependency is scheduled on top of it and the routine is
//!    driven again once the dependency resolves.
//! 3. **Early cut-off.** A transition that resolves to its previous value
//!    settles one pending edge of each dependent; a dependent with no pending
//!    edges left keeps its previous quark without running.
//!
//! Cycles are reported by the walk (for edges recorded in earlier revisions)
//! or by the chain of suspended routines (for edges discovered while running).

use core::fmt;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::effect::EffectResolver;
use crate::error::ChronoError;
use crate::graph::DependencyGraph;
use crate::identifier::{Identifier, IdentifierEntry, IdentifierKind, IdentifierTable};
use crate::quark::{Dependencies, EdgesFlow, ForceReason, Quark, QuarkValue, Scope, Transition};
use crate::revision::RevisionId;
use crate::walk::{OnCycle, WalkDepth, WalkDirection, WalkOutcome, WalkVisitor};

/// Quarks visible to a transaction before it runs.
pub(crate) trait QuarkSource<V> {
    /// Returns the latest quark of `identifier`, if any.
    fn quark(&self, identifier: Identifier) -> Option<Arc<Quark<V>>>;
}

impl<V> QuarkSource<V> for Scope<V> {
    fn quark(&self, identifier: Identifier) -> Option<Arc<Quark<V>>> {
        self.get(&identifier).cloned()
    }
}

/// Why a calculation routine stopped without producing a value.
///
/// Routines return an `Interrupt` through `?` on [`Context::read`] and
/// [`Context::effect`], or build one with [`Interrupt::fail`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}")]
pub struct Interrupt {
    kind: InterruptKind,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
enum InterruptKind {
    #[error("waiting for {0}")]
    Suspend(Identifier),
    #[error("unknown identifier {0}")]
    Unknown(Identifier),
    #[error("{0}")]
    Failed(String),
    #[error("effect rejected: {0}")]
    EffectRejected(String),
}

impl Interrupt {
    /// A user-level failure; the propagation aborts with
    /// [`ChronoError::Calculation`].
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            kind: InterruptKind::Failed(message.into()),
        }
    }

    /// Returns `true` if the routine is waiting for a dependency to resolve.
    ///
    /// A suspended routine is driven again later; it should pass the
    /// interrupt through unchanged.
    #[must_use]
    pub fn is_suspend(&self) -> bool {
        matches!(self.kind, InterruptKind::Suspend(_))
    }

    fn suspend(dependency: Identifier) -> Self {
        Self {
            kind: InterruptKind::Suspend(dependency),
        }
    }

    fn unknown(identifier: Identifier) -> Self {
        Self {
            kind: InterruptKind::Unknown(identifier),
        }
    }

    fn into_error(self, identifier: Identifier) -> ChronoError {
        match self.kind {
            InterruptKind::Unknown(missing) => ChronoError::UnknownIdentifier(missing),
            InterruptKind::Failed(message) => ChronoError::Calculation {
                identifier,
                message,
            },
            InterruptKind::EffectRejected(message) => ChronoError::EffectRejected {
                identifier,
                message,
            },
            // Suspensions are recorded on the context before they are returned.
            InterruptKind::Suspend(dependency) => ChronoError::Calculation {
                identifier,
                message: format!("suspended on {dependency} outside a read"),
            },
        }
    }
}

/// What a calculation routine sees while it runs.
///
/// Every identifier read through [`read`](Self::read) becomes a dependency of
/// the quark being computed.
pub struct Context<'a, V> {
    identifier: Identifier,
    transitions: &'a HashMap<Identifier, Transition<V>>,
    removed: &'a HashSet<Identifier>,
    source: &'a dyn QuarkSource<V>,
    args: &'a [V],
    previous: Option<&'a V>,
    dependencies: Dependencies,
    effects: &'a mut Vec<V>,
    cursor: usize,
    resolver: &'a mut dyn EffectResolver<V>,
    suspended_on: Option<Identifier>,
}

impl<V> fmt::Debug for Context<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("identifier", &self.identifier)
            .field("dependencies", &self.dependencies)
            .field("suspended_on", &self.suspended_on)
            .finish_non_exhaustive()
    }
}

impl<V: Clone> Context<'_, V> {
    /// Returns the identifier being computed.
    #[must_use]
    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// Returns the arguments of the pending [`call`](crate::Checkout::call),
    /// or an empty slice.
    #[must_use]
    pub fn args(&self) -> &[V] {
        self.args
    }

    /// Returns the value this identifier had before the transaction.
    #[must_use]
    pub fn previous(&self) -> Option<&V> {
        self.previous
    }

    /// Reads the value of `identifier` and records it as a dependency.
    ///
    /// # Errors
    ///
    /// Returns an [`Interrupt`] if the dependency has not resolved yet (the
    /// routine will be driven again), or if it is unknown or removed.
    pub fn read(&mut self, identifier: impl Into<Identifier>) -> Result<V, Interrupt> {
        let dependency = identifier.into();
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        if self.removed.contains(&dependency) {
            return Err(Interrupt::unknown(dependency));
        }

        let quark = match self.transitions.get(&dependency) {
            Some(transition) => match &transition.current {
                Some(current) => Arc::clone(current),
                None => return Err(self.suspend(dependency)),
            },
            None => match self.source.quark(dependency) {
                Some(quark) => quark,
                None => return Err(Interrupt::unknown(dependency)),
            },
        };

        match quark.state() {
            QuarkValue::Value(value) => Ok(value.clone()),
            QuarkValue::Lazy => Err(self.suspend(dependency)),
            QuarkValue::Removed => Err(Interrupt::unknown(dependency)),
        }
    }

    /// Requests an external effect and returns its resolution.
    ///
    /// When the routine is driven again in the same propagation, earlier
    /// requests are answered from a replay log instead of the resolver.
    ///
    /// # Errors
    ///
    /// Returns an [`Interrupt`] if the resolver rejects the effect.
    pub fn effect(&mut self, request: V) -> Result<V, Interrupt> {
        if let Some(answer) = self.effects.get(self.cursor) {
            self.cursor += 1;
            return Ok(answer.clone());
        }
        match self.resolver.resolve(self.identifier, &request) {
            Ok(answer) => {
                self.effects.push(answer.clone());
                self.cursor += 1;
                Ok(answer)
            }
            Err(message) => Err(Interrupt {
                kind: InterruptKind::EffectRejected(message),
            }),
        }
    }

    fn suspend(&mut self, dependency: Identifier) -> Interrupt {
        self.suspended_on = Some(dependency);
        Interrupt::suspend(dependency)
    }
}

enum Step<V> {
    Resolved {
        quark: Arc<Quark<V>>,
        unchanged_value: bool,
    },
    Suspended(Identifier),
}

/// Pending changes of one checkout, consumed by propagation.
pub struct Transaction<V> {
    base: RevisionId,
    transitions: HashMap<Identifier, Transition<V>>,
    seeds: Vec<Identifier>,
    demanded: Vec<Identifier>,
    removed: HashSet<Identifier>,
}

impl<V> fmt::Debug for Transaction<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("base", &self.base)
            .field("transitions", &self.transitions.len())
            .field("seeds", &self.seeds)
            .field("demanded", &self.demanded)
            .field("removed", &self.removed)
            .finish()
    }
}

impl<V> Transaction<V> {
    pub(crate) fn new(base: RevisionId) -> Self {
        Self {
            base,
            transitions: HashMap::new(),
            seeds: Vec::new(),
            demanded: Vec::new(),
            removed: HashSet::new(),
        }
    }

    /// Returns the revision this transaction was started from.
    #[must_use]
    pub fn base(&self) -> RevisionId {
        self.base
    }

    /// Returns `true` if nothing has been changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty() && self.demanded.is_empty()
    }

    /// Returns the transition of `identifier`, if it was changed.
    #[must_use]
    pub fn transition(&self, identifier: Identifier) -> Option<&Transition<V>> {
        self.transitions.get(&identifier)
    }

    /// Returns the identifiers changed directly, in order of first change.
    #[must_use]
    pub fn changed(&self) -> &[Identifier] {
        &self.seeds
    }

    fn seed(&mut self, identifier: Identifier, previous: Option<Arc<Quark<V>>>) -> &mut Transition<V> {
        if !self.seeds.contains(&identifier) {
            self.seeds.push(identifier);
        }
        let transition = self
            .transitions
            .entry(identifier)
            .or_insert_with(|| Transition::new(identifier, previous));
        transition.force(ForceReason::Touched);
        transition
    }

    pub(crate) fn write(&mut self, identifier: Identifier, previous: Option<Arc<Quark<V>>>, value: V) {
        self.removed.remove(&identifier);
        self.seed(identifier, previous).proposed = Some(value);
    }

    pub(crate) fn touch(&mut self, identifier: Identifier, previous: Option<Arc<Quark<V>>>) {
        self.removed.remove(&identifier);
        self.seed(identifier, previous);
    }

    pub(crate) fn call(&mut self, identifier: Identifier, previous: Option<Arc<Quark<V>>>, args: Vec<V>) {
        self.removed.remove(&identifier);
        self.seed(identifier, previous).args = args;
    }

    pub(crate) fn remove(&mut self, identifier: Identifier, previous: Option<Arc<Quark<V>>>) {
        self.removed.insert(identifier);
        self.seed(identifier, previous);
    }

    pub(crate) fn demand(&mut self, identifier: Identifier, previous: Option<Arc<Quark<V>>>) {
        if !self.demanded.contains(&identifier) {
            self.demanded.push(identifier);
        }
        self.transitions
            .entry(identifier)
            .or_insert_with(|| Transition::new(identifier, previous))
            .force(ForceReason::Demanded);
    }
}

impl<V: Clone + PartialEq> Transaction<V> {
    /// Computes every affected identifier and returns the scope of the new revision.
    ///
    /// The scope holds the quarks that changed and a removal marker for every
    /// removed identifier.
    pub(crate) fn propagate(
        mut self,
        identifiers: &IdentifierTable<V>,
        source: &dyn QuarkSource<V>,
        graph: &DependencyGraph,
        resolver: &mut dyn EffectResolver<V>,
    ) -> Result<Scope<V>, ChronoError> {
        let mut walker = WalkDepth::new();
        let mut discovery = Discovery {
            transitions: &mut self.transitions,
            source,
            postorder: Vec::new(),
            cycle: Vec::new(),
        };
        let seeds = self.seeds.clone();
        if walker.walk(graph, WalkDirection::Forward, seeds, &mut discovery)
            == WalkOutcome::Cancelled
        {
            let path = discovery.cycle;
            tracing::debug!(?path, "dependency cycle found while discovering dependents");
            return Err(ChronoError::CyclicDependency { path });
        }
        let postorder = discovery.postorder;

        for (&identifier, transition) in &mut self.transitions {
            if let Some(info) = walker.visit_info(identifier) {
                transition.visited_at = Some(info.visited_at);
                transition.visited_topologically = info.visited_topologically;
                if let EdgesFlow::Pending(_) = transition.edges_flow {
                    let dirty = graph
                        .dependencies(identifier)
                        .filter(|&dependency| walker.is_visited(dependency))
                        .count();
                    transition.edges_flow =
                        EdgesFlow::Pending(u32::try_from(dirty).unwrap_or(u32::MAX));
                }
            }
        }

        let mut stack = postorder;
        stack.extend(self.demanded.iter().rev().copied());
        let mut waiting: HashMap<Identifier, Identifier> = HashMap::new();
        let mut effects: HashMap<Identifier, Vec<V>> = HashMap::new();

        while let Some(&identifier) = stack.last() {
            if self
                .transitions
                .get(&identifier)
                .is_none_or(Transition::is_resolved)
            {
                stack.pop();
                continue;
            }

            match self.step(identifier, identifiers, source, resolver, &mut effects)? {
                Step::Resolved {
                    quark,
                    unchanged_value,
                } => {
                    if unchanged_value && walker.is_visited(identifier) {
                        for dependent in graph.dependents(identifier) {
                            if let Some(transition) = self.transitions.get_mut(&dependent) {
                                transition.edges_flow.settle_edge();
                            }
                        }
                    }
                    if let Some(transition) = self.transitions.get_mut(&identifier) {
                        transition.current = Some(quark);
                    }
                    waiting.remove(&identifier);
                    stack.pop();
                }
                Step::Suspended(dependency) => {
                    if let Some(path) = waiting_cycle(&waiting, identifier, dependency) {
                        tracing::debug!(?path, "dependency cycle found while computing");
                        return Err(ChronoError::CyclicDependency { path });
                    }
                    self.reopen(dependency, identifiers, source);
                    waiting.insert(identifier, dependency);
                    stack.push(dependency);
                }
            }
        }

        let mut scope = Scope::new();
        for (identifier, transition) in self.transitions {
            if transition.is_unchanged() {
                continue;
            }
            if let Some(current) = transition.current {
                scope.insert(identifier, current);
            }
        }
        Ok(scope)
    }

    /// Makes sure `dependency` has an unresolved transition that will compute.
    fn reopen(
        &mut self,
        dependency: Identifier,
        identifiers: &IdentifierTable<V>,
        source: &dyn QuarkSource<V>,
    ) {
        let transition = self
            .transitions
            .entry(dependency)
            .or_insert_with(|| Transition::new(dependency, source.quark(dependency)));
        if transition.current.as_ref().is_some_and(|quark| !quark.is_lazy()) {
            return;
        }
        transition.current = None;
        if identifiers.get(dependency).is_some_and(IdentifierEntry::is_lazy) {
            tracing::trace!(identifier = %dependency, "computing lazy identifier on demand");
            transition.force(ForceReason::Demanded);
        }
    }

    fn step(
        &self,
        identifier: Identifier,
        identifiers: &IdentifierTable<V>,
        source: &dyn QuarkSource<V>,
        resolver: &mut dyn EffectResolver<V>,
        effects: &mut HashMap<Identifier, Vec<V>>,
    ) -> Result<Step<V>, ChronoError> {
        let entry = identifiers
            .get(identifier)
            .ok_or(ChronoError::UnknownIdentifier(identifier))?;
        let transition = self
            .transitions
            .get(&identifier)
            .ok_or(ChronoError::UnknownIdentifier(identifier))?;

        if self.removed.contains(&identifier) {
            return Ok(Step::Resolved {
                quark: Arc::new(Quark::removed(identifier)),
                unchanged_value: false,
            });
        }

        let flow = transition.edges_flow;
        let keep_previous = match entry.kind() {
            IdentifierKind::Variable => false,
            IdentifierKind::CalculatedValue => !flow.should_run(),
            IdentifierKind::ImpureCalculatedValue => !matches!(flow, EdgesFlow::Forced(_)),
        };
        if keep_previous && let Some(previous) = &transition.previous {
            return Ok(Step::Resolved {
                quark: Arc::clone(previous),
                unchanged_value: true,
            });
        }

        match entry.kind() {
            IdentifierKind::Variable => {
                let value = transition
                    .proposed
                    .as_ref()
                    .or_else(|| transition.previous_value())
                    .cloned()
                    .ok_or(ChronoError::UnknownIdentifier(identifier))?;
                Ok(self.resolved(transition, value, Dependencies::new()))
            }
            IdentifierKind::CalculatedValue
                if entry.is_lazy() && flow != EdgesFlow::Forced(ForceReason::Demanded) =>
            {
                Ok(Step::Resolved {
                    quark: Arc::new(Quark::lazy(identifier, transition.previous_dependencies())),
                    unchanged_value: false,
                })
            }
            IdentifierKind::CalculatedValue | IdentifierKind::ImpureCalculatedValue => {
                let calculation = entry
                    .calculation()
                    .ok_or(ChronoError::UnknownIdentifier(identifier))?;
                let mut context = Context {
                    identifier,
                    transitions: &self.transitions,
                    removed: &self.removed,
                    source,
                    args: &transition.args,
                    previous: transition.previous_value(),
                    dependencies: Dependencies::new(),
                    effects: effects.entry(identifier).or_default(),
                    cursor: 0,
                    resolver: &mut *resolver,
                    suspended_on: None,
                };
                let result = calculation(&mut context);
                if let Some(dependency) = context.suspended_on {
                    return Ok(Step::Suspended(dependency));
                }
                let dependencies = context.dependencies;
                match result {
                    Ok(value) => Ok(self.resolved(transition, value, dependencies)),
                    Err(interrupt) => Err(interrupt.into_error(identifier)),
                }
            }
        }
    }

    fn resolved(&self, transition: &Transition<V>, value: V, dependencies: Dependencies) -> Step<V> {
        if let Some(previous) = &transition.previous
            && previous.value() == Some(&value)
        {
            let quark = if previous.dependencies() == dependencies.as_slice() {
                Arc::clone(previous)
            } else {
                Arc::new(Quark::new(transition.identifier(), value, dependencies))
            };
            return Step::Resolved {
                quark,
                unchanged_value: true,
            };
        }
        Step::Resolved {
            quark: Arc::new(Quark::new(transition.identifier(), value, dependencies)),
            unchanged_value: false,
        }
    }
}

/// Returns the cycle closed by `identifier` waiting for `dependency`, if any.
fn waiting_cycle(
    waiting: &HashMap<Identifier, Identifier>,
    identifier: Identifier,
    dependency: Identifier,
) -> Option<Vec<Identifier>> {
    let mut path = vec![identifier, dependency];
    let mut cursor = dependency;
    while cursor != identifier {
        cursor = *waiting.get(&cursor)?;
        path.push(cursor);
    }
    Some(path)
}

struct Discovery<'a, V> {
    transitions: &'a mut HashMap<Identifier, Transition<V>>,
    source: &'a dyn QuarkSource<V>,
    postorder: Vec<Identifier>,
    cycle: Vec<Identifier>,
}

impl<V> WalkVisitor<Identifier> for Discovery<'_, V> {
    fn on_node(&mut self, node: Identifier, _depth: usize) {
        let source = self.source;
        self.transitions
            .entry(node)
            .or_insert_with(|| Transition::new(node, source.quark(node)));
    }

    fn on_topological_node(&mut self, node: Identifier) {
        self.postorder.push(node);
    }

    fn on_cycle(&mut self, _node: Identifier, path: &[Identifier]) -> OnCycle {
        self.cycle = path.to_vec();
        OnCycle::Cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::AcceptEffects;
    use crate::identifier::Calculation;

    struct Fixture {
        table: IdentifierTable<i32>,
        scope: Scope<i32>,
        graph: DependencyGraph,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                table: IdentifierTable::new(),
                scope: Scope::new(),
                graph: DependencyGraph::new(),
            }
        }

        fn variable(&mut self, value: i32) -> Identifier {
            let id = self.table.register_variable(None).id();
            self.scope
                .insert(id, Arc::new(Quark::new(id, value, Dependencies::new())));
            id
        }

        fn calculated(
            &mut self,
            lazy: bool,
            calculation: impl Fn(&mut Context<'_, i32>) -> Result<i32, Interrupt> + Send + Sync + 'static,
        ) -> Identifier {
            let calculation: Calculation<i32> = Arc::new(calculation);
            self.table.register_calculated(None, lazy, calculation)
        }

        fn run(&mut self, transaction: Transaction<i32>) -> Result<Scope<i32>, ChronoError> {
            let scope = transaction.propagate(&self.table, &self.scope, &self.graph, &mut AcceptEffects)?;
            for (&id, quark) in &scope {
                self.graph
                    .replace_dependencies(id, quark.dependencies().iter().copied());
                self.scope.insert(id, Arc::clone(quark));
            }
            Ok(scope)
        }

        fn next_id(&self) -> Identifier {
            Identifier::from_raw(u32::try_from(self.table.len()).unwrap())
        }

        fn value(&self, id: Identifier) -> Option<i32> {
            self.scope.get(&id).and_then(|quark| quark.value().copied())
        }

        fn previous(&self, id: Identifier) -> Option<Arc<Quark<i32>>> {
            self.scope.get(&id).cloned()
        }
    }

    fn revision() -> RevisionId {
        RevisionId::GENESIS
    }

    #[test]
    fn new_calculation_reads_its_dependencies() {
        let mut fx = Fixture::new();
        let a = fx.variable(2);
        let b = fx.calculated(false, move |ctx| Ok(ctx.read(a)? * 10));

        let mut tx = Transaction::new(revision());
        tx.touch(b, None);
        let scope = fx.run(tx).unwrap();

        assert_eq!(scope.len(), 1);
        assert_eq!(fx.value(b), Some(20));
        assert_eq!(fx.scope[&b].dependencies(), [a]);
        assert!(fx.graph.dependents(a).any(|k| k == b));
    }

    #[test]
    fn write_recomputes_dependents_in_order() {
        let mut fx = Fixture::new();
        let a = fx.variable(1);
        let b = fx.calculated(false, move |ctx| Ok(ctx.read(a)? + 1));
        let c = fx.calculated(false, move |ctx| Ok(ctx.read(a)? + ctx.read(b)?));

        let mut tx = Transaction::new(revision());
        tx.touch(b, None);
        tx.touch(c, None);
        fx.run(tx).unwrap();
        assert_eq!(fx.value(c), Some(3));

        let mut tx = Transaction::new(revision());
        tx.write(a, fx.previous(a), 5);
        let scope = fx.run(tx).unwrap();
        assert_eq!(scope.len(), 3);
        assert_eq!(fx.value(b), Some(6));
        assert_eq!(fx.value(c), Some(11));
    }

    #[test]
    fn unchanged_value_cuts_off_dependents() {
        let mut fx = Fixture::new();
        let a = fx.variable(3);
        let parity = fx.calculated(false, move |ctx| Ok(ctx.read(a)? % 2));
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let label = fx.calculated(false, move |ctx| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(ctx.read(parity)? * 100)
        });

        let mut tx = Transaction::new(revision());
        tx.touch(parity, None);
        tx.touch(label, None);
        fx.run(tx).unwrap();
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);

        let mut tx = Transaction::new(revision());
        tx.write(a, fx.previous(a), 5);
        let scope = fx.run(tx).unwrap();

        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(scope.contains_key(&a));
        assert!(!scope.contains_key(&parity));
        assert!(!scope.contains_key(&label));
        assert_eq!(fx.value(label), Some(100));
    }

    #[test]
    fn writing_the_same_value_produces_an_empty_scope() {
        let mut fx = Fixture::new();
        let a = fx.variable(3);
        let mut tx = Transaction::new(revision());
        tx.write(a, fx.previous(a), 3);
        assert!(fx.run(tx).unwrap().is_empty());
    }

    #[test]
    fn mutual_reads_report_a_cycle() {
        let mut fx = Fixture::new();
        let x = fx.next_id();
        let y = Identifier::from_raw(x.as_u32() + 1);
        assert_eq!(fx.calculated(false, move |ctx| ctx.read(y)), x);
        assert_eq!(fx.calculated(false, move |ctx| ctx.read(x)), y);

        let mut tx = Transaction::new(revision());
        tx.touch(x, None);
        tx.touch(y, None);
        assert_eq!(
            fx.run(tx),
            Err(ChronoError::CyclicDependency {
                path: vec![y, x, y],
            })
        );
        assert!(fx.scope.is_empty());
    }

    #[test]
    fn self_read_is_a_cycle() {
        let mut fx = Fixture::new();
        let me = fx.next_id();
        assert_eq!(fx.calculated(false, move |ctx| ctx.read(me)), me);

        let mut tx = Transaction::new(revision());
        tx.touch(me, None);
        assert_eq!(
            fx.run(tx),
            Err(ChronoError::CyclicDependency { path: vec![me, me] })
        );
    }

    #[test]
    fn lazy_identifier_computes_only_on_demand() {
        let mut fx = Fixture::new();
        let a = fx.variable(4);
        let lazy = fx.calculated(true, move |ctx| Ok(ctx.read(a)? + 1));

        let mut tx = Transaction::new(revision());
        tx.touch(lazy, None);
        fx.run(tx).unwrap();
        assert!(fx.scope[&lazy].is_lazy());

        let mut tx = Transaction::new(revision());
        tx.demand(lazy, fx.previous(lazy));
        fx.run(tx).unwrap();
        assert_eq!(fx.value(lazy), Some(5));
    }

    #[test]
    fn eager_dependent_forces_lazy_dependency() {
        let mut fx = Fixture::new();
        let a = fx.variable(4);
        let lazy = fx.calculated(true, move |ctx| Ok(ctx.read(a)? + 1));
        let eager = fx.calculated(false, move |ctx| Ok(ctx.read(lazy)? * 2));

        let mut tx = Transaction::new(revision());
        tx.touch(lazy, None);
        tx.touch(eager, None);
        fx.run(tx).unwrap();

        assert_eq!(fx.value(lazy), Some(5));
        assert_eq!(fx.value(eager), Some(10));
    }

    #[test]
    fn failures_and_unknown_reads_abort() {
        let mut fx = Fixture::new();
        let failing = fx.calculated(false, |_ctx| Err(Interrupt::fail("boom")));
        let mut tx = Transaction::new(revision());
        tx.touch(failing, None);
        assert_eq!(
            fx.run(tx),
            Err(ChronoError::Calculation {
                identifier: failing,
                message: "boom".into(),
            })
        );

        let ghost = Identifier::from_raw(99);
        let reader = fx.calculated(false, move |ctx| ctx.read(ghost));
        let mut tx = Transaction::new(revision());
        tx.touch(reader, None);
        assert_eq!(fx.run(tx), Err(ChronoError::UnknownIdentifier(ghost)));
    }

    #[test]
    fn removal_writes_a_tombstone() {
        let mut fx = Fixture::new();
        let a = fx.variable(1);
        let mut tx = Transaction::new(revision());
        tx.remove(a, fx.previous(a));
        let scope = fx.run(tx).unwrap();
        assert!(scope[&a].is_removed());
    }

    #[test]
    fn effects_are_requested_once_across_suspensions() {
        let mut fx = Fixture::new();
        let a = fx.variable(1);
        let b = fx.calculated(false, move |ctx| Ok(ctx.read(a)? + 1));
        let calculation: Calculation<i32> = Arc::new(move |ctx: &mut Context<'_, i32>| {
            let token = ctx.effect(7)?;
            Ok(token + ctx.read(b)?)
        });
        let impure = fx.table.register_impure(None, calculation).id();

        // The impure routine runs first and suspends on `b` after its effect.
        let mut tx = Transaction::new(revision());
        tx.call(impure, None, Vec::new());
        tx.touch(b, None);
        let mut requests = 0;
        let mut resolver = |_source: Identifier, effect: &i32| {
            requests += 1;
            Ok::<_, String>(*effect * 10)
        };
        let scope = tx
            .propagate(&fx.table, &fx.scope, &fx.graph, &mut resolver)
            .unwrap();
        assert_eq!(requests, 1);
        assert_eq!(scope[&impure].value(), Some(&72));
    }

    #[test]
    fn interrupt_reports_suspension() {
        assert!(Interrupt::suspend(Identifier::from_raw(1)).is_suspend());
        assert!(!Interrupt::fail("nope").is_suspend());
        assert_eq!(Interrupt::fail("nope").to_string(), "nope");
    }
}
