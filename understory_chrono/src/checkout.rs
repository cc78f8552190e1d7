// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Checkouts: mutable cursors over a revision timeline.

use core::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::effect::{AcceptEffects, EffectResolver};
use crate::error::ChronoError;
use crate::graph::DependencyGraph;
use crate::identifier::{Identifier, IdentifierKind, ImpureCalculation, Variable};
use crate::quark::{QuarkValue, Scope};
use crate::revision::{Revision, RevisionId, Timeline};
use crate::transaction::{Context, Interrupt, Transaction};

/// A working copy of the dependency graph's state.
///
/// A checkout reads from its *base* revision, collects changes in a lazily
/// created [`Transaction`] and commits them with [`propagate`](Self::propagate),
/// which appends a new revision and moves the base onto it.
///
/// ## History
///
/// The checkout keeps the last `history_limit` revisions of its chain
/// reachable (the base included), so [`undo`](Self::undo) can step back
/// `history_limit - 1` times and [`redo`](Self::redo) can step forward again
/// up to the *top* revision. Older revisions are compacted into the oldest
/// reachable one and reclaimed.
///
/// ## Branches
///
/// [`branch`](Self::branch) creates an independent checkout on the same base.
/// Branches share identifiers and revisions through a locked [`Timeline`], so
/// they can be moved to different threads.
///
/// # Example
///
/// ```
/// use understory_chrono::Checkout;
///
/// let mut checkout = Checkout::<i32>::new();
/// let v = checkout.variable(1);
/// let double = checkout.identifier(move |ctx| Ok(ctx.read(v)? * 2));
/// checkout.propagate().unwrap();
/// assert_eq!(checkout.read(double).unwrap(), 2);
///
/// checkout.write(v, 5);
/// checkout.propagate().unwrap();
/// assert_eq!(checkout.read(double).unwrap(), 10);
/// ```
///
/// # See Also
///
/// - [`Context`]: What calculation routines receive.
/// - [`Timeline`]: The shared revision arena.
pub struct Checkout<V> {
    timeline: Arc<Mutex<Timeline<V>>>,
    base_revision: RevisionId,
    top_revision: RevisionId,
    history_limit: usize,
    /// Latest quark of every identifier visible at the base revision.
    checkout: Scope<V>,
    graph: DependencyGraph,
    /// Revisions marked by the last mark and sweep (`true` = reachable).
    window: Vec<(RevisionId, bool)>,
    active_transaction: Option<Transaction<V>>,
    following_revision: Option<HashMap<RevisionId, RevisionId>>,
}

impl<V> fmt::Debug for Checkout<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout")
            .field("base_revision", &self.base_revision)
            .field("top_revision", &self.top_revision)
            .field("history_limit", &self.history_limit)
            .field("identifiers", &self.checkout.len())
            .field("window", &self.window)
            .field("active_transaction", &self.active_transaction)
            .finish_non_exhaustive()
    }
}

impl<V: Clone + PartialEq> Default for Checkout<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Checkout<V> {
    /// Returns the revision reads are served from.
    #[must_use]
    pub fn base_revision(&self) -> RevisionId {
        self.base_revision
    }

    /// Returns the newest revision this checkout can [`redo`](Self::redo) to.
    #[must_use]
    pub fn top_revision(&self) -> RevisionId {
        self.top_revision
    }

    /// Returns how many revisions (the base included) stay reachable for undo.
    #[must_use]
    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Sets the history limit, clamped to at least 1.
    ///
    /// The new limit applies from the next [`propagate`](Self::propagate).
    pub fn set_history_limit(&mut self, limit: usize) {
        self.history_limit = limit.max(1);
    }

    /// Returns the dependency graph of the materialized quarks.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Returns the pending transaction, if any change has been made since the
    /// last commit.
    #[must_use]
    pub fn transaction(&self) -> Option<&Transaction<V>> {
        self.active_transaction.as_ref()
    }

    /// Returns `true` if there are changes waiting for [`propagate`](Self::propagate).
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        self.active_transaction
            .as_ref()
            .is_some_and(|transaction| !transaction.is_empty())
    }

    /// Returns the diagnostic name of `identifier`, if one was given.
    #[must_use]
    pub fn name(&self, identifier: impl Into<Identifier>) -> Option<String> {
        self.timeline
            .lock()
            .identifiers()
            .name(identifier.into())
            .map(str::to_owned)
    }

    /// Runs `f` with read access to the shared timeline.
    ///
    /// The timeline stays locked while `f` runs, so `f` must not call back
    /// into a checkout of the same timeline.
    pub fn with_timeline<R>(&self, f: impl FnOnce(&Timeline<V>) -> R) -> R {
        f(&self.timeline.lock())
    }

    fn transaction_mut(&mut self) -> &mut Transaction<V> {
        let base = self.base_revision;
        self.active_transaction
            .get_or_insert_with(|| Transaction::new(base))
    }

    fn merge_scope(&mut self, scope: &Scope<V>) {
        for (&identifier, quark) in scope {
            if quark.is_removed() {
                self.checkout.remove(&identifier);
                self.graph.remove_key(identifier);
            } else {
                self.graph
                    .replace_dependencies(identifier, quark.dependencies().iter().copied());
                self.checkout.insert(identifier, Arc::clone(quark));
            }
        }
    }

    fn rebuild_graph(&mut self) {
        let mut graph = DependencyGraph::new();
        for (&identifier, quark) in &self.checkout {
            for &dependency in quark.dependencies() {
                graph.add_dependency(identifier, dependency);
            }
        }
        self.graph = graph;
    }

    /// Marks the revisions of this checkout's chain, compacts the unreachable
    /// tail and sweeps the arena.
    fn mark_and_sweep(&mut self, timeline: &mut Timeline<V>) {
        let mut window = Vec::new();
        let mut at_or_below_base = false;
        let mut counter = 0;
        for revision in timeline.previous_axis(self.top_revision) {
            if revision.id() == self.base_revision {
                at_or_below_base = true;
            }
            let reachable = if at_or_below_base {
                counter += 1;
                counter <= self.history_limit
            } else {
                true
            };
            window.push((revision.id(), reachable));
        }
        timeline.retain_window(&window);

        // The oldest reachable revision followed by the unreachable tail.
        if let Some(first_unreachable) = window.iter().position(|&(_, reachable)| !reachable)
            && let Some(start) = first_unreachable.checked_sub(1)
        {
            let chain: Vec<RevisionId> = window[start..].iter().map(|&(id, _)| id).collect();
            for pair in chain.windows(2).rev() {
                let (revision, previous) = (pair[0], pair[1]);
                // Another checkout still reaches `previous`: keep the rest of the chain.
                if timeline
                    .revision(previous)
                    .is_none_or(|prev| prev.reachable_count() != 0 || prev.previous().is_some())
                {
                    tracing::trace!(%previous, "revision pinned by another checkout");
                    break;
                }
                let compacted = timeline.compact_revisions(revision, previous);
                debug_assert!(compacted.is_ok(), "revision counters out of sync: {compacted:?}");
                if let Err(err) = compacted {
                    tracing::error!(%err, "revision counters out of sync");
                    break;
                }
            }
        }

        let attached = timeline.previous_axis(self.top_revision).count();
        window.truncate(attached);
        self.window = window;
        timeline.collect_garbage();
    }
}

impl<V: Clone + PartialEq> Checkout<V> {
    /// Creates a checkout on a fresh timeline with a history limit of 1.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(1)
    }

    /// Creates a checkout on a fresh timeline keeping `limit` revisions
    /// reachable (clamped to at least 1).
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        let mut checkout = Self {
            timeline: Arc::new(Mutex::new(Timeline::new())),
            base_revision: RevisionId::GENESIS,
            top_revision: RevisionId::GENESIS,
            history_limit: limit.max(1),
            checkout: Scope::new(),
            graph: DependencyGraph::new(),
            window: Vec::new(),
            active_transaction: None,
            following_revision: None,
        };
        let timeline = Arc::clone(&checkout.timeline);
        checkout.mark_and_sweep(&mut timeline.lock());
        checkout
    }

    /// Creates a variable holding `value` (visible after the next propagation).
    pub fn variable(&mut self, value: V) -> Variable {
        let variable = self.timeline.lock().identifiers_mut().register_variable(None);
        self.write(variable, value);
        variable
    }

    /// Like [`variable`](Self::variable), with a diagnostic name.
    pub fn variable_named(&mut self, name: impl Into<String>, value: V) -> Variable {
        let variable = self
            .timeline
            .lock()
            .identifiers_mut()
            .register_variable(Some(name.into()));
        self.write(variable, value);
        variable
    }

    /// Creates a calculated identifier and schedules its first computation.
    pub fn identifier(
        &mut self,
        calculation: impl Fn(&mut Context<'_, V>) -> Result<V, Interrupt> + Send + Sync + 'static,
    ) -> Identifier {
        self.register_calculated(None, false, calculation)
    }

    /// Like [`identifier`](Self::identifier), with a diagnostic name.
    pub fn identifier_named(
        &mut self,
        name: impl Into<String>,
        calculation: impl Fn(&mut Context<'_, V>) -> Result<V, Interrupt> + Send + Sync + 'static,
    ) -> Identifier {
        self.register_calculated(Some(name.into()), false, calculation)
    }

    /// Creates a calculated identifier that is only computed when read.
    ///
    /// Until then its quark is an unset placeholder. A non-lazy dependent
    /// reading it during a propagation computes it too.
    pub fn lazy_identifier(
        &mut self,
        calculation: impl Fn(&mut Context<'_, V>) -> Result<V, Interrupt> + Send + Sync + 'static,
    ) -> Identifier {
        self.register_calculated(None, true, calculation)
    }

    /// Creates an impure calculation, recomputed on [`call`](Self::call).
    ///
    /// Its routine may request effects through [`Context::effect`]. It runs
    /// once on creation with empty arguments, and afterwards only when called.
    pub fn impure_identifier(
        &mut self,
        calculation: impl Fn(&mut Context<'_, V>) -> Result<V, Interrupt> + Send + Sync + 'static,
    ) -> ImpureCalculation {
        let impure = self
            .timeline
            .lock()
            .identifiers_mut()
            .register_impure(None, Arc::new(calculation));
        self.touch(impure);
        impure
    }

    fn register_calculated(
        &mut self,
        name: Option<String>,
        lazy: bool,
        calculation: impl Fn(&mut Context<'_, V>) -> Result<V, Interrupt> + Send + Sync + 'static,
    ) -> Identifier {
        let identifier = self
            .timeline
            .lock()
            .identifiers_mut()
            .register_calculated(name, lazy, Arc::new(calculation));
        self.touch(identifier);
        identifier
    }

    /// Schedules an existing identifier for (re)computation and returns it.
    ///
    /// Used to bring back an identifier after
    /// [`remove_identifier`](Self::remove_identifier). A removed variable gets
    /// back the last value the retained history holds for it. Once that value
    /// has been compacted away, bring the variable back with
    /// [`write`](Self::write) instead; otherwise the next propagation fails
    /// with [`ChronoError::UnknownIdentifier`].
    pub fn add_identifier(&mut self, identifier: impl Into<Identifier>) -> Identifier {
        let identifier = identifier.into();
        match self.removed_variable_value(identifier) {
            Some(value) => self.transaction_mut().write(identifier, None, value),
            None => self.touch(identifier),
        }
        identifier
    }

    /// Returns the last live value of a variable missing from this checkout.
    fn removed_variable_value(&self, identifier: Identifier) -> Option<V> {
        if self.checkout.contains_key(&identifier) {
            return None;
        }
        let timeline = self.timeline.lock();
        let entry = timeline.identifiers().get(identifier)?;
        if entry.kind() != IdentifierKind::Variable {
            return None;
        }
        timeline
            .previous_axis(self.base_revision)
            .filter_map(|revision| revision.scope()?.get(&identifier))
            .find(|quark| !quark.is_removed())
            .and_then(|quark| quark.value().cloned())
    }

    /// Proposes a new value for `variable`.
    pub fn write(&mut self, variable: Variable, value: V) {
        let previous = self.checkout.get(&variable.id()).cloned();
        self.transaction_mut().write(variable.id(), previous, value);
    }

    /// Forces `identifier` to be recomputed by the next propagation.
    pub fn touch(&mut self, identifier: impl Into<Identifier>) {
        let identifier = identifier.into();
        let previous = self.checkout.get(&identifier).cloned();
        self.transaction_mut().touch(identifier, previous);
    }

    /// Schedules `calculation` to run with `args` in the next propagation.
    pub fn call(&mut self, calculation: ImpureCalculation, args: Vec<V>) {
        let previous = self.checkout.get(&calculation.id()).cloned();
        self.transaction_mut()
            .call(calculation.id(), previous, args);
    }

    /// Removes `identifier` from the next revision.
    ///
    /// Earlier revisions keep their quarks. Identifiers that still read it
    /// must be removed in the same propagation, or the propagation fails with
    /// [`ChronoError::UnknownIdentifier`].
    pub fn remove_identifier(&mut self, identifier: impl Into<Identifier>) {
        let identifier = identifier.into();
        let previous = self.checkout.get(&identifier).cloned();
        self.transaction_mut().remove(identifier, previous);
    }

    /// Reads the committed value of `identifier` at the base revision.
    ///
    /// Pending changes are not visible until [`propagate`](Self::propagate).
    /// A lazy value is computed now and kept in this checkout.
    ///
    /// # Errors
    ///
    /// Returns [`ChronoError::UnknownIdentifier`] for identifiers without a
    /// committed quark, and any error raised while computing a lazy value.
    pub fn read(&mut self, identifier: impl Into<Identifier>) -> Result<V, ChronoError> {
        let identifier = identifier.into();
        let quark = self
            .checkout
            .get(&identifier)
            .ok_or(ChronoError::UnknownIdentifier(identifier))?;
        match quark.state() {
            QuarkValue::Value(value) => return Ok(value.clone()),
            QuarkValue::Removed => return Err(ChronoError::UnknownIdentifier(identifier)),
            QuarkValue::Lazy => {}
        }

        tracing::trace!(%identifier, "computing lazy identifier on read");
        let mut transaction = Transaction::new(self.base_revision);
        transaction.demand(identifier, Some(Arc::clone(quark)));
        let scope = {
            let timeline = self.timeline.lock();
            transaction.propagate(
                timeline.identifiers(),
                &self.checkout,
                &self.graph,
                &mut AcceptEffects,
            )?
        };
        self.merge_scope(&scope);
        self.checkout
            .get(&identifier)
            .and_then(|quark| quark.value().cloned())
            .ok_or(ChronoError::UnknownIdentifier(identifier))
    }

    /// Reads `identifier` as of `revision`, without touching this checkout.
    ///
    /// # Errors
    ///
    /// See [`Timeline::read`].
    pub fn read_at(
        &self,
        revision: RevisionId,
        identifier: impl Into<Identifier>,
    ) -> Result<V, ChronoError> {
        self.timeline.lock().read(revision, identifier.into())
    }

    /// Commits pending changes, accepting every requested effect as-is.
    ///
    /// # Errors
    ///
    /// See [`propagate_with`](Self::propagate_with).
    pub fn propagate(&mut self) -> Result<RevisionId, ChronoError> {
        self.propagate_with(&mut AcceptEffects)
    }

    /// Commits pending changes and returns the new base revision.
    ///
    /// Without pending changes this returns the current base and creates no
    /// revision. After a commit the top revision equals the base, so undone
    /// revisions can no longer be redone.
    ///
    /// # Errors
    ///
    /// Returns [`ChronoError::CyclicDependency`], [`ChronoError::UnknownIdentifier`],
    /// [`ChronoError::Calculation`] or [`ChronoError::EffectRejected`] when the
    /// propagation fails. The pending changes are then discarded and the
    /// checkout stays on its current base.
    ///
    /// # Locking
    ///
    /// The shared timeline stays locked while calculations and `resolver`
    /// run. Neither may call [`name`](Self::name), [`read_at`](Self::read_at),
    /// [`branch`](Self::branch) or any other locking method on a checkout of
    /// the same timeline; doing so deadlocks.
    pub fn propagate_with(
        &mut self,
        resolver: &mut dyn EffectResolver<V>,
    ) -> Result<RevisionId, ChronoError> {
        let Some(transaction) = self.active_transaction.take() else {
            return Ok(self.base_revision);
        };
        if transaction.is_empty() {
            return Ok(self.base_revision);
        }

        let timeline = Arc::clone(&self.timeline);
        let mut timeline = timeline.lock();
        let scope = transaction.propagate(timeline.identifiers(), &self.checkout, &self.graph, resolver)?;

        let changed = scope.len();
        self.merge_scope(&scope);
        let next = timeline.push_revision(Some(self.base_revision), scope);
        timeline.release_window(&self.window);
        self.window.clear();
        self.base_revision = next;
        self.top_revision = next;
        self.following_revision = None;
        self.mark_and_sweep(&mut timeline);

        tracing::debug!(revision = %next, changed, live = timeline.len(), "committed revision");
        Ok(next)
    }

    /// Moves the base one revision back.
    ///
    /// Returns `false` if the previous revision is outside the history window.
    /// Pending changes are discarded.
    pub fn undo(&mut self) -> bool {
        let timeline = Arc::clone(&self.timeline);
        let timeline = timeline.lock();
        let Some(previous) = timeline
            .revision(self.base_revision)
            .and_then(Revision::previous)
        else {
            return false;
        };
        if !self.window.contains(&(previous, true)) {
            return false;
        }

        self.base_revision = previous;
        self.checkout = timeline.build_latest(previous);
        self.rebuild_graph();
        self.active_transaction = None;
        tracing::debug!(revision = %previous, "undo");
        true
    }

    /// Moves the base one revision forward, towards the top revision.
    ///
    /// Returns `false` at the top. Pending changes are discarded.
    pub fn redo(&mut self) -> bool {
        if self.base_revision == self.top_revision {
            return false;
        }

        let timeline = Arc::clone(&self.timeline);
        let timeline = timeline.lock();
        let top = self.top_revision;
        let following = self.following_revision.get_or_insert_with(|| {
            timeline
                .previous_axis(top)
                .filter_map(|revision| Some((revision.previous()?, revision.id())))
                .collect()
        });
        let Some(&next) = following.get(&self.base_revision) else {
            return false;
        };
        let Some(scope) = timeline.revision(next).and_then(Revision::scope) else {
            return false;
        };

        self.merge_scope(scope);
        self.base_revision = next;
        self.active_transaction = None;
        tracing::debug!(revision = %next, "redo");
        true
    }

    /// Creates an independent checkout on the same base revision.
    ///
    /// The branch shares identifiers and revisions, inherits the history
    /// limit, and starts without pending changes or redo history.
    #[must_use]
    pub fn branch(&self) -> Self {
        let mut branch = Self {
            timeline: Arc::clone(&self.timeline),
            base_revision: self.base_revision,
            top_revision: self.base_revision,
            history_limit: self.history_limit,
            checkout: self.checkout.clone(),
            graph: self.graph.clone(),
            window: Vec::new(),
            active_transaction: None,
            following_revision: None,
        };
        let timeline = Arc::clone(&branch.timeline);
        branch.mark_and_sweep(&mut timeline.lock());
        branch
    }
}

impl<V> Drop for Checkout<V> {
    fn drop(&mut self) {
        let mut timeline = self.timeline.lock();
        timeline.release_window(&self.window);
        timeline.collect_garbage();
    }
}
