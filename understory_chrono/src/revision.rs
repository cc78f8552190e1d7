// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Revisions and the timeline arena that owns them.
//!
//! A [`Revision`] records only the identifiers that changed in it (its
//! [`Scope`]); everything else is inherited through its `previous` link.
//! Revisions live in a [`Timeline`] shared by every checkout branched from
//! the same origin, and are addressed by [`RevisionId`] handles.
//!
//! Each revision carries two counters maintained by the checkouts' mark and
//! sweep:
//!
//! - `reachable_count`: checkouts that may still move their base onto it
//!   (undo/redo window);
//! - `reference_count`: checkouts whose chain passes through it.
//!
//! Unreachable tails of a chain are compacted into the oldest reachable
//! revision, and revisions nobody references are removed from the arena.

use core::fmt;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::effect::AcceptEffects;
use crate::error::ChronoError;
use crate::graph::DependencyGraph;
use crate::identifier::{Identifier, IdentifierTable};
use crate::quark::{Quark, QuarkValue, Scope};
use crate::transaction::{QuarkSource, Transaction};

/// Handle of a revision within its timeline.
///
/// Ids increase monotonically and are never reused.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionId(u64);

impl RevisionId {
    /// The first revision of every timeline.
    pub const GENESIS: Self = Self(0);

    /// Returns the raw numeric id.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RevisionId").field(&self.0).finish()
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "revision-{}", self.0)
    }
}

/// One immutable snapshot in the timeline.
#[derive(Debug)]
pub struct Revision<V> {
    id: RevisionId,
    previous: Option<RevisionId>,
    /// `None` once the scope has been absorbed by a newer revision.
    scope: Option<Scope<V>>,
    reachable_count: usize,
    reference_count: usize,
}

impl<V> Revision<V> {
    /// Returns this revision's id.
    #[must_use]
    pub fn id(&self) -> RevisionId {
        self.id
    }

    /// Returns the revision this one was derived from.
    #[must_use]
    pub fn previous(&self) -> Option<RevisionId> {
        self.previous
    }

    /// Returns the quarks changed in this revision.
    #[must_use]
    pub fn scope(&self) -> Option<&Scope<V>> {
        self.scope.as_ref()
    }

    /// Returns the number of checkouts that may still move their base here.
    #[must_use]
    pub fn reachable_count(&self) -> usize {
        self.reachable_count
    }

    /// Returns the number of checkouts whose chain passes through this revision.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.reference_count
    }

    fn is_husk(&self) -> bool {
        self.scope.is_none()
    }
}

/// Revisions from a starting point back to the root of its chain.
///
/// Created by [`Timeline::previous_axis`]. The iterator is lazy and can be
/// cloned to restart from the same position.
pub struct PreviousAxis<'a, V> {
    timeline: &'a Timeline<V>,
    next: Option<RevisionId>,
}

impl<V> Clone for PreviousAxis<'_, V> {
    fn clone(&self) -> Self {
        Self {
            timeline: self.timeline,
            next: self.next,
        }
    }
}

impl<V> fmt::Debug for PreviousAxis<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviousAxis")
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl<'a, V> Iterator for PreviousAxis<'a, V> {
    type Item = &'a Revision<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let revision = self.timeline.revisions.get(&self.next?)?;
        self.next = revision.previous;
        Some(revision)
    }
}

/// Arena of identifiers and revisions shared by all branches of one origin.
///
/// Checkouts hold the timeline behind a lock and expose read-only access
/// through [`Checkout::with_timeline`](crate::Checkout::with_timeline).
#[derive(Debug)]
pub struct Timeline<V> {
    identifiers: IdentifierTable<V>,
    revisions: HashMap<RevisionId, Revision<V>>,
    next_revision: u64,
}

impl<V> Timeline<V> {
    /// Creates a timeline holding only the empty genesis revision.
    pub(crate) fn new() -> Self {
        let mut revisions = HashMap::new();
        revisions.insert(
            RevisionId::GENESIS,
            Revision {
                id: RevisionId::GENESIS,
                previous: None,
                scope: Some(Scope::new()),
                reachable_count: 0,
                reference_count: 0,
            },
        );
        Self {
            identifiers: IdentifierTable::new(),
            revisions,
            next_revision: 1,
        }
    }

    /// Returns the identifier definitions.
    #[must_use]
    pub fn identifiers(&self) -> &IdentifierTable<V> {
        &self.identifiers
    }

    pub(crate) fn identifiers_mut(&mut self) -> &mut IdentifierTable<V> {
        &mut self.identifiers
    }

    /// Returns the revision `id`, if it is still alive.
    #[must_use]
    pub fn revision(&self, id: RevisionId) -> Option<&Revision<V>> {
        self.revisions.get(&id)
    }

    /// Returns the number of live revisions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// Returns `true` if every revision has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Iterates from `from` back to the root of its chain.
    pub fn previous_axis(&self, from: RevisionId) -> PreviousAxis<'_, V> {
        PreviousAxis {
            timeline: self,
            next: Some(from),
        }
    }

    /// Returns the newest quark of `identifier` visible at `revision`.
    ///
    /// Removal markers are returned as-is.
    #[must_use]
    pub fn latest_quark(&self, revision: RevisionId, identifier: Identifier) -> Option<&Arc<Quark<V>>> {
        self.previous_axis(revision)
            .find_map(|rev| rev.scope.as_ref().and_then(|scope| scope.get(&identifier)))
    }

    /// Materializes every quark visible at `revision`.
    ///
    /// Newer quarks shadow older ones; removed identifiers are left out.
    #[must_use]
    pub fn build_latest(&self, revision: RevisionId) -> Scope<V> {
        let mut latest = Scope::new();
        for rev in self.previous_axis(revision) {
            for (identifier, quark) in rev.scope.iter().flatten() {
                latest
                    .entry(*identifier)
                    .or_insert_with(|| Arc::clone(quark));
            }
        }
        latest.retain(|_, quark| !quark.is_removed());
        latest
    }

    /// Appends a revision derived from `previous` and returns its id.
    pub(crate) fn push_revision(&mut self, previous: Option<RevisionId>, scope: Scope<V>) -> RevisionId {
        let id = RevisionId(self.next_revision);
        self.next_revision += 1;
        self.revisions.insert(
            id,
            Revision {
                id,
                previous,
                scope: Some(scope),
                reachable_count: 0,
                reference_count: 0,
            },
        );
        id
    }

    /// Adds one checkout's marks for `window` (`true` = reachable).
    pub(crate) fn retain_window(&mut self, window: &[(RevisionId, bool)]) {
        for &(id, reachable) in window {
            if let Some(revision) = self.revisions.get_mut(&id) {
                revision.reference_count += 1;
                if reachable {
                    revision.reachable_count += 1;
                }
            }
        }
    }

    /// Removes one checkout's marks for `window`.
    pub(crate) fn release_window(&mut self, window: &[(RevisionId, bool)]) {
        for &(id, reachable) in window {
            if let Some(revision) = self.revisions.get_mut(&id) {
                revision.reference_count = revision.reference_count.saturating_sub(1);
                if reachable {
                    revision.reachable_count = revision.reachable_count.saturating_sub(1);
                }
            }
        }
    }

    /// Folds the root revision `previous` into its successor `revision`.
    ///
    /// When no other chain references `previous`, its scope is moved and it
    /// becomes a husk; otherwise the scope is copied and `previous` loses
    /// one reference. Either way `revision` becomes the root of its chain.
    pub(crate) fn compact_revisions(
        &mut self,
        revision: RevisionId,
        previous: RevisionId,
    ) -> Result<(), ChronoError> {
        let invalid = ChronoError::InvalidCompaction { revision, previous };
        let linked = self
            .revisions
            .get(&revision)
            .is_some_and(|rev| rev.previous == Some(previous) && !rev.is_husk());
        if !linked {
            return Err(invalid);
        }

        let Some(prev) = self.revisions.get_mut(&previous) else {
            return Err(invalid);
        };
        if prev.reachable_count != 0 || prev.previous.is_some() || prev.is_husk() {
            return Err(invalid);
        }
        let mut merged = if prev.reference_count <= 1 {
            tracing::trace!(%revision, %previous, "absorbing revision");
            prev.scope.take().unwrap_or_default()
        } else {
            tracing::trace!(%revision, %previous, "copying shared revision");
            prev.reference_count -= 1;
            prev.scope.clone().unwrap_or_default()
        };

        let Some(rev) = self.revisions.get_mut(&revision) else {
            return Err(invalid);
        };
        merged.extend(rev.scope.take().unwrap_or_default());
        rev.scope = Some(merged);
        rev.previous = None;
        Ok(())
    }

    /// Drops husks and revisions no checkout references.
    pub(crate) fn collect_garbage(&mut self) {
        let before = self.revisions.len();
        self.revisions
            .retain(|_, revision| !revision.is_husk() && revision.reference_count > 0);
        let collected = before - self.revisions.len();
        if collected > 0 {
            tracing::trace!(collected, live = self.revisions.len(), "collected revisions");
        }
    }
}

impl<V: Clone + PartialEq> Timeline<V> {
    /// Reads `identifier` as of `revision`.
    ///
    /// A lazy value is computed on the fly and not stored anywhere.
    ///
    /// # Errors
    ///
    /// Returns [`ChronoError::UnknownIdentifier`] if the identifier has no
    /// quark at `revision` or was removed, and any error raised while
    /// computing a lazy value.
    pub fn read(&self, revision: RevisionId, identifier: Identifier) -> Result<V, ChronoError> {
        let quark = self
            .latest_quark(revision, identifier)
            .ok_or(ChronoError::UnknownIdentifier(identifier))?;
        match quark.state() {
            QuarkValue::Value(value) => Ok(value.clone()),
            QuarkValue::Removed => Err(ChronoError::UnknownIdentifier(identifier)),
            QuarkValue::Lazy => {
                tracing::trace!(%identifier, %revision, "computing lazy identifier at revision");
                let mut transaction = Transaction::new(revision);
                transaction.demand(identifier, Some(Arc::clone(quark)));
                let view = ChainView {
                    timeline: self,
                    revision,
                };
                let scope = transaction.propagate(
                    &self.identifiers,
                    &view,
                    &DependencyGraph::new(),
                    &mut AcceptEffects,
                )?;
                scope
                    .get(&identifier)
                    .and_then(|quark| quark.value().cloned())
                    .ok_or(ChronoError::UnknownIdentifier(identifier))
            }
        }
    }
}

/// Quarks visible at one revision of a timeline.
struct ChainView<'a, V> {
    timeline: &'a Timeline<V>,
    revision: RevisionId,
}

impl<V> QuarkSource<V> for ChainView<'_, V> {
    fn quark(&self, identifier: Identifier) -> Option<Arc<Quark<V>>> {
        self.timeline
            .latest_quark(self.revision, identifier)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifier::Calculation;
    use crate::quark::Dependencies;
    use crate::transaction::Context;

    fn quark(id: Identifier, value: i32) -> (Identifier, Arc<Quark<i32>>) {
        (id, Arc::new(Quark::new(id, value, Dependencies::new())))
    }

    fn scope(entries: impl IntoIterator<Item = (Identifier, Arc<Quark<i32>>)>) -> Scope<i32> {
        entries.into_iter().collect()
    }

    /// genesis <- r1 (a = 1, b = 10) <- r2 (a = 2)
    fn two_revisions() -> (Timeline<i32>, Identifier, Identifier, RevisionId, RevisionId) {
        let mut timeline = Timeline::new();
        let a = timeline.identifiers_mut().register_variable(None).id();
        let b = timeline.identifiers_mut().register_variable(None).id();
        let r1 = timeline.push_revision(Some(RevisionId::GENESIS), scope([quark(a, 1), quark(b, 10)]));
        let r2 = timeline.push_revision(Some(r1), scope([quark(a, 2)]));
        (timeline, a, b, r1, r2)
    }

    #[test]
    fn revision_ids_display_and_grow() {
        let (_, _, _, r1, r2) = two_revisions();
        assert!(r1 < r2);
        assert_eq!(r2.to_string(), "revision-2");
        assert_eq!(RevisionId::GENESIS.as_u64(), 0);
    }

    #[test]
    fn previous_axis_is_restartable() {
        let (timeline, _, _, r1, r2) = two_revisions();
        let axis = timeline.previous_axis(r2);
        let ids: Vec<_> = axis.clone().map(Revision::id).collect();
        assert_eq!(ids, [r2, r1, RevisionId::GENESIS]);
        assert_eq!(axis.count(), 3);
    }

    #[test]
    fn reads_walk_back_through_previous() {
        let (timeline, a, b, r1, r2) = two_revisions();
        assert_eq!(timeline.read(r2, a), Ok(2));
        assert_eq!(timeline.read(r2, b), Ok(10));
        assert_eq!(timeline.read(r1, a), Ok(1));

        let ghost = Identifier::from_raw(42);
        assert_eq!(timeline.read(r2, ghost), Err(ChronoError::UnknownIdentifier(ghost)));
    }

    #[test]
    fn build_latest_prefers_newer_quarks_and_drops_removed() {
        let (mut timeline, a, b, _, r2) = two_revisions();
        let latest = timeline.build_latest(r2);
        assert_eq!(latest[&a].value(), Some(&2));
        assert_eq!(latest[&b].value(), Some(&10));

        let r3 = timeline.push_revision(Some(r2), scope([(b, Arc::new(Quark::removed(b)))]));
        let latest = timeline.build_latest(r3);
        assert!(!latest.contains_key(&b));
        assert_eq!(timeline.read(r3, b), Err(ChronoError::UnknownIdentifier(b)));
    }

    #[test]
    fn lazy_read_at_revision_computes_without_storing() {
        let (mut timeline, a, _, _, r2) = two_revisions();
        let calculation: Calculation<i32> =
            Arc::new(move |ctx: &mut Context<'_, i32>| Ok(ctx.read(a)? * 3));
        let lazy = timeline
            .identifiers_mut()
            .register_calculated(None, true, calculation);
        let r3 = timeline.push_revision(
            Some(r2),
            scope([(lazy, Arc::new(Quark::lazy(lazy, Dependencies::new())))]),
        );

        assert_eq!(timeline.read(r3, lazy), Ok(6));
        assert!(timeline.latest_quark(r3, lazy).unwrap().is_lazy());
    }

    #[test]
    fn compaction_absorbs_unshared_root() {
        let (mut timeline, _, b, r1, _) = two_revisions();
        timeline.retain_window(&[(r1, true), (RevisionId::GENESIS, false)]);

        timeline.compact_revisions(r1, RevisionId::GENESIS).unwrap();
        let r1_rev = timeline.revision(r1).unwrap();
        assert_eq!(r1_rev.previous(), None);
        assert_eq!(r1_rev.scope().unwrap().len(), 2);
        assert!(timeline.revision(RevisionId::GENESIS).unwrap().is_husk());

        timeline.collect_garbage();
        assert!(timeline.revision(RevisionId::GENESIS).is_none());
        assert_eq!(timeline.read(r1, b), Ok(10));
    }

    #[test]
    fn compaction_copies_shared_root() {
        let (mut timeline, a, _, r1, r2) = two_revisions();
        // Two chains pass through r1 and neither keeps it reachable.
        timeline.retain_window(&[(r2, true), (r1, false), (RevisionId::GENESIS, false)]);
        timeline.retain_window(&[(r1, false), (RevisionId::GENESIS, false)]);

        let r1_rev = timeline.revision(r1).unwrap();
        assert_eq!(r1_rev.reference_count(), 2);
        assert_eq!(r1_rev.reachable_count(), 0);

        // r1 still hangs off genesis, so it cannot be folded yet.
        assert_eq!(
            timeline.compact_revisions(r2, r1),
            Err(ChronoError::InvalidCompaction {
                revision: r2,
                previous: r1,
            })
        );

        timeline.compact_revisions(r1, RevisionId::GENESIS).unwrap();
        timeline.compact_revisions(r2, r1).unwrap();
        let r1_rev = timeline.revision(r1).unwrap();
        assert_eq!(r1_rev.reference_count(), 1);
        assert!(!r1_rev.is_husk());
        assert_eq!(timeline.revision(r2).unwrap().previous(), None);
        assert_eq!(timeline.read(r2, a), Ok(2));
        assert_eq!(timeline.read(r1, a), Ok(1));
    }

    #[test]
    fn compaction_rejects_reachable_or_unlinked_revisions() {
        let (mut timeline, _, _, r1, r2) = two_revisions();
        timeline.retain_window(&[(r2, true), (r1, true)]);
        assert!(timeline.compact_revisions(r2, r1).is_err());
        assert!(timeline.compact_revisions(r2, RevisionId::GENESIS).is_err());
    }

    #[test]
    fn garbage_collection_drops_unreferenced_revisions() {
        let (mut timeline, _, _, r1, r2) = two_revisions();
        timeline.retain_window(&[(r2, true), (r1, true), (RevisionId::GENESIS, true)]);
        timeline.collect_garbage();
        assert_eq!(timeline.len(), 3);

        timeline.release_window(&[(r2, true), (r1, true), (RevisionId::GENESIS, true)]);
        timeline.collect_garbage();
        assert!(timeline.is_empty());
    }
}
