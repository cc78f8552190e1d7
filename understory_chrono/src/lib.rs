// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Chrono: incremental computation over a timeline of revisions.
//!
//! Values live in *identifiers*. A variable holds a written value, a
//! calculated identifier derives its value from other identifiers, and an
//! impure calculation may also request external effects. Every commit appends
//! an immutable *revision* that records only the quarks (computed values) that
//! changed, so earlier states stay readable and can be returned to.
//!
//! The crate is built from these pieces:
//!
//! - **Identifiers** ([`Identifier`], [`Variable`], [`ImpureCalculation`]):
//!   Handles into an [`IdentifierTable`] holding each identifier's kind,
//!   calculation and diagnostic name.
//! - **Quarks** ([`Quark`], [`Scope`]): One identifier's value and the
//!   dependencies read while computing it.
//! - **Revisions** ([`Revision`], [`Timeline`]): A shared arena of revisions
//!   chained through their predecessors, with compaction and reclamation of
//!   history no checkout can reach.
//! - **Checkouts** ([`Checkout`]): Mutable cursors on the timeline with
//!   propagation, undo, redo and branching.
//! - **Transactions** ([`Transaction`], [`Context`]): The changes pending in
//!   a checkout and the propagation that recomputes exactly what they affect.
//! - **Graph walks** ([`WalkDepth`], [`DependencyGraph`]): An iterative
//!   depth-first walk with post-order notification and cycle reporting.
//!
//! ## Quick Start
//!
//! ```rust
//! use understory_chrono::Checkout;
//!
//! let mut checkout = Checkout::<i64>::with_history_limit(2);
//!
//! let v = checkout.variable(1);
//! let doubled = checkout.identifier(move |ctx| Ok(ctx.read(v)? * 2));
//! checkout.propagate().unwrap();
//! assert_eq!(checkout.read(doubled).unwrap(), 2);
//!
//! checkout.write(v, 21);
//! checkout.propagate().unwrap();
//! assert_eq!(checkout.read(doubled).unwrap(), 42);
//!
//! // Step back to the previous revision and forward again.
//! assert!(checkout.undo());
//! assert_eq!(checkout.read(doubled).unwrap(), 2);
//! assert!(checkout.redo());
//! assert_eq!(checkout.read(doubled).unwrap(), 42);
//! ```
//!
//! ## Propagation
//!
//! Writes, touches, calls and removals are staged in a [`Transaction`] and
//! take effect on [`Checkout::propagate`]. Propagation visits the changed
//! identifiers and everything that transitively depends on them, runs each
//! calculation after its dependencies, and stops at identifiers whose inputs
//! came out unchanged. Calculations read their inputs through
//! [`Context::read`], which also records the dependency edges of the new
//! quark; a dependency that has not been computed yet suspends the
//! calculation until it is, and a circular read fails the propagation with
//! [`ChronoError::CyclicDependency`].
//!
//! Lazy identifiers ([`Checkout::lazy_identifier`]) are left unset until
//! something reads them. Impure calculations request effects through
//! [`Context::effect`]; an [`EffectResolver`] passed to
//! [`Checkout::propagate_with`] answers them.
//!
//! ## History and Branches
//!
//! A checkout keeps [`Checkout::history_limit`] revisions reachable. Older
//! revisions are folded into the oldest reachable one and reclaimed once no
//! checkout references them. [`Checkout::branch`] forks an independent
//! checkout sharing the same timeline; the timeline is behind a lock, so
//! branches can move to other threads.
//!
//! ## Logging
//!
//! Commits, undo and redo emit `tracing` events at `debug` level. Compaction,
//! reclamation and lazy computation emit them at `trace` level. Revision
//! counters found out of sync are reported at `error` level.
//!
//! ## Features
//!
//! This crate currently has no optional features. All functionality is always
//! available.

mod checkout;
mod effect;
mod entity;
mod error;
mod graph;
mod identifier;
mod quark;
mod revision;
mod transaction;
mod walk;

pub use checkout::Checkout;
pub use effect::{AcceptEffects, EffectResolver};
pub use entity::Entity;
pub use error::ChronoError;
pub use graph::DependencyGraph;
pub use identifier::{
    Calculation, Identifier, IdentifierEntry, IdentifierKind, IdentifierTable, ImpureCalculation,
    Variable,
};
pub use quark::{Dependencies, EdgesFlow, ForceReason, Quark, QuarkValue, Scope, Transition};
pub use revision::{PreviousAxis, Revision, RevisionId, Timeline};
pub use transaction::{Context, Interrupt, Transaction};
pub use walk::{
    OnCycle, VisitInfo, WalkDepth, WalkDirection, WalkOutcome, WalkSource, WalkVisitor,
};
