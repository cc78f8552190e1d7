// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Identifier handles and the identifier table.
//!
//! An [`Identifier`] is a compact handle for one node of the dependency graph.
//! The definition behind the handle (its kind, optional name and computation
//! routine) lives in an [`IdentifierTable`] owned by the timeline and shared by
//! every checkout branched from the same origin.

use core::fmt;
use std::sync::Arc;

use crate::transaction::{Context, Interrupt};

/// A computation routine for a calculated identifier.
///
/// The routine reads its dependencies through the [`Context`] and returns the
/// new value. It may be driven more than once during a single propagation when
/// it reads a dependency that has not been resolved yet, so it must not rely on
/// side effects other than those requested through [`Context::effect`].
pub type Calculation<V> = Arc<dyn Fn(&mut Context<'_, V>) -> Result<V, Interrupt> + Send + Sync>;

/// A node of the dependency graph.
///
/// This is a lightweight handle (u32). Identifiers are never reused within a
/// timeline, so a handle stays meaningful for as long as any checkout of that
/// timeline is alive.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Identifier(u32);

impl Identifier {
    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns this identifier as a `usize` index (for tables keyed by identifier).
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw numeric id.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identifier").field(&self.0).finish()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An identifier that holds an externally settable value.
///
/// Only variables can be passed to [`Checkout::write`](crate::Checkout::write).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(Identifier);

impl Variable {
    /// Returns the untyped identifier.
    #[inline]
    #[must_use]
    pub const fn id(self) -> Identifier {
        self.0
    }
}

impl From<Variable> for Identifier {
    fn from(variable: Variable) -> Self {
        variable.0
    }
}

/// A calculated identifier that is recomputed on explicit calls.
///
/// Only impure calculations can be passed to
/// [`Checkout::call`](crate::Checkout::call). Their routine may request
/// external effects, resolved by the [`EffectResolver`](crate::EffectResolver)
/// supplied to the propagation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImpureCalculation(Identifier);

impl ImpureCalculation {
    /// Returns the untyped identifier.
    #[inline]
    #[must_use]
    pub const fn id(self) -> Identifier {
        self.0
    }
}

impl From<ImpureCalculation> for Identifier {
    fn from(calculation: ImpureCalculation) -> Self {
        calculation.0
    }
}

/// What kind of node an identifier is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    /// An externally settable leaf.
    Variable,
    /// A value derived from other identifiers by a pure routine.
    CalculatedValue,
    /// A derived value whose routine is driven by explicit calls and may
    /// request external effects.
    ImpureCalculatedValue,
}

/// The definition behind an [`Identifier`].
pub struct IdentifierEntry<V> {
    kind: IdentifierKind,
    name: Option<String>,
    lazy: bool,
    calculation: Option<Calculation<V>>,
}

impl<V> IdentifierEntry<V> {
    /// Returns the kind of this identifier.
    #[must_use]
    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    /// Returns the diagnostic name, if one was given.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns `true` if the value is only computed on demand.
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub(crate) fn calculation(&self) -> Option<&Calculation<V>> {
        self.calculation.as_ref()
    }
}

impl<V> fmt::Debug for IdentifierEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifierEntry")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("lazy", &self.lazy)
            .field("calculation", &self.calculation.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Definitions of every identifier created on a timeline.
///
/// Entries are append-only: an [`Identifier`] is the index of its entry.
pub struct IdentifierTable<V> {
    entries: Vec<IdentifierEntry<V>>,
}

impl<V> Default for IdentifierTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for IdentifierTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifierTable")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl<V> IdentifierTable<V> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns the number of registered identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no identifier has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the definition of `identifier`, if it belongs to this table.
    #[must_use]
    pub fn get(&self, identifier: Identifier) -> Option<&IdentifierEntry<V>> {
        self.entries.get(identifier.as_usize())
    }

    /// Returns the diagnostic name of `identifier`, if any.
    #[must_use]
    pub fn name(&self, identifier: Identifier) -> Option<&str> {
        self.get(identifier).and_then(IdentifierEntry::name)
    }

    pub(crate) fn register_variable(&mut self, name: Option<String>) -> Variable {
        Variable(self.push(IdentifierEntry {
            kind: IdentifierKind::Variable,
            name,
            lazy: false,
            calculation: None,
        }))
    }

    pub(crate) fn register_calculated(
        &mut self,
        name: Option<String>,
        lazy: bool,
        calculation: Calculation<V>,
    ) -> Identifier {
        self.push(IdentifierEntry {
            kind: IdentifierKind::CalculatedValue,
            name,
            lazy,
            calculation: Some(calculation),
        })
    }

    pub(crate) fn register_impure(
        &mut self,
        name: Option<String>,
        calculation: Calculation<V>,
    ) -> ImpureCalculation {
        ImpureCalculation(self.push(IdentifierEntry {
            kind: IdentifierKind::ImpureCalculatedValue,
            name,
            lazy: false,
            calculation: Some(calculation),
        }))
    }

    fn push(&mut self, entry: IdentifierEntry<V>) -> Identifier {
        let id = Identifier(
            u32::try_from(self.entries.len()).expect("too many identifiers for Identifier (u32)"),
        );
        self.entries.push(entry);
        id
    }
}
