// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Entities: groups of identifiers that join and leave a checkout together.

use crate::checkout::Checkout;
use crate::effect::EffectResolver;
use crate::error::ChronoError;
use crate::revision::RevisionId;

/// A value that owns a set of identifiers in a checkout.
///
/// [`enter_graph`](Self::enter_graph) creates or re-adds the identifiers and
/// [`leave_graph`](Self::leave_graph) removes them. Both only stage changes;
/// they become visible on the next propagation.
///
/// # Example
///
/// ```
/// use understory_chrono::{Checkout, Entity, Identifier, Variable};
///
/// struct Rect {
///     width: i32,
///     height: i32,
///     fields: Option<(Variable, Variable, Identifier)>,
/// }
///
/// impl Entity<i32> for Rect {
///     fn enter_graph(&mut self, checkout: &mut Checkout<i32>) {
///         let width = checkout.variable(self.width);
///         let height = checkout.variable(self.height);
///         let area = checkout.identifier(move |ctx| Ok(ctx.read(width)? * ctx.read(height)?));
///         self.fields = Some((width, height, area));
///     }
///
///     fn leave_graph(&mut self, checkout: &mut Checkout<i32>) {
///         if let Some((width, height, area)) = self.fields.take() {
///             checkout.remove_identifier(area);
///             checkout.remove_identifier(width);
///             checkout.remove_identifier(height);
///         }
///     }
/// }
///
/// let mut checkout = Checkout::<i32>::new();
/// let mut rect = Rect { width: 3, height: 4, fields: None };
/// checkout.add_entity(&mut rect);
/// checkout.propagate().unwrap();
///
/// let (_, _, area) = rect.fields.unwrap();
/// assert_eq!(checkout.read(area).unwrap(), 12);
/// ```
pub trait Entity<V> {
    /// Stages this entity's identifiers in `checkout`.
    fn enter_graph(&mut self, checkout: &mut Checkout<V>);

    /// Stages the removal of this entity's identifiers from `checkout`.
    fn leave_graph(&mut self, checkout: &mut Checkout<V>);
}

impl<V: Clone + PartialEq> Checkout<V> {
    /// Stages `entity` into this checkout.
    pub fn add_entity<E: Entity<V> + ?Sized>(&mut self, entity: &mut E) {
        entity.enter_graph(self);
    }

    /// Stages every entity in `entities`.
    pub fn add_entities<'e, E: Entity<V> + ?Sized + 'e>(
        &mut self,
        entities: impl IntoIterator<Item = &'e mut E>,
    ) {
        for entity in entities {
            entity.enter_graph(self);
        }
    }

    /// Stages the removal of `entity`.
    pub fn remove_entity<E: Entity<V> + ?Sized>(&mut self, entity: &mut E) {
        entity.leave_graph(self);
    }

    /// Stages the removal of every entity in `entities`.
    pub fn remove_entities<'e, E: Entity<V> + ?Sized + 'e>(
        &mut self,
        entities: impl IntoIterator<Item = &'e mut E>,
    ) {
        for entity in entities {
            entity.leave_graph(self);
        }
    }

    /// Adds `entities`, propagates, then stages their removal again.
    ///
    /// Useful for evaluating temporary entities against the current state.
    /// The removal is left pending: the next propagation drops them.
    ///
    /// # Errors
    ///
    /// See [`Checkout::propagate_with`].
    pub fn try_propagate_with_entities<E: Entity<V>>(
        &mut self,
        entities: &mut [E],
        resolver: &mut dyn EffectResolver<V>,
    ) -> Result<RevisionId, ChronoError> {
        self.add_entities(entities.iter_mut());
        let result = self.propagate_with(resolver);
        self.remove_entities(entities.iter_mut());
        result
    }
}
