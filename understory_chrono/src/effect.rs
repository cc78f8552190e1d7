// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resolution of external effects requested by calculation routines.

use crate::identifier::Identifier;

/// Answers effect requests made through [`Context::effect`](crate::Context::effect).
///
/// A routine can be re-driven several times during one propagation; the
/// transaction replays earlier answers, so the resolver sees each request once.
///
/// Closures `FnMut(Identifier, &V) -> Result<V, String>` implement this trait.
///
/// The resolver runs while the checkout holds the lock on its shared
/// [`Timeline`](crate::Timeline). It must not call locking methods such as
/// [`Checkout::name`](crate::Checkout::name), [`Checkout::read_at`](crate::Checkout::read_at)
/// or [`Checkout::branch`](crate::Checkout::branch) on any checkout of that
/// timeline; doing so deadlocks.
///
/// ```
/// use understory_chrono::{Checkout, Context, Identifier};
///
/// let mut checkout = Checkout::<i64>::new();
/// let fetch = checkout.impure_identifier(|ctx: &mut Context<'_, i64>| {
///     let key = ctx.args().first().copied().unwrap_or_default();
///     ctx.effect(key)
/// });
/// checkout.call(fetch, vec![21]);
///
/// let mut requests = Vec::new();
/// checkout
///     .propagate_with(&mut |_source: Identifier, request: &i64| {
///         requests.push(*request);
///         Ok::<_, String>(request * 2)
///     })
///     .unwrap();
///
/// assert_eq!(checkout.read(fetch).unwrap(), 42);
/// assert_eq!(requests, [21]);
/// ```
pub trait EffectResolver<V> {
    /// Resolves `effect`, requested by the routine of `source`.
    ///
    /// # Errors
    ///
    /// An `Err` rejects the effect; the propagation fails with
    /// [`ChronoError::EffectRejected`](crate::ChronoError::EffectRejected).
    fn resolve(&mut self, source: Identifier, effect: &V) -> Result<V, String>;
}

impl<V, F> EffectResolver<V> for F
where
    F: FnMut(Identifier, &V) -> Result<V, String>,
{
    fn resolve(&mut self, source: Identifier, effect: &V) -> Result<V, String> {
        self(source, effect)
    }
}

/// Resolves every effect to the requested value itself.
///
/// This is the resolver used by [`Checkout::propagate`](crate::Checkout::propagate).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AcceptEffects;

impl<V: Clone> EffectResolver<V> for AcceptEffects {
    fn resolve(&mut self, _source: Identifier, effect: &V) -> Result<V, String> {
        Ok(effect.clone())
    }
}
