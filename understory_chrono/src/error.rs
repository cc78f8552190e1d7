// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy.

use crate::identifier::Identifier;
use crate::revision::RevisionId;

/// Errors reported by checkouts, transactions and the revision timeline.
///
/// Every error is local to the operation that produced it: a failed
/// propagation leaves the checkout's committed state untouched.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChronoError {
    /// The identifier has no quark in any reachable revision, or it was removed.
    #[error("unknown identifier {0}")]
    UnknownIdentifier(Identifier),
    /// Propagation found a dependency cycle.
    ///
    /// `path` starts and ends with the same identifier.
    #[error("cyclic dependency: {}", format_path(.path))]
    CyclicDependency {
        /// Identifiers along the cycle.
        path: Vec<Identifier>,
    },
    /// A compaction precondition was violated.
    #[error("cannot compact {revision} into {previous}")]
    InvalidCompaction {
        /// The revision that would absorb its predecessor.
        revision: RevisionId,
        /// The predecessor that would be absorbed.
        previous: RevisionId,
    },
    /// A calculation routine reported a failure.
    #[error("calculation of {identifier} failed: {message}")]
    Calculation {
        /// The identifier whose routine failed.
        identifier: Identifier,
        /// The routine's message.
        message: String,
    },
    /// The effect resolver refused an effect requested by a routine.
    #[error("effect requested by {identifier} was rejected: {message}")]
    EffectRejected {
        /// The identifier whose routine requested the effect.
        identifier: Identifier,
        /// The resolver's message.
        message: String,
    },
}

fn format_path(path: &[Identifier]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
