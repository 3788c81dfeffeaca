//! Error taxonomy for the compilation pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::atom::AtomId;

/// A dependency cycle found while resolving atoms.
///
/// `path` is a concrete cycle whose first and last elements are equal,
/// e.g. `["X", "Y", "X"]`. `unresolved` lists every atom that could not be
/// ordered (cycle members and their dependents), sorted by ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleError {
    /// Concrete cycle path.
    pub path: Vec<AtomId>,
    /// All atoms that could not be ordered.
    pub unresolved: Vec<AtomId>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<&str> = self.path.iter().map(AtomId::as_str).collect();
        write!(
            f,
            "dependency cycle: {} ({} unresolved atoms)",
            path.join(" -> "),
            self.unresolved.len()
        )
    }
}

impl std::error::Error for CycleError {}

/// A malformed input entry that was filtered out.
///
/// Never fatal: the entry is excluded and reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum InputError {
    /// Entry was missing entirely (null / failed to parse).
    #[error("Missing atom at index {index}")]
    MissingAtom {
        /// Position in the input.
        index: usize,
    },
    /// Atom had an empty or whitespace-only ID.
    #[error("Atom at index {index} has an empty id")]
    EmptyId {
        /// Position in the input.
        index: usize,
    },
    /// A later atom reused an ID already seen.
    #[error("Duplicate atom id {id} at index {index}")]
    DuplicateId {
        /// The repeated ID.
        id: AtomId,
        /// Position of the discarded duplicate.
        index: usize,
    },
    /// Atom could not be ordered and was dropped under a tolerant cycle policy.
    #[error("Atom {id} dropped: part of or downstream of a dependency cycle")]
    Cyclic {
        /// The dropped atom.
        id: AtomId,
    },
}

/// Error returned by [`Compiler::compile`](crate::Compiler::compile).
///
/// `Clone` so that one coalesced compilation can hand the same error to
/// every waiting caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileError {
    /// The atom set contains a dependency cycle.
    #[error("{0}")]
    Cycle(#[from] CycleError),
    /// Duplicate atom IDs with duplicate tolerance disabled.
    #[error("Duplicate atom id: {id}")]
    DuplicateAtom {
        /// The repeated ID.
        id: AtomId,
    },
    /// The caller's cancellation token fired while compiling or waiting.
    #[error("Compilation cancelled")]
    Cancelled,
    /// The atom source failed.
    #[error("Atom source error: {0}")]
    Source(String),
    /// Unexpected internal failure (e.g. a panicking compute path).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Create a source error from any error type.
    pub fn from_source<E: std::error::Error>(e: E) -> Self {
        Self::Source(e.to_string())
    }

    /// Whether this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
