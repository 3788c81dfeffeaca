//! Compilation outputs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::atom::AtomId;
use super::context::Fingerprint;
use super::error::InputError;

/// Why an atom was left out of the compiled prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    /// Did not fit in the remaining budget.
    OverBudget,
    /// A dependency was dropped, so this atom was dropped too.
    MissingDependency {
        /// The dropped dependency.
        dependency: AtomId,
    },
    /// Evicted to make room for a higher-priority atom.
    Evicted {
        /// The atom that took its place.
        by: AtomId,
    },
    /// Budget was zero or negative.
    DegenerateBudget,
}

/// An atom excluded during budget fitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedAtom {
    /// The dropped atom.
    pub id: AtomId,
    /// Its token cost.
    pub token_cost: u32,
    /// Why it was dropped.
    #[serde(flatten)]
    pub reason: DropReason,
}

/// The immutable product of one compilation.
///
/// Shared behind an `Arc` between the cache and every caller that
/// receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPrompt {
    /// Cache key this prompt was compiled under.
    pub fingerprint: Fingerprint,
    /// Rendered prompt text.
    pub text: String,
    /// SHA-256 of the canonical rendered text.
    pub content_hash: String,
    /// Atoms included, in emission order.
    pub included: Vec<AtomId>,
    /// Atoms dropped during budget fitting.
    pub dropped: Vec<DroppedAtom>,
    /// Input entries filtered out before resolution.
    pub rejected: Vec<InputError>,
    /// Tokens consumed by included atoms.
    pub used_tokens: u64,
    /// Effective budget (after reserved output tokens).
    pub budget: i64,
    /// `used_tokens / budget`, or 0 when `budget <= 0`.
    pub utilization: f64,
    /// Whether any atom was dropped for budget reasons.
    pub truncated: bool,
}

/// What [`Compiler::compile`](crate::Compiler::compile) returns.
#[derive(Debug, Clone)]
pub struct CompilationResult {
    /// The compiled prompt (shared with the cache).
    pub prompt: Arc<CompiledPrompt>,
    /// Whether this result was served from the cache or a coalesced
    /// in-flight compilation.
    pub cache_hit: bool,
}

impl CompilationResult {
    /// Rendered prompt text.
    pub fn text(&self) -> &str {
        &self.prompt.text
    }

    /// Included atom IDs, in emission order.
    pub fn included(&self) -> &[AtomId] {
        &self.prompt.included
    }

    /// Budget utilization ratio.
    pub fn utilization(&self) -> f64 {
        self.prompt.utilization
    }

    /// Whether atoms were dropped for budget reasons.
    pub fn truncated(&self) -> bool {
        self.prompt.truncated
    }

    /// Cache key.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.prompt.fingerprint
    }
}
