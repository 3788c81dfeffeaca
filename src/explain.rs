//! Compilation explain reports.
//!
//! An [`ExplainReport`] records what every pipeline stage decided for one
//! atom set, without touching the cache. It is the debugging counterpart of
//! a compiled prompt.

use serde::{Deserialize, Serialize};

use crate::category::CategoryGroup;
use crate::types::{AtomId, CycleError, DroppedAtom, Fingerprint, InputError};

/// Per-stage trace of one compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainReport {
    /// Cache key the compilation would use.
    pub fingerprint: Fingerprint,
    /// Entries filtered out before resolution (and cycle drops).
    pub rejected: Vec<InputError>,
    /// Dependency order, before category grouping.
    pub resolved_order: Vec<AtomId>,
    /// Category groups in emission order.
    pub category_groups: Vec<CategoryGroup>,
    /// Atoms that fit the budget, in emission order.
    pub selected: Vec<AtomId>,
    /// Atoms dropped during budget fitting.
    pub dropped: Vec<DroppedAtom>,
    /// Blocking cycle, if any.
    pub cycle: Option<CycleError>,
    /// Tokens consumed by `selected`.
    pub used_tokens: u64,
    /// Effective budget.
    pub budget: i64,
    /// Budget utilization.
    pub utilization: f64,
    /// Whether atoms were dropped for budget reasons.
    pub truncated: bool,
}

impl ExplainReport {
    /// Pretty JSON rendering.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Whether the atom set compiles without a cycle error under
    /// [`CyclePolicy::Reject`](crate::config::CyclePolicy::Reject).
    pub fn is_acyclic(&self) -> bool {
        self.cycle.is_none()
    }
}
