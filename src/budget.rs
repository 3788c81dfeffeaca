//! Token budget fitting.
//!
//! ## Algorithm
//!
//! Single pass over the category-ordered sequence:
//!
//! 1. An atom whose dependency is not included is dropped (cascade)
//! 2. If it fits the remaining budget it is included
//! 3. Otherwise, already-included atoms with strictly lower priority are
//!    evicted (lowest priority first, latest first among equals) together
//!    with their included dependents, provided that frees enough room and
//!    no evicted atom is a dependency of, or at least as important as, the
//!    newcomer
//! 4. If eviction cannot make room, the atom is dropped
//!
//! Equal priorities never evict each other, so under uniform priority the
//! result is the longest fitting prefix (modulo dependency cascades).

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound::Excluded;

use tokio_util::sync::CancellationToken;

use crate::resolver::CANCEL_CHECK_INTERVAL;
use crate::types::{AtomId, CompileError, DropReason, DroppedAtom, OrderedAtom};

/// Output of [`fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetFit {
    /// Included atoms, in sequence order.
    pub selected: Vec<OrderedAtom>,
    /// Dropped atoms, in sequence order.
    pub dropped: Vec<DroppedAtom>,
    /// Tokens used by `selected`.
    pub used_tokens: u64,
    /// Budget the fit was computed against.
    pub budget: i64,
    /// `used_tokens / budget`, or [`DEGENERATE_UTILIZATION`] when `budget <= 0`.
    pub utilization: f64,
    /// Whether any atom was dropped.
    pub truncated: bool,
}

/// Utilization reported when the budget is zero or negative.
pub const DEGENERATE_UTILIZATION: f64 = 0.0;

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Pending,
    Included,
    Dropped(DropReason),
}

/// Compute budget utilization without ever dividing by a non-positive budget.
pub fn utilization(used_tokens: u64, budget: i64) -> f64 {
    if budget > 0 {
        used_tokens as f64 / budget as f64
    } else {
        DEGENERATE_UTILIZATION
    }
}

/// Select the atoms that fit in `budget` tokens.
///
/// A budget of zero or less selects nothing; it is not an error.
pub fn fit(ordered: &[OrderedAtom], budget: i64) -> BudgetFit {
    if budget <= 0 {
        return degenerate_fit(ordered, budget);
    }

    let mut fitter = Fitter::new(ordered, budget as u64);
    fitter.place_all(None);
    fitter.finish(budget)
}

/// [`fit`] that checks `cancel` every few thousand placements.
///
/// # Errors
///
/// [`CompileError::Cancelled`] if the token fires before the pass completes.
pub fn fit_cancellable(
    ordered: &[OrderedAtom],
    budget: i64,
    cancel: &CancellationToken,
) -> Result<BudgetFit, CompileError> {
    if cancel.is_cancelled() {
        return Err(CompileError::Cancelled);
    }
    if budget <= 0 {
        return Ok(degenerate_fit(ordered, budget));
    }

    let mut fitter = Fitter::new(ordered, budget as u64);
    if !fitter.place_all(Some(cancel)) {
        return Err(CompileError::Cancelled);
    }
    Ok(fitter.finish(budget))
}

fn degenerate_fit(ordered: &[OrderedAtom], budget: i64) -> BudgetFit {
    BudgetFit {
        selected: Vec::new(),
        dropped: ordered
            .iter()
            .map(|o| DroppedAtom {
                id: o.id().clone(),
                token_cost: o.atom.token_cost,
                reason: DropReason::DegenerateBudget,
            })
            .collect(),
        used_tokens: 0,
        budget,
        utilization: DEGENERATE_UTILIZATION,
        truncated: !ordered.is_empty(),
    }
}

/// Epoch-stamped index set. `clear` is O(1), so one buffer serves every
/// eviction attempt of a pass.
struct Marks {
    stamps: Vec<u32>,
    epoch: u32,
}

impl Marks {
    fn new(n: usize) -> Self {
        Self { stamps: vec![0; n], epoch: 1 }
    }

    fn clear(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            self.stamps.fill(0);
            self.epoch = 1;
        }
    }

    /// Returns `false` if `i` was already marked.
    fn insert(&mut self, i: usize) -> bool {
        if self.stamps[i] == self.epoch {
            return false;
        }
        self.stamps[i] = self.epoch;
        true
    }

    fn contains(&self, i: usize) -> bool {
        self.stamps[i] == self.epoch
    }
}

/// Eviction order key: lowest priority first, then latest index first.
type EvictionKey = (i32, Reverse<usize>);

struct Fitter<'a> {
    ordered: &'a [OrderedAtom],
    budget: u64,
    /// In-set dependencies, by sequence index.
    deps: Vec<Vec<usize>>,
    /// In-set dependents, by sequence index.
    dependents: Vec<Vec<usize>>,
    slots: Vec<Slot>,
    used: u64,
    /// Every included atom, in eviction order.
    evictable: BTreeSet<EvictionKey>,
    /// Transitive dependencies of the atom being placed.
    protected: Marks,
    /// Atoms already in the current eviction plan.
    planned: Marks,
    /// Visited set of one cascade walk.
    seen: Marks,
}

impl<'a> Fitter<'a> {
    fn new(ordered: &'a [OrderedAtom], budget: u64) -> Self {
        let n = ordered.len();
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(n);
        for (i, o) in ordered.iter().enumerate() {
            index.entry(o.id().as_str()).or_insert(i);
        }

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(n);
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, o) in ordered.iter().enumerate() {
            let mut d: Vec<usize> = o
                .atom
                .depends_on
                .iter()
                .filter_map(|dep| index.get(dep.as_str()).copied())
                .filter(|&d| d != i)
                .collect();
            d.sort_unstable();
            d.dedup();
            for &dep in &d {
                dependents[dep].push(i);
            }
            deps.push(d);
        }

        Self {
            ordered,
            budget,
            deps,
            dependents,
            slots: vec![Slot::Pending; n],
            used: 0,
            evictable: BTreeSet::new(),
            protected: Marks::new(n),
            planned: Marks::new(n),
            seen: Marks::new(n),
        }
    }

    /// Place every atom in sequence order. Returns `false` if `cancel`
    /// fired part way through.
    fn place_all(&mut self, cancel: Option<&CancellationToken>) -> bool {
        for i in 0..self.ordered.len() {
            if i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_some_and(CancellationToken::is_cancelled) {
                return false;
            }
            self.place(i);
        }
        true
    }

    fn cost(&self, i: usize) -> u64 {
        u64::from(self.ordered[i].atom.token_cost)
    }

    fn priority(&self, i: usize) -> i32 {
        self.ordered[i].atom.priority
    }

    fn place(&mut self, i: usize) {
        // A dependency later in the sequence is still Pending here, which
        // also counts as missing.
        if let Some(&missing) = self.deps[i].iter().find(|&&d| self.slots[d] != Slot::Included) {
            self.slots[i] = Slot::Dropped(DropReason::MissingDependency {
                dependency: self.ordered[missing].id().clone(),
            });
            return;
        }

        let cost = self.cost(i);
        if self.used + cost <= self.budget {
            self.include(i);
            return;
        }

        if self.try_evict_for(i) {
            self.include(i);
        } else {
            self.slots[i] = Slot::Dropped(DropReason::OverBudget);
        }
    }

    fn include(&mut self, i: usize) {
        self.used += self.cost(i);
        self.slots[i] = Slot::Included;
        self.evictable.insert((self.priority(i), Reverse(i)));
    }

    fn evict(&mut self, k: usize, by: &AtomId) {
        self.evictable.remove(&(self.priority(k), Reverse(k)));
        self.slots[k] = Slot::Dropped(DropReason::Evicted { by: by.clone() });
    }

    /// Evict lower-priority atoms to make room for `i`. Returns whether
    /// enough room was freed (evictions are applied only in that case).
    fn try_evict_for(&mut self, i: usize) -> bool {
        let cost = self.cost(i);
        if cost > self.budget {
            return false;
        }
        let priority = self.priority(i);
        // Excludes every key at `priority` itself: Reverse(usize::MAX) is
        // the smallest index key.
        let bound: EvictionKey = (priority, Reverse(usize::MAX));
        if self.evictable.range(..bound).next().is_none() {
            return false;
        }
        let need = self.used + cost - self.budget;

        self.mark_ancestors(i);
        self.planned.clear();
        let mut plan: Vec<usize> = Vec::new();
        let mut freed = 0u64;

        // Walk candidates lazily; each step is one tree lookup.
        let mut cursor: Option<EvictionKey> = None;
        while freed < need {
            let next = match cursor {
                None => self.evictable.range(..bound).next(),
                Some(after) => self.evictable.range((Excluded(after), Excluded(bound))).next(),
            };
            let Some(&key) = next else { break };
            cursor = Some(key);

            let (_, Reverse(j)) = key;
            if self.planned.contains(j) || self.protected.contains(j) {
                continue;
            }
            let Some(cascade) = self.eviction_cascade(j, priority) else {
                continue;
            };
            for &k in &cascade {
                self.planned.insert(k);
                freed += self.cost(k);
            }
            plan.extend(cascade);
        }

        if freed < need {
            return false;
        }

        let by = self.ordered[i].id().clone();
        for k in plan {
            self.evict(k, &by);
        }
        self.used -= freed;
        true
    }

    /// `j` plus every included atom that transitively depends on it, minus
    /// atoms already planned.
    ///
    /// `None` if the cascade would touch a protected atom or one with
    /// priority `>= limit`.
    fn eviction_cascade(&mut self, j: usize, limit: i32) -> Option<Vec<usize>> {
        self.seen.clear();
        self.seen.insert(j);
        let mut out = Vec::new();
        let mut stack = vec![j];

        while let Some(k) = stack.pop() {
            if self.protected.contains(k) || self.priority(k) >= limit {
                return None;
            }
            if !self.planned.contains(k) {
                out.push(k);
            }
            for &d in &self.dependents[k] {
                if self.slots[d] == Slot::Included && self.seen.insert(d) {
                    stack.push(d);
                }
            }
        }

        Some(out)
    }

    /// Mark the transitive dependencies of `i` as protected.
    fn mark_ancestors(&mut self, i: usize) {
        self.protected.clear();
        let mut stack: Vec<usize> = self.deps[i].clone();
        while let Some(k) = stack.pop() {
            if self.protected.insert(k) {
                stack.extend(self.deps[k].iter().copied());
            }
        }
    }

    fn finish(self, budget: i64) -> BudgetFit {
        let mut selected = Vec::new();
        let mut dropped = Vec::new();

        for (i, slot) in self.slots.into_iter().enumerate() {
            let o = &self.ordered[i];
            match slot {
                Slot::Included => selected.push(o.clone()),
                Slot::Dropped(reason) => dropped.push(DroppedAtom {
                    id: o.id().clone(),
                    token_cost: o.atom.token_cost,
                    reason,
                }),
                Slot::Pending => {}
            }
        }

        BudgetFit {
            truncated: !dropped.is_empty(),
            selected,
            dropped,
            used_tokens: self.used,
            budget,
            utilization: utilization(self.used, budget),
        }
    }
}
