//! Dependency resolution.
//!
//! Orders atoms so that every dependency precedes its dependents, and finds
//! concrete cycle paths when no such order exists.
//!
//! ## Determinism Guarantees
//!
//! - Atoms are ranked by ascending ID once; every ready-queue tie-break and
//!   every DFS root/neighbor choice uses that rank
//! - No hash-container iteration order ever reaches the output
//!
//! ## Robustness
//!
//! - Missing entries and blank IDs are filtered by [`sanitize_atoms`] before
//!   any graph is built
//! - Dangling dependency IDs are ignored; duplicate edges are collapsed
//! - Cycle search uses an explicit heap-allocated stack, so chain depth is
//!   bounded by memory rather than the call stack

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::types::{Atom, AtomId, CompileError, CycleError, InputError, OrderedAtom};

/// How often (in processed atoms) long loops poll the cancellation token.
pub(crate) const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Anything that can be fed to [`sanitize_atoms`] as one input entry.
///
/// `None` models a missing entry (e.g. a JSON `null` or an entry that
/// failed to parse).
pub trait AtomEntry {
    /// Convert into an optional shared atom.
    fn into_entry(self) -> Option<Arc<Atom>>;
}

impl AtomEntry for Atom {
    fn into_entry(self) -> Option<Arc<Atom>> {
        Some(Arc::new(self))
    }
}

impl AtomEntry for Arc<Atom> {
    fn into_entry(self) -> Option<Arc<Atom>> {
        Some(self)
    }
}

impl AtomEntry for Option<Atom> {
    fn into_entry(self) -> Option<Arc<Atom>> {
        self.map(Arc::new)
    }
}

impl AtomEntry for Option<Arc<Atom>> {
    fn into_entry(self) -> Option<Arc<Atom>> {
        self
    }
}

/// Output of [`sanitize_atoms`].
#[derive(Debug, Clone, Default)]
pub struct SanitizedAtoms {
    /// Valid atoms with unique IDs, in input order.
    pub atoms: Vec<Arc<Atom>>,
    /// Entries that were filtered out.
    pub rejected: Vec<InputError>,
}

/// Filter missing entries, blank IDs and duplicate IDs (first occurrence wins).
pub fn sanitize_atoms<I>(input: I) -> SanitizedAtoms
where
    I: IntoIterator,
    I::Item: AtomEntry,
{
    let mut out = SanitizedAtoms::default();
    let mut seen: HashSet<AtomId> = HashSet::new();

    for (index, entry) in input.into_iter().enumerate() {
        let Some(atom) = entry.into_entry() else {
            out.rejected.push(InputError::MissingAtom { index });
            continue;
        };
        if atom.id.is_blank() {
            out.rejected.push(InputError::EmptyId { index });
            continue;
        }
        if !seen.insert(atom.id.clone()) {
            out.rejected.push(InputError::DuplicateId { id: atom.id.clone(), index });
            continue;
        }
        out.atoms.push(atom);
    }

    if !out.rejected.is_empty() {
        tracing::warn!(
            rejected = out.rejected.len(),
            accepted = out.atoms.len(),
            "Filtered malformed atom entries"
        );
    }

    out
}

/// Dependency graph over a set of atoms, indexed by ID rank.
///
/// Rank `i` is the position of the atom in ascending-ID order, so comparing
/// ranks is comparing IDs.
pub(crate) struct DependencyGraph<'a> {
    /// Atoms sorted by ID.
    nodes: Vec<&'a Arc<Atom>>,
    /// Deduplicated dependency ranks per node, ascending.
    deps: Vec<Vec<usize>>,
    /// Reverse edges: nodes that depend on each node.
    dependents: Vec<Vec<usize>>,
}

impl<'a> DependencyGraph<'a> {
    /// Build the graph. Later atoms with an already-seen ID are ignored.
    pub(crate) fn build(atoms: &'a [Arc<Atom>]) -> Self {
        let mut nodes: Vec<&'a Arc<Atom>> = Vec::with_capacity(atoms.len());
        {
            let mut seen: HashSet<&str> = HashSet::with_capacity(atoms.len());
            for atom in atoms {
                if atom.id.is_blank() {
                    continue;
                }
                if seen.insert(atom.id.as_str()) {
                    nodes.push(atom);
                }
            }
        }
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let rank: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.as_str(), i))
            .collect();

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(nodes.len());
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

        for (i, atom) in nodes.iter().enumerate() {
            let mut d: Vec<usize> = atom
                .depends_on
                .iter()
                .filter_map(|dep| rank.get(dep.as_str()).copied())
                .collect();
            d.sort_unstable();
            d.dedup();
            for &dep in &d {
                dependents[dep].push(i);
            }
            deps.push(d);
        }

        Self { nodes, deps, dependents }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    fn id(&self, rank: usize) -> &AtomId {
        &self.nodes[rank].id
    }

    /// Kahn's algorithm with a min-rank ready queue.
    ///
    /// Stops early, with `cancelled` set, if the token fires.
    fn kahn(&self, cancel: Option<&CancellationToken>) -> KahnOutcome {
        let n = self.len();
        let mut in_degree: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        let mut emitted = vec![false; n];

        while let Some(Reverse(node)) = ready.pop() {
            if order.len() % CANCEL_CHECK_INTERVAL == 0 && cancel.is_some_and(|c| c.is_cancelled()) {
                return KahnOutcome { order, unresolved: Vec::new(), cancelled: true };
            }
            order.push(node);
            emitted[node] = true;
            for &dependent in &self.dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        let unresolved = (0..n).filter(|&i| !emitted[i]).collect();
        KahnOutcome { order, unresolved, cancelled: false }
    }

    /// Iterative DFS for a back edge, following dependency edges.
    ///
    /// Only nodes with `allowed[i]` are visited (all when `None`). Roots and
    /// neighbors are visited in ascending rank.
    fn find_cycle(&self, allowed: Option<&[bool]>) -> Option<Vec<usize>> {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let n = self.len();
        let is_allowed = |i: usize| allowed.map_or(true, |a| a[i]);
        let mut color = vec![WHITE; n];
        let mut stack_pos = vec![usize::MAX; n];
        // (node, index of the next dependency to explore)
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..n {
            if color[root] != WHITE || !is_allowed(root) {
                continue;
            }
            color[root] = GRAY;
            stack_pos[root] = 0;
            stack.push((root, 0));

            while let Some(&(node, next)) = stack.last() {
                let Some(&dep) = self.deps[node].get(next) else {
                    color[node] = BLACK;
                    stack.pop();
                    continue;
                };
                let top = stack.len() - 1;
                stack[top].1 += 1;

                if !is_allowed(dep) {
                    continue;
                }
                match color[dep] {
                    WHITE => {
                        color[dep] = GRAY;
                        stack_pos[dep] = stack.len();
                        stack.push((dep, 0));
                    }
                    GRAY => {
                        let mut path: Vec<usize> =
                            stack[stack_pos[dep]..].iter().map(|(n, _)| *n).collect();
                        path.push(dep);
                        return Some(path);
                    }
                    _ => {}
                }
            }
        }

        None
    }

    fn cycle_error(&self, unresolved: &[usize]) -> CycleError {
        let mut allowed = vec![false; self.len()];
        for &i in unresolved {
            allowed[i] = true;
        }
        // Every unresolved node has an unresolved dependency, so a cycle
        // always exists inside the unresolved set.
        let path = self
            .find_cycle(Some(&allowed))
            .unwrap_or_default()
            .into_iter()
            .map(|i| self.id(i).clone())
            .collect();
        CycleError {
            path,
            unresolved: unresolved.iter().map(|&i| self.id(i).clone()).collect(),
        }
    }

    fn to_ordered(&self, order: &[usize]) -> Vec<OrderedAtom> {
        order
            .iter()
            .enumerate()
            .map(|(position, &i)| OrderedAtom {
                atom: Arc::clone(self.nodes[i]),
                position,
            })
            .collect()
    }
}

struct KahnOutcome {
    order: Vec<usize>,
    unresolved: Vec<usize>,
    cancelled: bool,
}

/// Result of a resolution that tolerates cycles.
#[derive(Debug, Clone)]
pub struct PartialResolution {
    /// Topological order of every atom that could be ordered.
    pub ordered: Vec<OrderedAtom>,
    /// The cycle that blocked the rest, if any.
    pub cycle: Option<CycleError>,
}

/// Order atoms so dependencies precede dependents.
///
/// Ties are broken by ascending atom ID. Any cycle yields a [`CycleError`]
/// with a concrete path; a partial order is never returned.
pub fn resolve(atoms: &[Arc<Atom>]) -> Result<Vec<OrderedAtom>, CycleError> {
    let graph = DependencyGraph::build(atoms);
    let outcome = graph.kahn(None);
    if outcome.unresolved.is_empty() {
        Ok(graph.to_ordered(&outcome.order))
    } else {
        Err(graph.cycle_error(&outcome.unresolved))
    }
}

/// Cancellable variant of [`resolve`].
pub fn resolve_cancellable(
    atoms: &[Arc<Atom>],
    cancel: &CancellationToken,
) -> Result<Vec<OrderedAtom>, CompileError> {
    let resolution = resolve_partial(atoms, Some(cancel))?;
    match resolution.cycle {
        Some(cycle) => Err(CompileError::Cycle(cycle)),
        None => Ok(resolution.ordered),
    }
}

/// Order every atom that can be ordered and report the blocking cycle.
///
/// Atoms that are part of, or depend on, a cycle are left out of
/// `ordered`; the remaining order is still a valid topological order.
pub fn resolve_partial(
    atoms: &[Arc<Atom>],
    cancel: Option<&CancellationToken>,
) -> Result<PartialResolution, CompileError> {
    let graph = DependencyGraph::build(atoms);
    let KahnOutcome { order, unresolved, cancelled } = graph.kahn(cancel);
    if cancelled {
        return Err(CompileError::Cancelled);
    }

    let cycle = if unresolved.is_empty() {
        None
    } else {
        let err = graph.cycle_error(&unresolved);
        tracing::debug!(
            cycle = %err,
            unresolved = unresolved.len(),
            "Dependency cycle detected"
        );
        Some(err)
    };

    tracing::trace!(atoms = graph.len(), ordered = order.len(), "Resolved dependency order");

    Ok(PartialResolution {
        ordered: graph.to_ordered(&order),
        cycle,
    })
}

/// Find a dependency cycle, returning its path (first == last).
///
/// `["A", "B", "A"]` means A depends on B and B depends on A. Self-loops
/// yield `["A", "A"]`.
pub fn detect_cycles(atoms: &[Arc<Atom>]) -> Option<Vec<AtomId>> {
    let graph = DependencyGraph::build(atoms);
    graph
        .find_cycle(None)
        .map(|path| path.into_iter().map(|i| graph.id(i).clone()).collect())
}
