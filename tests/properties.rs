//! Property tests for ordering, cycle detection and budget fitting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use prompt_kernel::{detect_cycles, fit, resolve, sort_by_category, Atom, OrderedAtom};
use proptest::prelude::*;

const CATEGORIES: [&str; 8] = [
    "identity", "methodology", "tooling", "constraints", "context", "examples", "zeta", "alpha",
];

/// IDs are scrambled so that ID order and dependency order disagree.
fn id_of(i: usize) -> String {
    format!("n{:02}", (i * 7) % 31)
}

/// Acyclic: atom `i` may only depend on atoms `< i`.
fn acyclic_atoms(specs: &[(usize, u32, i32, Vec<usize>)]) -> Vec<Arc<Atom>> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (cat, cost, priority, deps))| {
            let deps: Vec<String> = if i == 0 {
                Vec::new()
            } else {
                deps.iter().map(|d| id_of(d % i)).collect()
            };
            Arc::new(
                Atom::new(id_of(i), CATEGORIES[*cat])
                    .with_deps(deps)
                    .with_cost(*cost)
                    .with_priority(*priority),
            )
        })
        .collect()
}

/// Arbitrary edges, cycles allowed.
fn arbitrary_atoms(n: usize, edges: &[(usize, usize)]) -> Vec<Arc<Atom>> {
    let mut deps: Vec<Vec<String>> = vec![Vec::new(); n];
    for &(from, to) in edges {
        deps[from % n].push(id_of(to % n));
    }
    deps.into_iter()
        .enumerate()
        .map(|(i, d)| Arc::new(Atom::new(id_of(i), "context").with_deps(d)))
        .collect()
}

fn assert_deps_precede(ordered: &[OrderedAtom]) {
    let pos: HashMap<&str, usize> = ordered
        .iter()
        .enumerate()
        .map(|(i, o)| (o.id().as_str(), i))
        .collect();
    for (i, o) in ordered.iter().enumerate() {
        for dep in &o.atom.depends_on {
            if let Some(&p) = pos.get(dep.as_str()) {
                assert!(p < i, "{} must precede {}", dep, o.id());
            }
        }
    }
}

fn atom_spec() -> impl Strategy<Value = (usize, u32, i32, Vec<usize>)> {
    (
        0..CATEGORIES.len(),
        0..40u32,
        -2..3i32,
        proptest::collection::vec(0..31usize, 0..4),
    )
}

proptest! {
    #[test]
    fn prop_dependencies_precede_dependents(
        specs in proptest::collection::vec(atom_spec(), 1..31)
    ) {
        let atoms = acyclic_atoms(&specs);
        let resolved = resolve(&atoms).unwrap();
        prop_assert_eq!(resolved.len(), atoms.len());
        assert_deps_precede(&resolved);

        // Category grouping never breaks dependency order.
        let sorted = sort_by_category(resolved);
        prop_assert_eq!(sorted.len(), atoms.len());
        assert_deps_precede(&sorted);
    }

    #[test]
    fn prop_fit_respects_budget_and_dependencies(
        specs in proptest::collection::vec(atom_spec(), 1..31),
        budget in -10..400i64,
    ) {
        let atoms = acyclic_atoms(&specs);
        let sorted = sort_by_category(resolve(&atoms).unwrap());
        let result = fit(&sorted, budget);

        prop_assert!(result.utilization.is_finite());
        prop_assert_eq!(result.selected.len() + result.dropped.len(), sorted.len());
        prop_assert_eq!(result.truncated, !result.dropped.is_empty());
        if budget > 0 {
            prop_assert!(result.used_tokens <= budget as u64);
            prop_assert!(result.utilization <= 1.0);
        } else {
            prop_assert!(result.selected.is_empty());
            prop_assert_eq!(result.utilization, 0.0);
        }

        let selected: HashSet<&str> = result.selected.iter().map(|o| o.id().as_str()).collect();
        for o in &result.selected {
            for dep in &o.atom.depends_on {
                prop_assert!(selected.contains(dep.as_str()), "{} selected without {}", o.id(), dep);
            }
        }
        assert_deps_precede(&result.selected);
    }

    #[test]
    fn prop_cycle_paths_are_real_cycles(
        n in 1..31usize,
        edges in proptest::collection::vec((0..31usize, 0..31usize), 0..60)
    ) {
        let atoms = arbitrary_atoms(n, &edges);
        let by_id: HashMap<&str, &Atom> = atoms.iter().map(|a| (a.id.as_str(), a.as_ref())).collect();

        match resolve(&atoms) {
            Ok(ordered) => {
                prop_assert!(detect_cycles(&atoms).is_none());
                assert_deps_precede(&ordered);
            }
            Err(err) => {
                let path = detect_cycles(&atoms).expect("resolve failed, so a cycle exists");
                prop_assert!(path.len() >= 2);
                prop_assert_eq!(path.first(), path.last());
                for pair in path.windows(2) {
                    let from = by_id[pair[0].as_str()];
                    prop_assert!(from.depends_on.contains(&pair[1]));
                }

                prop_assert!(err.path.len() >= 2);
                prop_assert_eq!(err.path.first(), err.path.last());
                prop_assert!(!err.unresolved.is_empty());
            }
        }
    }

    #[test]
    fn prop_resolution_is_deterministic(
        specs in proptest::collection::vec(atom_spec(), 1..31)
    ) {
        let atoms = acyclic_atoms(&specs);
        let mut shuffled = atoms.clone();
        shuffled.reverse();

        let a = sort_by_category(resolve(&atoms).unwrap());
        let b = sort_by_category(resolve(&shuffled).unwrap());
        let ids_a: Vec<&str> = a.iter().map(|o| o.id().as_str()).collect();
        let ids_b: Vec<&str> = b.iter().map(|o| o.id().as_str()).collect();
        prop_assert_eq!(ids_a, ids_b);
    }
}
