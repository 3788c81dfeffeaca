//! Scale tests: deep chains and heavy eviction must not overflow the stack
//! or stall.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use prompt_kernel::{detect_cycles, resolve, sort_by_category, fit, Atom};

const CHAIN_LEN: usize = 100_000;

/// Generous bound; debug builds are far slower than reference hardware.
const TIME_BOUND: Duration = Duration::from_secs(20);

/// `A1 -> A2 -> ... -> An`, where each atom depends on its predecessor.
fn linear_chain(n: usize) -> Vec<Arc<Atom>> {
    (1..=n)
        .map(|i| {
            let atom = Atom::new(format!("A{i}"), "context").with_cost(1);
            let atom = if i > 1 { atom.with_deps([format!("A{}", i - 1)]) } else { atom };
            Arc::new(atom)
        })
        .collect()
}

#[test]
fn chain_resolves_in_dependency_order() {
    let atoms = linear_chain(CHAIN_LEN);
    let start = Instant::now();
    let ordered = resolve(&atoms).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(ordered.len(), CHAIN_LEN);
    for (i, o) in ordered.iter().enumerate() {
        assert_eq!(o.id().as_str(), format!("A{}", i + 1));
    }
    assert!(elapsed < TIME_BOUND, "resolve took {elapsed:?}");
}

#[test]
fn chain_cycle_check_is_iterative() {
    let atoms = linear_chain(CHAIN_LEN);
    let start = Instant::now();
    assert!(detect_cycles(&atoms).is_none());
    assert!(start.elapsed() < TIME_BOUND);
}

#[test]
fn chain_closed_into_a_ring_reports_full_cycle() {
    let mut atoms = linear_chain(CHAIN_LEN);
    atoms[0] = Arc::new(
        Atom::new("A1", "context").with_deps([format!("A{CHAIN_LEN}")]),
    );

    let start = Instant::now();
    let path = detect_cycles(&atoms).expect("ring must be a cycle");
    assert_eq!(path.first(), path.last());
    assert_eq!(path.len(), CHAIN_LEN + 1);

    let err = resolve(&atoms).unwrap_err();
    assert_eq!(err.unresolved.len(), CHAIN_LEN);
    assert!(start.elapsed() < TIME_BOUND);
}

#[test]
fn chain_full_pipeline_fits_prefix() {
    let atoms = linear_chain(CHAIN_LEN);
    let start = Instant::now();
    let sorted = sort_by_category(resolve(&atoms).unwrap());
    let result = fit(&sorted, 50_000);

    assert_eq!(result.selected.len(), 50_000);
    assert_eq!(result.selected.last().map(|o| o.id().as_str()), Some("A50000"));
    assert!(result.truncated);
    assert!(start.elapsed() < TIME_BOUND);
}

/// Independent unit-cost atoms whose priority is given by `priority(i)`.
fn flat_with_priorities(n: usize, priority: impl Fn(usize) -> i32) -> Vec<Arc<Atom>> {
    (0..n)
        .map(|i| {
            Arc::new(
                Atom::new(format!("P{i:06}"), "context")
                    .with_cost(1)
                    .with_priority(priority(i)),
            )
        })
        .collect()
}

#[test]
fn rising_priorities_evict_half_the_sequence() {
    let atoms = flat_with_priorities(CHAIN_LEN, |i| i as i32);
    let sorted = sort_by_category(resolve(&atoms).unwrap());
    let budget = (CHAIN_LEN / 2) as i64;

    let start = Instant::now();
    let result = fit(&sorted, budget);
    let elapsed = start.elapsed();

    assert_eq!(result.selected.len(), CHAIN_LEN / 2);
    assert_eq!(result.selected.first().map(|o| o.id().as_str()), Some("P050000"));
    assert_eq!(result.used_tokens, budget as u64);
    assert_eq!(result.dropped.len(), CHAIN_LEN / 2);
    assert!(elapsed < TIME_BOUND, "fit took {elapsed:?}");
}

#[test]
fn scattered_priorities_fit_within_bound() {
    let atoms = flat_with_priorities(CHAIN_LEN, |i| ((i * 7919) % 1000) as i32);
    let sorted = sort_by_category(resolve(&atoms).unwrap());
    let budget = (CHAIN_LEN / 2) as i64;

    let start = Instant::now();
    let result = fit(&sorted, budget);
    let elapsed = start.elapsed();

    assert_eq!(result.used_tokens, budget as u64);
    // With unit costs and no dependencies, no dropped atom outranks a survivor.
    let priority_of: HashMap<&str, i32> =
        sorted.iter().map(|o| (o.id().as_str(), o.atom.priority)).collect();
    let lowest_kept = result.selected.iter().map(|o| o.atom.priority).min().unwrap();
    let highest_dropped = result.dropped.iter().map(|d| priority_of[d.id.as_str()]).max().unwrap();
    assert!(highest_dropped <= lowest_kept);
    assert!(elapsed < TIME_BOUND, "fit took {elapsed:?}");
}
