//! Golden tests for the Prompt Kernel.
//!
//! These tests pin the concrete ordering, cycle and budget scenarios and
//! verify determinism of the full pipeline.

use std::sync::Arc;
use prompt_kernel::{
    Atom, AtomId, Category, CompilationContext, Compiler, CompilerConfig, CompileError,
    CancellationToken, DropReason, OrderedAtom,
    resolve, detect_cycles, sanitize_atoms, sort_by_category, fit,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn make_atom(id: &str, category: &str, deps: &[&str]) -> Arc<Atom> {
    Arc::new(Atom::new(id, category).with_deps(deps.iter().copied()))
}

fn ids(ordered: &[OrderedAtom]) -> Vec<String> {
    ordered.iter().map(|o| o.id().to_string()).collect()
}

fn compiler_with_budget(budget: i64) -> Compiler {
    Compiler::new(CompilerConfig {
        token_budget: budget,
        reserved_output_tokens: 0,
        ..CompilerConfig::default()
    })
}

/// Mixed corpus with unknown, colliding categories and cross-group deps.
fn mixed_corpus() -> Vec<Arc<Atom>> {
    let categories = ["identity", "zeta", "tooling", "alpha", "examples", "zeta", "context", "alpha"];
    (0..40)
        .map(|i| {
            let deps: Vec<String> = if i >= 3 {
                vec![format!("atom_{:02}", i - 3)]
            } else {
                vec![]
            };
            Arc::new(
                Atom::new(format!("atom_{:02}", i), categories[i % categories.len()])
                    .with_deps(deps)
                    .with_cost(7 + (i as u32 % 5))
                    .with_priority((i % 4) as i32)
                    .with_content(format!("Content of atom {i}.")),
            )
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Golden Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn golden_identity_precedes_methodology() {
    let atoms = vec![make_atom("B", "methodology", &["A"]), make_atom("A", "identity", &[])];

    let resolved = resolve(&atoms).unwrap();
    assert_eq!(ids(&resolved), vec!["A", "B"]);

    let sorted = sort_by_category(resolved);
    assert_eq!(ids(&sorted), vec!["A", "B"]);
}

#[test]
fn golden_two_cycle_path() {
    let atoms = vec![make_atom("X", "context", &["Y"]), make_atom("Y", "context", &["X"])];

    let err = resolve(&atoms).unwrap_err();
    let path: Vec<&str> = err.path.iter().map(AtomId::as_str).collect();
    assert!(
        path == ["X", "Y", "X"] || path == ["Y", "X", "Y"],
        "unexpected cycle path {path:?}"
    );

    let detected = detect_cycles(&atoms).expect("cycle must be found");
    assert_eq!(detected.first(), detected.last());
    assert_eq!(detected.len(), 3);
}

#[test]
fn golden_budget_sixty_sixty() {
    let atoms = vec![
        Arc::new(Atom::new("first", "context").with_cost(60)),
        Arc::new(Atom::new("second", "context").with_cost(60)),
    ];
    let sorted = sort_by_category(resolve(&atoms).unwrap());
    let result = fit(&sorted, 100);

    assert_eq!(ids(&result.selected), vec!["first"]);
    assert!(result.truncated);
    assert!((result.utilization - 0.6).abs() < f64::EPSILON);
    assert_eq!(result.dropped.len(), 1);
    assert_eq!(result.dropped[0].reason, DropReason::OverBudget);
}

#[tokio::test]
async fn golden_compile_end_to_end() {
    let compiler = compiler_with_budget(100);
    let token = CancellationToken::new();
    let atoms = vec![
        Atom::new("persona", Category::Identity).with_cost(30).with_content("You are a careful engineer."),
        Atom::new("tdd", Category::Methodology).with_deps(["persona"]).with_cost(30).with_content("Write tests first."),
        Atom::new("shell", Category::Tooling).with_cost(30).with_content("You may run shell commands."),
        Atom::new("sample", Category::Examples).with_cost(30).with_content("Example: ls -la"),
    ];

    let result = compiler
        .compile(&token, atoms, &CompilationContext::new("engineer"))
        .await
        .unwrap();

    assert_eq!(
        result.text(),
        "You are a careful engineer.\n\nWrite tests first.\n\nYou may run shell commands."
    );
    assert_eq!(result.prompt.used_tokens, 90);
    assert!(result.truncated());
    assert_eq!(result.prompt.dropped[0].id.as_str(), "sample");
}

#[tokio::test]
async fn golden_empty_input_compiles_to_empty_prompt() {
    let compiler = Compiler::default();
    let token = CancellationToken::new();
    let result = compiler
        .compile(&token, Vec::<Atom>::new(), &CompilationContext::new("empty"))
        .await
        .unwrap();
    assert_eq!(result.text(), "");
    assert!(result.included().is_empty());
    assert!(!result.truncated());
    assert_eq!(result.utilization(), 0.0);
}

#[tokio::test]
async fn golden_cycle_error_propagates_through_compile() {
    let compiler = Compiler::default();
    let token = CancellationToken::new();
    let atoms = vec![
        Atom::new("X", "context").with_deps(["Y"]),
        Atom::new("Y", "context").with_deps(["X"]),
        Atom::new("free", "identity"),
    ];
    match compiler.compile(&token, atoms, &CompilationContext::new("s")).await {
        Err(CompileError::Cycle(cycle)) => {
            assert_eq!(cycle.path.first(), cycle.path.last());
            let unresolved: Vec<&str> = cycle.unresolved.iter().map(AtomId::as_str).collect();
            assert_eq!(unresolved, vec!["X", "Y"]);
        }
        other => panic!("expected cycle error, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Determinism
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn determinism_pipeline_hundred_runs() {
    let atoms = mixed_corpus();
    let reference = {
        let sorted = sort_by_category(resolve(&atoms).unwrap());
        fit(&sorted, 150)
    };

    for _ in 0..100 {
        let sorted = sort_by_category(resolve(&atoms).unwrap());
        let result = fit(&sorted, 150);
        assert_eq!(result, reference);
    }
}

#[tokio::test]
async fn determinism_compile_text_across_compilers() {
    let ctx = CompilationContext::new("shard")
        .with_language("en")
        .with_selector("tier", "pro");

    let first = compiler_with_budget(150)
        .compile(&CancellationToken::new(), mixed_corpus(), &ctx)
        .await
        .unwrap();

    for _ in 0..20 {
        let again = compiler_with_budget(150)
            .compile(&CancellationToken::new(), mixed_corpus(), &ctx)
            .await
            .unwrap();
        assert_eq!(again.text(), first.text());
        assert_eq!(again.fingerprint(), first.fingerprint());
        assert_eq!(again.prompt.content_hash, first.prompt.content_hash);
    }
}

#[test]
fn determinism_input_order_does_not_matter() {
    let atoms = mixed_corpus();
    let mut reversed = atoms.clone();
    reversed.reverse();

    let a = ids(&sort_by_category(resolve(&atoms).unwrap()));
    let b = ids(&sort_by_category(resolve(&reversed).unwrap()));
    assert_eq!(a, b);
}

// ─────────────────────────────────────────────────────────────────────────────
// Malformed Input
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn malformed_entries_are_excluded() {
    let input: Vec<Option<Atom>> = vec![
        None,
        Some(Atom::new("", "identity")),
        Some(Atom::new("   ", "identity")),
        Some(Atom::new("ok", "identity").with_deps(["ghost"])),
        None,
    ];
    let sanitized = sanitize_atoms(input);
    assert_eq!(sanitized.atoms.len(), 1);
    assert_eq!(sanitized.rejected.len(), 4);

    // Dangling dependency on "ghost" is ignored.
    let resolved = resolve(&sanitized.atoms).unwrap();
    assert_eq!(ids(&resolved), vec!["ok"]);
}

#[tokio::test]
async fn malformed_compile_never_panics() {
    let compiler = Compiler::default();
    let token = CancellationToken::new();
    let input: Vec<Option<Atom>> = vec![
        None,
        Some(Atom::new("a", "").with_deps(["a_missing", "", "a_missing"])),
        Some(Atom::new("a", "tooling")),
        Some(Atom::new("b", "\u{0}weird").with_deps(["a"]).with_cost(u32::MAX)),
    ];
    let result = compiler
        .compile(&token, input, &CompilationContext::new("s"))
        .await
        .unwrap();
    assert_eq!(result.included()[0].as_str(), "a");
    assert!(!result.prompt.rejected.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Budget Degeneracy
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn degenerate_budgets_select_nothing() {
    let sorted = sort_by_category(resolve(&mixed_corpus()).unwrap());
    for budget in [0, -5, i64::MIN] {
        let result = fit(&sorted, budget);
        assert!(result.selected.is_empty());
        assert_eq!(result.utilization, 0.0);
        assert!(result.utilization.is_finite());
        assert!(result.truncated);
        assert!(result.dropped.iter().all(|d| d.reason == DropReason::DegenerateBudget));
    }
}

#[test]
fn degenerate_budget_on_empty_input() {
    let result = fit(&[], 0);
    assert!(result.selected.is_empty());
    assert!(!result.truncated);
    assert_eq!(result.utilization, 0.0);
}
