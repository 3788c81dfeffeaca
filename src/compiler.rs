//! Compilation orchestrator.
//!
//! The compiler turns a candidate atom set and a context into one rendered
//! prompt. It owns the cache; every other stage is a pure function.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::budget::{self, BudgetFit};
use crate::cache::{CacheStats, CompilationCache, Generation};
use crate::category::{self, CategoryGroup};
use crate::config::{CompilerConfig, CyclePolicy};
use crate::explain::ExplainReport;
use crate::render::{compute_content_hash, PromptRenderer};
use crate::resolver::{resolve_partial, sanitize_atoms, AtomEntry, SanitizedAtoms};
use crate::types::{
    Atom, AtomId, CompilationContext, CompilationResult, CompileError, CompiledPrompt, CycleError,
    Fingerprint, InputError,
};

/// Prompt compiler.
///
/// ## Algorithm
///
/// 1. Filter missing, blank and duplicate entries
/// 2. Fingerprint the context together with the surviving atoms
/// 3. On a cache miss, in a single coalesced flight:
///    - Resolve dependency order (cycles fail or are dropped per
///      [`CyclePolicy`])
///    - Group by category
///    - Fit the effective token budget
///    - Render and hash the text
/// 4. Return the shared [`CompiledPrompt`]
///
/// Same atoms + same context + same config → byte-identical text.
pub struct Compiler {
    config: CompilerConfig,
    cache: CompilationCache,
    renderer: PromptRenderer,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}

impl Compiler {
    /// Create a compiler.
    pub fn new(config: CompilerConfig) -> Self {
        let cache = CompilationCache::new(config.cache.clone());
        let renderer = PromptRenderer::new(config.section_headers);
        Self { config, cache, renderer }
    }

    /// Configuration in use.
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// The compilation cache.
    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    /// Cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Compile atoms for a context.
    ///
    /// Missing entries and blank IDs are skipped and reported in
    /// [`CompiledPrompt::rejected`]. Returns [`CompileError::Cycle`] when the
    /// atoms contain a dependency cycle (under [`CyclePolicy::Reject`]), or
    /// [`CompileError::Cancelled`] when `cancel` fires first.
    ///
    /// The pipeline runs on Tokio's blocking pool, so this must be awaited
    /// inside a Tokio runtime.
    pub async fn compile<I>(
        &self,
        cancel: &CancellationToken,
        atoms: I,
        context: &CompilationContext,
    ) -> Result<CompilationResult, CompileError>
    where
        I: IntoIterator,
        I::Item: AtomEntry,
    {
        let generation = self.cache.generation();
        self.compile_with_generation(cancel, atoms, context, generation).await
    }

    /// Compile against a generation captured together with the atom source.
    pub(crate) async fn compile_with_generation<I>(
        &self,
        cancel: &CancellationToken,
        atoms: I,
        context: &CompilationContext,
        generation: Generation,
    ) -> Result<CompilationResult, CompileError>
    where
        I: IntoIterator,
        I::Item: AtomEntry,
    {
        let SanitizedAtoms { atoms, rejected } = self.sanitize(atoms)?;
        let fingerprint = context.fingerprint_with_atoms(&atoms);
        let budget = self.config.effective_budget(context.token_budget);

        let job = Arc::new(CompileJob {
            atoms,
            rejected,
            fingerprint: fingerprint.clone(),
            budget,
            tolerate_cycles: self.config.cycle_policy == CyclePolicy::DropCyclic,
            trace: self.config.trace,
            renderer: self.renderer,
        });

        let (prompt, cache_hit) = self
            .cache
            .get_or_compile(&fingerprint, generation, cancel, move |token| {
                let job = Arc::clone(&job);
                async move {
                    // The stages are CPU-bound; off the runtime threads the
                    // cache's select can still react to `cancel`.
                    match tokio::task::spawn_blocking(move || job.run(&token)).await {
                        Ok(output) => output.map(Arc::new),
                        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                        Err(e) => Err(CompileError::Internal(format!("compile task failed: {e}"))),
                    }
                }
            })
            .await?;

        tracing::debug!(
            fingerprint = %prompt.fingerprint,
            cache_hit,
            included = prompt.included.len(),
            dropped = prompt.dropped.len(),
            utilization = prompt.utilization,
            "Compiled prompt"
        );

        Ok(CompilationResult { prompt, cache_hit })
    }

    /// Run every stage without the cache and report what each decided.
    ///
    /// Cycles never fail an explain; they are reported in
    /// [`ExplainReport::cycle`] and the cyclic atoms are dropped.
    pub fn explain<I>(&self, atoms: I, context: &CompilationContext) -> Result<ExplainReport, CompileError>
    where
        I: IntoIterator,
        I::Item: AtomEntry,
    {
        let SanitizedAtoms { atoms, rejected } = self.sanitize(atoms)?;
        let fingerprint = context.fingerprint_with_atoms(&atoms);
        let budget = self.config.effective_budget(context.token_budget);
        let stages = run_stages(&atoms, rejected, budget, true, self.config.trace, None)?;

        Ok(ExplainReport {
            fingerprint,
            rejected: stages.rejected,
            resolved_order: stages.resolved_order,
            category_groups: stages.groups,
            selected: stages.fit.selected.iter().map(|o| o.id().clone()).collect(),
            used_tokens: stages.fit.used_tokens,
            budget: stages.fit.budget,
            utilization: stages.fit.utilization,
            truncated: stages.fit.truncated,
            dropped: stages.fit.dropped,
            cycle: stages.cycle,
        })
    }

    fn sanitize<I>(&self, atoms: I) -> Result<SanitizedAtoms, CompileError>
    where
        I: IntoIterator,
        I::Item: AtomEntry,
    {
        let sanitized = sanitize_atoms(atoms);
        if !self.config.tolerate_duplicate_ids {
            let duplicate = sanitized.rejected.iter().find_map(|e| match e {
                InputError::DuplicateId { id, .. } => Some(id.clone()),
                _ => None,
            });
            if let Some(id) = duplicate {
                return Err(CompileError::DuplicateAtom { id });
            }
        }
        Ok(sanitized)
    }
}

/// Everything one cached compilation needs, owned so the flight future is
/// `'static`.
struct CompileJob {
    atoms: Vec<Arc<Atom>>,
    rejected: Vec<InputError>,
    fingerprint: Fingerprint,
    budget: i64,
    tolerate_cycles: bool,
    trace: bool,
    renderer: PromptRenderer,
}

impl CompileJob {
    fn run(&self, cancel: &CancellationToken) -> Result<CompiledPrompt, CompileError> {
        let stages = run_stages(
            &self.atoms,
            self.rejected.clone(),
            self.budget,
            self.tolerate_cycles,
            self.trace,
            Some(cancel),
        )?;
        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        let text = self.renderer.render(&stages.fit.selected);
        let content_hash = compute_content_hash(&text);
        let BudgetFit { selected, dropped, used_tokens, budget, utilization, truncated } = stages.fit;

        Ok(CompiledPrompt {
            fingerprint: self.fingerprint.clone(),
            text,
            content_hash,
            included: selected.iter().map(|o| o.id().clone()).collect(),
            dropped,
            rejected: stages.rejected,
            used_tokens,
            budget,
            utilization,
            truncated,
        })
    }
}

struct Stages {
    rejected: Vec<InputError>,
    resolved_order: Vec<AtomId>,
    groups: Vec<CategoryGroup>,
    fit: BudgetFit,
    cycle: Option<CycleError>,
}

fn run_stages(
    atoms: &[Arc<Atom>],
    mut rejected: Vec<InputError>,
    budget: i64,
    tolerate_cycles: bool,
    trace: bool,
    cancel: Option<&CancellationToken>,
) -> Result<Stages, CompileError> {
    let resolution = resolve_partial(atoms, cancel)?;
    if let Some(cycle) = &resolution.cycle {
        if !tolerate_cycles {
            return Err(CompileError::Cycle(cycle.clone()));
        }
        tracing::warn!(cycle = %cycle, "Dropping atoms blocked by a dependency cycle");
        rejected.extend(cycle.unresolved.iter().map(|id| InputError::Cyclic { id: id.clone() }));
    }

    let resolved_order: Vec<AtomId> = resolution.ordered.iter().map(|o| o.id().clone()).collect();
    if trace {
        tracing::debug!(order = ?resolved_order, "Resolved dependency order");
    }

    if cancel.is_some_and(CancellationToken::is_cancelled) {
        return Err(CompileError::Cancelled);
    }

    let plan = category::plan(resolution.ordered);
    if trace {
        for group in &plan.groups {
            tracing::debug!(category = %group.category, atoms = ?group.atoms, "Category group");
        }
    }

    let fit = match cancel {
        Some(cancel) => budget::fit_cancellable(&plan.sorted, budget, cancel)?,
        None => budget::fit(&plan.sorted, budget),
    };
    tracing::trace!(
        selected = fit.selected.len(),
        dropped = fit.dropped.len(),
        used_tokens = fit.used_tokens,
        budget,
        "Fitted token budget"
    );

    Ok(Stages {
        rejected,
        resolved_order,
        groups: plan.groups,
        fit,
        cycle: resolution.cycle,
    })
}
