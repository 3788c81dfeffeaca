//! Source-backed compilation with hot-swappable atom sets.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStats;
use crate::compiler::Compiler;
use crate::config::CompilerConfig;
use crate::source::AtomSource;
use crate::types::{CompilationContext, CompilationResult, CompileError};

/// Compiles prompts from an [`AtomSource`] that can be replaced at runtime.
///
/// ## Consistency
///
/// [`swap_source`](Self::swap_source) replaces the source and invalidates
/// the cache under the source write lock. [`compile`](Self::compile)
/// snapshots the source together with the cache generation under the read
/// lock, so a compilation that read the old source can finish and return,
/// but its result is never stored after the swap.
pub struct PromptKernel<S: AtomSource> {
    source: RwLock<Arc<S>>,
    compiler: Compiler,
}

impl<S: AtomSource + 'static> PromptKernel<S> {
    /// Create a kernel.
    pub fn new(source: S, config: CompilerConfig) -> Self {
        Self {
            source: RwLock::new(Arc::new(source)),
            compiler: Compiler::new(config),
        }
    }

    /// The underlying compiler.
    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Current source.
    pub fn source(&self) -> Arc<S> {
        self.source.read().clone()
    }

    /// Cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.compiler.cache_stats()
    }

    /// Fetch candidates for `context` and compile them.
    pub async fn compile(
        &self,
        cancel: &CancellationToken,
        context: &CompilationContext,
    ) -> Result<CompilationResult, CompileError> {
        let (source, generation) = {
            let guard = self.source.read();
            (Arc::clone(&*guard), self.compiler.cache().generation())
        };

        let atoms = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CompileError::Cancelled),
            fetched = source.candidate_atoms(context) => fetched.map_err(CompileError::from_source)?,
        };

        self.compiler
            .compile_with_generation(cancel, atoms, context, generation)
            .await
    }

    /// Replace the atom source and invalidate every cached prompt.
    ///
    /// Returns the previous source.
    pub fn swap_source(&self, source: S) -> Arc<S> {
        let mut guard = self.source.write();
        let previous = std::mem::replace(&mut *guard, Arc::new(source));
        let generation = self.compiler.cache().invalidate();
        drop(guard);

        tracing::info!(generation = generation.get(), "Atom source replaced");
        previous
    }
}
