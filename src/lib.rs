//! # prompt-kernel
//!
//! Deterministic prompt compilation from dependency-annotated atoms.
//!
//! The Prompt Kernel answers one question:
//!
//! > Given a set of prompt atoms and a context, what exact text does the
//! > model see?
//!
//! ## Core Contract
//!
//! 1. Order atoms so every dependency precedes its dependents, or name the cycle
//! 2. Group them by category in a fixed, documented order
//! 3. Fit the token budget, dropping or evicting atoms by priority
//! 4. Render the survivors and memoize the result by fingerprint
//!
//! ## Architecture
//!
//! ```text
//! AtomSource → Compiler → DependencyResolver → CategorySorter → TokenBudget → Renderer
//!                  ↕
//!           CompilationCache (single-flight, generation-invalidated)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same atoms + same context + same config → identical text and fingerprint
//! - Ready-queue ties break by ascending atom ID
//! - Category order is fixed; custom categories sort by name
//! - No hash-container iteration order reaches any output

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod resolver;
pub mod category;
pub mod budget;
pub mod render;
pub mod cache;
pub mod compiler;
pub mod explain;
pub mod source;
pub mod kernel;
pub mod config;
pub mod canonical;

// Re-exports
pub use types::{
    Atom, AtomId, Category, OrderedAtom,
    CompilationContext, Fingerprint,
    CompileError, CycleError, InputError,
    CompilationResult, CompiledPrompt, DropReason, DroppedAtom,
};
pub use resolver::{resolve, resolve_cancellable, resolve_partial, detect_cycles, sanitize_atoms, AtomEntry};
pub use category::{sort_by_category, CategoryGroup, CategoryPlan};
pub use budget::{fit, fit_cancellable, BudgetFit};
pub use render::{normalize_text, compute_content_hash, verify_content_hash, PromptRenderer};
pub use cache::{CompilationCache, CacheStats, Generation};
pub use compiler::Compiler;
pub use explain::ExplainReport;
pub use source::{AtomSource, InMemoryAtomSource, parse_atom_list};
pub use kernel::PromptKernel;
pub use config::{CompilerConfig, CacheConfig, CyclePolicy};
pub use canonical::{to_canonical_bytes, canonical_hash, canonical_hash_hex};

/// Cancellation token accepted by every compile entry point.
pub use tokio_util::sync::CancellationToken;

/// Schema version for compiled prompt and explain report types.
/// Increment on breaking changes to any serialized type.
pub const PROMPT_KERNEL_SCHEMA_VERSION: &str = "1.0.0";
