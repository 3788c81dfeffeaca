//! Core types for the prompt kernel.

pub mod atom;
pub mod context;
pub mod error;
pub mod result;

pub use atom::{Atom, AtomId, Category, OrderedAtom};
pub use context::{atom_set_digest, CompilationContext, Fingerprint};
pub use error::{CompileError, CycleError, InputError};
pub use result::{CompilationResult, CompiledPrompt, DropReason, DroppedAtom};
