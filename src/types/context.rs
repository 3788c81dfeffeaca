//! Compilation context and its fingerprint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;
use xxhash_rust::xxh64::Xxh64;

use crate::canonical::to_canonical_bytes;
use super::atom::Atom;

/// Every input that determines a unique compilation output.
///
/// Uses `BTreeMap` for selectors so that canonical serialization, and
/// therefore the fingerprint, is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct CompilationContext {
    /// Shard / persona identity.
    pub shard: String,
    /// Target language.
    pub language: Option<String>,
    /// Intent classification of the turn.
    pub intent: Option<String>,
    /// Token budget. `None` uses the compiler's configured default.
    pub token_budget: Option<i64>,
    /// Any other caller-supplied selector.
    pub selectors: BTreeMap<String, String>,
}

impl CompilationContext {
    /// Create a context for a shard.
    pub fn new(shard: impl Into<String>) -> Self {
        Self {
            shard: shard.into(),
            ..Self::default()
        }
    }

    /// Set the target language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the intent.
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    /// Set an explicit token budget.
    pub fn with_token_budget(mut self, budget: i64) -> Self {
        self.token_budget = Some(budget);
        self
    }

    /// Add a selector.
    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.selectors.insert(key.into(), value.into());
        self
    }

    /// Fingerprint of the context alone.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Xxh64::new(0);
        hasher.write(&to_canonical_bytes(self));
        Fingerprint::from_u64(hasher.finish())
    }

    /// Fingerprint of the context combined with a digest of the atom set.
    ///
    /// This is the compilation cache key.
    pub fn fingerprint_with_atoms(&self, atoms: &[std::sync::Arc<Atom>]) -> Fingerprint {
        let mut hasher = Xxh64::new(0);
        hasher.write(&to_canonical_bytes(self));
        hasher.write_u64(atom_set_digest(atoms));
        Fingerprint::from_u64(hasher.finish())
    }
}

/// Streamed xxh64 digest of an atom sequence.
///
/// Fields are length-prefixed so that adjacent strings cannot alias.
pub fn atom_set_digest(atoms: &[std::sync::Arc<Atom>]) -> u64 {
    fn write_str(hasher: &mut Xxh64, s: &str) {
        hasher.write_u64(s.len() as u64);
        hasher.write(s.as_bytes());
    }

    let mut hasher = Xxh64::new(0);
    hasher.write_u64(atoms.len() as u64);
    for atom in atoms {
        write_str(&mut hasher, atom.id.as_str());
        write_str(&mut hasher, atom.category.as_str());
        hasher.write_u64(atom.depends_on.len() as u64);
        for dep in &atom.depends_on {
            write_str(&mut hasher, dep.as_str());
        }
        hasher.write_u32(atom.token_cost);
        hasher.write_i32(atom.priority);
        write_str(&mut hasher, &atom.content);
    }
    hasher.finish()
}

/// Deterministic cache key for a compilation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an existing fingerprint string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    fn from_u64(value: u64) -> Self {
        Self(format!("{:016x}", value))
    }

    /// Get as string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fingerprint_determinism() {
        let ctx = CompilationContext::new("coder")
            .with_language("en")
            .with_selector("b", "2")
            .with_selector("a", "1");
        assert_eq!(ctx.fingerprint(), ctx.clone().fingerprint());
        assert_eq!(ctx.fingerprint().as_str().len(), 16);
    }

    #[test]
    fn test_selector_insertion_order_irrelevant() {
        let a = CompilationContext::new("s").with_selector("x", "1").with_selector("y", "2");
        let b = CompilationContext::new("s").with_selector("y", "2").with_selector("x", "1");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_budget_changes_fingerprint() {
        let a = CompilationContext::new("s").with_token_budget(100);
        let b = CompilationContext::new("s").with_token_budget(200);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_atoms_change_fingerprint() {
        let ctx = CompilationContext::new("s");
        let one = vec![Arc::new(Atom::new("a", "identity").with_content("x"))];
        let two = vec![Arc::new(Atom::new("a", "identity").with_content("y"))];
        assert_ne!(ctx.fingerprint_with_atoms(&one), ctx.fingerprint_with_atoms(&two));
        assert_eq!(ctx.fingerprint_with_atoms(&one), ctx.fingerprint_with_atoms(&one));
    }

    #[test]
    fn test_digest_no_field_aliasing() {
        let a = vec![Arc::new(Atom::new("ab", "c"))];
        let b = vec![Arc::new(Atom::new("a", "bc"))];
        assert_ne!(atom_set_digest(&a), atom_set_digest(&b));
    }
}
